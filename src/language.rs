use crate::error::TimelapseError;
use camino::Utf8Path;
use tree_sitter::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LangId {
    Rust,
    C,
    Cpp,
    Python,
    Javascript,
    Typescript,
    Tsx,
    Go,
    Php,
    Java,
    Swift,
    #[serde(rename = "csharp")]
    CSharp,
    Bash,
}

impl std::fmt::Display for LangId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Php => "php",
            Self::Java => "java",
            Self::Swift => "swift",
            Self::CSharp => "csharp",
            Self::Bash => "bash",
        };
        write!(f, "{s}")
    }
}

impl LangId {
    /// Detect language from file extension.
    pub fn from_path(path: &Utf8Path) -> Result<Self, TimelapseError> {
        let ext = path.extension().unwrap_or("").to_lowercase();

        match ext.as_str() {
            "rs" => Ok(Self::Rust),
            "c" | "h" => Ok(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Ok(Self::Cpp),
            "py" | "pyi" => Ok(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Ok(Self::Javascript),
            "ts" | "mts" | "cts" => Ok(Self::Typescript),
            "tsx" => Ok(Self::Tsx),
            "go" => Ok(Self::Go),
            "php" | "phtml" => Ok(Self::Php),
            "java" => Ok(Self::Java),
            "swift" => Ok(Self::Swift),
            "cs" => Ok(Self::CSharp),
            "sh" | "bash" | "zsh" => Ok(Self::Bash),
            other => {
                if other.is_empty() {
                    Err(TimelapseError::unsupported_language("<no extension>"))
                } else {
                    Err(TimelapseError::unsupported_language(other))
                }
            }
        }
    }

    /// Get the tree-sitter Language for this language ID.
    pub fn ts_language(self) -> Language {
        match self {
            Self::Rust => Language::new(tree_sitter_rust::LANGUAGE),
            Self::C => Language::new(tree_sitter_c::LANGUAGE),
            Self::Cpp => Language::new(tree_sitter_cpp::LANGUAGE),
            Self::Python => Language::new(tree_sitter_python::LANGUAGE),
            Self::Javascript => Language::new(tree_sitter_javascript::LANGUAGE),
            Self::Typescript => Language::new(tree_sitter_typescript::LANGUAGE_TYPESCRIPT),
            Self::Tsx => Language::new(tree_sitter_typescript::LANGUAGE_TSX),
            Self::Go => Language::new(tree_sitter_go::LANGUAGE),
            Self::Php => Language::new(tree_sitter_php::LANGUAGE_PHP),
            Self::Java => Language::new(tree_sitter_java::LANGUAGE),
            Self::Swift => Language::new(tree_sitter_swift::LANGUAGE),
            Self::CSharp => Language::new(tree_sitter_c_sharp::LANGUAGE),
            Self::Bash => Language::new(tree_sitter_bash::LANGUAGE),
        }
    }
}
