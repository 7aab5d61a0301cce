use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Query, QueryCursor};

use crate::engine::parser::{ParseFailure, detect_language, parse_bounded};
use crate::language::LangId;
use crate::models::symbol::{ExtractionMethod, SymbolKind, SymbolSpan};

/// Produces the definition spans of one file's content.
pub trait BoundaryResolver: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Spans with dot-qualified names, possibly nested.
    fn boundaries(&self, source: &str) -> Result<Vec<SymbolSpan>, ParseFailure>;
}

/// Structural resolver backed by a tree-sitter grammar.
pub struct TreeSitterResolver {
    lang: LangId,
    timeout: Duration,
}

impl TreeSitterResolver {
    pub fn new(lang: LangId, timeout: Duration) -> Self {
        Self { lang, timeout }
    }
}

impl BoundaryResolver for TreeSitterResolver {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::TreeSitter
    }

    fn boundaries(&self, source: &str) -> Result<Vec<SymbolSpan>, ParseFailure> {
        let tree = parse_bounded(source, self.lang, self.timeout)?;
        let language = self.lang.ts_language();
        let query = Query::new(&language, symbol_query(self.lang)).map_err(|_| ParseFailure::Failed)?;
        let names = query.capture_names();

        let mut raw = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, tree.root_node(), source.as_bytes());
        while let Some(m) = matches.next() {
            let mut def = None;
            let mut name = None;
            for capture in m.captures {
                let capture_name = names[capture.index as usize];
                if capture_name == "def" {
                    def = Some(capture.node);
                } else if let Some(kind) = capture_name_to_kind(capture_name) {
                    name = Some((capture.node, kind));
                }
            }
            let (Some(def), Some((name_node, kind))) = (def, name) else {
                continue;
            };
            let Ok(text) = name_node.utf8_text(source.as_bytes()) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            raw.push(SymbolSpan {
                name: text.to_string(),
                kind,
                start_line: def.start_position().row + 1,
                end_line: def.end_position().row + 1,
            });
        }

        Ok(qualify(raw))
    }
}

fn capture_name_to_kind(name: &str) -> Option<SymbolKind> {
    match name {
        "function.name" => Some(SymbolKind::Function),
        "method.name" => Some(SymbolKind::Method),
        "class.name" => Some(SymbolKind::Class),
        "struct.name" => Some(SymbolKind::Struct),
        "enum.name" => Some(SymbolKind::Enum),
        "interface.name" | "trait.name" => Some(SymbolKind::Trait),
        "constant.name" => Some(SymbolKind::Constant),
        "type.name" => Some(SymbolKind::Type),
        "module.name" => Some(SymbolKind::Module),
        _ => None,
    }
}

/// Each pattern captures the definition node as `@def` and its name.
fn symbol_query(lang_id: LangId) -> &'static str {
    match lang_id {
        LangId::Rust => {
            r#"
            (function_item name: (identifier) @function.name) @def
            (struct_item name: (type_identifier) @struct.name) @def
            (enum_item name: (type_identifier) @enum.name) @def
            (trait_item name: (type_identifier) @trait.name) @def
            (impl_item type: (type_identifier) @type.name) @def
            (const_item name: (identifier) @constant.name) @def
            (static_item name: (identifier) @constant.name) @def
            (mod_item name: (identifier) @module.name) @def
            "#
        }
        LangId::C => {
            r#"
            (function_definition declarator: (function_declarator declarator: (identifier) @function.name)) @def
            (struct_specifier name: (type_identifier) @struct.name body: (field_declaration_list)) @def
            (enum_specifier name: (type_identifier) @enum.name) @def
            "#
        }
        LangId::Cpp => {
            r#"
            (function_definition declarator: (function_declarator declarator: (identifier) @function.name)) @def
            (function_definition declarator: (function_declarator declarator: (field_identifier) @method.name)) @def
            (class_specifier name: (type_identifier) @class.name body: (field_declaration_list)) @def
            (struct_specifier name: (type_identifier) @struct.name body: (field_declaration_list)) @def
            (enum_specifier name: (type_identifier) @enum.name) @def
            (namespace_definition name: (namespace_identifier) @module.name) @def
            "#
        }
        LangId::Python => {
            r#"
            (function_definition name: (identifier) @function.name) @def
            (class_definition name: (identifier) @class.name) @def
            "#
        }
        LangId::Javascript => {
            r#"
            (function_declaration name: (identifier) @function.name) @def
            (class_declaration name: (identifier) @class.name) @def
            (method_definition name: (property_identifier) @method.name) @def
            (lexical_declaration (variable_declarator name: (identifier) @constant.name value: (arrow_function))) @def
            "#
        }
        LangId::Typescript | LangId::Tsx => {
            r#"
            (function_declaration name: (identifier) @function.name) @def
            (class_declaration name: (type_identifier) @class.name) @def
            (method_definition name: (property_identifier) @method.name) @def
            (interface_declaration name: (type_identifier) @interface.name) @def
            (type_alias_declaration name: (type_identifier) @type.name) @def
            (enum_declaration name: (identifier) @enum.name) @def
            (lexical_declaration (variable_declarator name: (identifier) @constant.name value: (arrow_function))) @def
            "#
        }
        LangId::Go => {
            r#"
            (function_declaration name: (identifier) @function.name) @def
            (method_declaration name: (field_identifier) @method.name) @def
            (type_declaration (type_spec name: (type_identifier) @type.name)) @def
            "#
        }
        LangId::Php => {
            r#"
            (function_definition name: (name) @function.name) @def
            (class_declaration name: (name) @class.name) @def
            (method_declaration name: (name) @method.name) @def
            (interface_declaration name: (name) @interface.name) @def
            (enum_declaration name: (name) @enum.name) @def
            (trait_declaration name: (name) @trait.name) @def
            "#
        }
        LangId::Java => {
            r#"
            (method_declaration name: (identifier) @method.name) @def
            (constructor_declaration name: (identifier) @method.name) @def
            (class_declaration name: (identifier) @class.name) @def
            (interface_declaration name: (identifier) @interface.name) @def
            (enum_declaration name: (identifier) @enum.name) @def
            "#
        }
        LangId::Swift => {
            // tree-sitter-swift uses class_declaration for struct/class/enum
            r#"
            (function_declaration name: (simple_identifier) @function.name) @def
            (class_declaration name: (type_identifier) @class.name) @def
            (protocol_declaration name: (type_identifier) @interface.name) @def
            "#
        }
        LangId::CSharp => {
            r#"
            (namespace_declaration name: (_) @module.name) @def
            (method_declaration name: (identifier) @method.name) @def
            (class_declaration name: (identifier) @class.name) @def
            (struct_declaration name: (identifier) @struct.name) @def
            (interface_declaration name: (identifier) @interface.name) @def
            (enum_declaration name: (identifier) @enum.name) @def
            "#
        }
        LangId::Bash => {
            r#"
            (function_definition name: (word) @function.name) @def
            "#
        }
    }
}

/// Definition keyword at some indentation, e.g. `    def parse_args(`,
/// `pub fn main()`, `func (s *Server) Start()`, `export class Foo`.
static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<indent>[ \t]*)(?:(?:pub(?:\([^)]*\))?|export|default|async|static|public|private|protected|internal|abstract|final|override|open|unsafe|extern)\s+)*(?P<kw>fn|def|function|func|class|struct|enum|trait|interface|impl|module|namespace|object)\s+(?:\([^)]*\)\s*)?(?P<name>[A-Za-z_$][\w$]*)",
    )
    .expect("Invalid definition header regex")
});

/// Line-oriented resolver used when no structural parse is available.
///
/// A header's span ends right before the next header with the same or lower
/// indentation, or at the end of the file.
pub struct HeaderFallbackResolver;

impl BoundaryResolver for HeaderFallbackResolver {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::HeaderFallback
    }

    fn boundaries(&self, source: &str) -> Result<Vec<SymbolSpan>, ParseFailure> {
        let lines: Vec<&str> = source.lines().collect();
        let headers: Vec<(usize, usize, String, SymbolKind)> = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let caps = HEADER.captures(line)?;
                let indent = caps.name("indent").map_or(0, |m| m.as_str().len());
                let kind = keyword_kind(caps.name("kw")?.as_str());
                Some((idx + 1, indent, caps.name("name")?.as_str().to_string(), kind))
            })
            .collect();

        let last_line = lines.len();
        let spans = headers
            .iter()
            .enumerate()
            .map(|(i, (start, indent, name, kind))| {
                let end = headers[i + 1..]
                    .iter()
                    .find(|(_, other_indent, _, _)| other_indent <= indent)
                    .map_or(last_line, |(next_start, _, _, _)| next_start - 1);
                SymbolSpan {
                    name: name.clone(),
                    kind: *kind,
                    start_line: *start,
                    end_line: end.max(*start),
                }
            })
            .collect();

        Ok(qualify(spans))
    }
}

fn keyword_kind(kw: &str) -> SymbolKind {
    match kw {
        "class" | "object" => SymbolKind::Class,
        "struct" => SymbolKind::Struct,
        "enum" => SymbolKind::Enum,
        "trait" | "interface" => SymbolKind::Trait,
        "impl" => SymbolKind::Type,
        "module" | "namespace" => SymbolKind::Module,
        _ => SymbolKind::Function,
    }
}

/// Best-effort symbol name from the function context git prints after `@@`.
pub fn symbol_from_hunk_header(header: &str) -> Option<String> {
    HEADER
        .captures(header)
        .and_then(|caps| caps.name("name"))
        .map(|m| m.as_str().to_string())
}

/// Resolver chosen by file extension; unknown extensions get the header fallback.
pub fn resolver_for(path: &str, timeout: Duration) -> Box<dyn BoundaryResolver> {
    match detect_language(path) {
        Ok(lang) => Box::new(TreeSitterResolver::new(lang, timeout)),
        Err(_) => Box::new(HeaderFallbackResolver),
    }
}

/// Boundary table for one file version plus how it was obtained.
#[derive(Debug)]
pub struct Resolved {
    pub table: BoundaryTable,
    pub method: ExtractionMethod,
    /// Why the structural resolver was not used, if it was skipped or failed.
    pub failure: Option<ParseFailure>,
}

/// Resolve `source` with the extension's resolver, degrading to the header
/// fallback on any structural failure.
pub fn resolve(path: &str, source: &str, timeout: Duration) -> Resolved {
    let primary = resolver_for(path, timeout);
    let unsupported = primary.method().is_fallback();

    match primary.boundaries(source) {
        Ok(spans) => Resolved {
            table: BoundaryTable::new(spans),
            method: primary.method(),
            failure: unsupported.then_some(ParseFailure::Unsupported),
        },
        Err(failure) => {
            let spans = HeaderFallbackResolver.boundaries(source).unwrap_or_default();
            Resolved {
                table: BoundaryTable::new(spans),
                method: ExtractionMethod::HeaderFallback,
                failure: Some(failure),
            }
        }
    }
}

/// Replace bare names with dot-qualified ones using span containment.
fn qualify(mut spans: Vec<SymbolSpan>) -> Vec<SymbolSpan> {
    spans.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(b.end_line.cmp(&a.end_line))
            .then_with(|| a.name.cmp(&b.name))
    });
    spans.dedup_by(|b, a| a.start_line == b.start_line && a.end_line == b.end_line && a.name == b.name);

    let mut stack: Vec<(usize, usize, String)> = Vec::new();
    for span in &mut spans {
        while let Some((start, end, _)) = stack.last()
            && !(*start <= span.start_line && span.end_line <= *end)
        {
            stack.pop();
        }
        let qualified = match stack.last() {
            Some((_, _, parent)) => format!("{parent}.{}", span.name),
            None => span.name.clone(),
        };
        stack.push((span.start_line, span.end_line, qualified.clone()));
        span.name = qualified;
    }
    spans
}

/// Non-overlapping line segments, each owned by its innermost definition.
#[derive(Debug, Default)]
pub struct BoundaryTable {
    spans: Vec<SymbolSpan>,
    /// `(start, end, span index)`, sorted and disjoint.
    segments: Vec<(usize, usize, usize)>,
}

impl BoundaryTable {
    pub fn new(spans: Vec<SymbolSpan>) -> Self {
        let mut points: Vec<usize> = spans
            .iter()
            .flat_map(|s| [s.start_line, s.end_line + 1])
            .collect();
        points.sort_unstable();
        points.dedup();

        let mut segments: Vec<(usize, usize, usize)> = Vec::new();
        for pair in points.windows(2) {
            let (from, to) = (pair[0], pair[1] - 1);
            let innermost = spans
                .iter()
                .enumerate()
                .filter(|(_, s)| s.contains(from))
                .max_by(|(_, a), (_, b)| {
                    a.start_line
                        .cmp(&b.start_line)
                        .then(b.end_line.cmp(&a.end_line))
                })
                .map(|(idx, _)| idx);
            let Some(idx) = innermost else {
                continue;
            };
            match segments.last_mut() {
                Some(last) if last.2 == idx && last.1 + 1 == from => last.1 = to,
                _ => segments.push((from, to, idx)),
            }
        }

        Self { spans, segments }
    }

    /// Innermost definition containing `line`, `None` for module-level lines.
    pub fn lookup(&self, line: usize) -> Option<&SymbolSpan> {
        let pos = self.segments.partition_point(|(start, _, _)| *start <= line);
        let (start, end, idx) = *self.segments.get(pos.checked_sub(1)?)?;
        (start <= line && line <= end).then(|| &self.spans[idx])
    }

    /// Every definition by qualified name.
    pub fn spans(&self) -> &[SymbolSpan] {
        &self.spans
    }

    pub fn find(&self, name: &str) -> Option<&SymbolSpan> {
        self.spans.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
