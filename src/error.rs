use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidWindow,
    UnknownRepo,
    InvalidConfig,
    GitError,
    ParseError,
    UnsupportedLanguage,
    IoError,
    InvalidRequest,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWindow => write!(f, "INVALID_WINDOW"),
            Self::UnknownRepo => write!(f, "UNKNOWN_REPO"),
            Self::InvalidConfig => write!(f, "INVALID_CONFIG"),
            Self::GitError => write!(f, "GIT_ERROR"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::UnsupportedLanguage => write!(f, "UNSUPPORTED_LANGUAGE"),
            Self::IoError => write!(f, "IO_ERROR"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
        }
    }
}

/// A classified, fatal error. Everything recoverable is a quality flag instead.
#[derive(Debug, Serialize)]
pub struct TimelapseError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for TimelapseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for TimelapseError {}

impl TimelapseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown_repo(name: &str) -> Self {
        Self::new(ErrorCode::UnknownRepo, format!("Unknown repository: {name}"))
    }

    pub fn invalid_window(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidWindow, message)
    }

    pub fn unsupported_language(ext: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedLanguage,
            format!("Unsupported language for extension: {ext}"),
        )
    }

    pub fn parse_error(path: &str) -> Self {
        Self::new(ErrorCode::ParseError, format!("Failed to parse: {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = TimelapseError::unknown_repo("ghost");
        assert_eq!(err.to_string(), "[UNKNOWN_REPO] Unknown repository: ghost");
    }

    #[test]
    fn downcasts_through_anyhow() {
        let err: anyhow::Error = TimelapseError::invalid_window("start after end").into();
        let inner = err.downcast_ref::<TimelapseError>().unwrap();
        assert_eq!(inner.code, ErrorCode::InvalidWindow);
    }
}
