//! Kind-tagged error types for the compiler pipeline.
//!
//! Each pipeline stage returns either a value or a diagnostics batch;
//! errors never cross component boundaries as panics. The top-level
//! `CompileError` keeps a stable kind per failure class so callers can
//! route on it (syntax vs. I/O vs. missing sidecar).

use thiserror::Error;

/// Top-level error for the parse → validate → emit pipeline.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A `.bpm` file was given but no `<stem>.yaml` / `<stem>.yml` sidecar
    /// exists next to it.
    #[error("missing OpenAPI sidecar for '{stem}': expected {stem}.yaml or {stem}.yml in the same directory")]
    MissingOpenApi { stem: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Stable kind identifier so callers can route failures.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Parse(_) => "syntax",
            CompileError::MissingOpenApi { .. } => "missing-openapi",
            CompileError::Io(_) => "io",
        }
    }
}

/// Errors produced while turning source text into an AST.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: u32,
        column: u32,
        message: String,
    },

    #[error("duplicate property '{key}' in element '{element}'")]
    DuplicateKey { element: String, key: String },

    #[error("element '{element}' is missing required property '{field}'")]
    MissingField { element: String, field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = CompileError::MissingOpenApi {
            stem: "p".to_string(),
        };
        assert_eq!(err.kind(), "missing-openapi");

        let err = CompileError::Parse(ParseError::Syntax {
            line: 3,
            column: 7,
            message: "expected '{'".to_string(),
        });
        assert_eq!(err.kind(), "syntax");
        assert!(err.to_string().contains("line 3, column 7"));
    }

    #[test]
    fn missing_field_names_the_element() {
        let err = ParseError::MissingField {
            element: "Process Data".to_string(),
            field: "script".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "element 'Process Data' is missing required property 'script'"
        );
    }
}
