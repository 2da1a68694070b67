//! Compiler backend abstraction.
//!
//! Variants never call SWC directly. They describe a file with
//! [`TranspileOptions`] and hand it to a [`CompilerBackend`]; static analysis
//! passes share the parse entry point in [`parse`].

pub mod options;
pub mod parse;
pub mod swc;

pub use options::{Jsx, TranspileOptions, TranspileOutput};
pub use parse::{parse_module, parse_program, ParseSyntax, ParsedModule};
pub use swc::SwcBackend;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A parser message with an optional 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Diagnostic {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    #[must_use]
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, " at {line}:{column}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum CompilerError {
    /// The input did not parse. Never empty.
    #[error("{}", summarize(.0))]
    Syntax(Vec<Diagnostic>),

    /// Parsing succeeded but output could not be produced.
    #[error("{0}")]
    Emit(String),
}

impl CompilerError {
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Syntax(diagnostics) => diagnostics,
            Self::Emit(_) => &[],
        }
    }

    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    match diagnostics {
        [] => "syntax error".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

pub trait CompilerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compile `source` as described by `options`.
    fn transpile(&self, options: &TranspileOptions, source: &str) -> Result<TranspileOutput, CompilerError>;

    /// Whether this backend can compile files with extension `ext`.
    fn supports_extension(&self, ext: &str) -> bool {
        matches!(
            ext.to_ascii_lowercase().as_str(),
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "mts" | "cjs" | "cts"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let one = CompilerError::Syntax(vec![Diagnostic::error("Expected `}`").at(3, 7)]);
        assert_eq!(one.to_string(), "Expected `}` at 3:7");
        assert!(one.is_syntax());

        let many = CompilerError::Syntax(vec![
            Diagnostic::error("Unexpected token"),
            Diagnostic::error("Expected `;`").at(2, 1),
        ]);
        assert_eq!(many.to_string(), "Unexpected token (and 1 more)");
        assert_eq!(many.diagnostics().len(), 2);
    }

    #[test]
    fn test_emit_error_has_no_diagnostics() {
        let err = CompilerError::Emit("writer closed".to_string());
        assert!(!err.is_syntax());
        assert!(err.diagnostics().is_empty());
    }

    #[test]
    fn test_default_extension_support() {
        let backend = SwcBackend::new();
        assert!(backend.supports_extension("tsx"));
        assert!(backend.supports_extension("CTS"));
        assert!(!backend.supports_extension("vue"));
        assert!(!backend.supports_extension("css"));
    }
}
