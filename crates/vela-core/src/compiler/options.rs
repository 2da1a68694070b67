use std::path::{Path, PathBuf};

/// How JSX is lowered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Jsx {
    /// `React.createElement(...)`; the factory must be in scope.
    #[default]
    Classic,
    /// `jsx(...)` imported from `<import_source>/jsx-runtime`.
    Automatic { import_source: String },
}

/// What to do with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOptions {
    /// Picks the dialect by extension and names the file in the source map.
    pub path: PathBuf,
    pub jsx: Jsx,
    pub source_map: bool,
}

impl TranspileOptions {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            jsx: Jsx::Classic,
            source_map: false,
        }
    }

    #[must_use]
    pub fn automatic_jsx(mut self, import_source: impl Into<String>) -> Self {
        self.jsx = Jsx::Automatic {
            import_source: import_source.into(),
        };
        self
    }

    #[must_use]
    pub fn source_map(mut self, enabled: bool) -> Self {
        self.source_map = enabled;
        self
    }

    /// File name shown in the source map `sources`.
    pub(crate) fn display_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input.js")
    }

    pub(crate) fn file(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOutput {
    pub code: String,
    /// Source map v3 JSON, when requested.
    pub source_map: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TranspileOptions::new("src/app.js");
        assert_eq!(options.jsx, Jsx::Classic);
        assert!(!options.source_map);
        assert_eq!(options.display_name(), "app.js");
    }

    #[test]
    fn test_automatic_jsx() {
        let options = TranspileOptions::new("src/App.tsx")
            .automatic_jsx("preact")
            .source_map(true);
        assert_eq!(
            options.jsx,
            Jsx::Automatic {
                import_source: "preact".to_string()
            }
        );
        assert!(options.source_map);
    }
}
