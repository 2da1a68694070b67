//! Framework transform router.
//!
//! Dispatches a source file to exactly one framework variant, normalizes the
//! variant's output to the requested module format and platform, and keeps
//! results in a content-addressed cache during development.
//!
//! ```text
//! TransformRequest ─► cache lookup ─► variant ─► plugins ─► normalize ─► cache insert
//!                         │ hit           │ error
//!                         ▼               ▼
//!                      result      vanilla variant (same pipeline)
//! ```

mod assets;
mod framework;
mod jsx;
pub mod normalize;
mod vanilla;
mod vue;

pub use assets::{asset_url_module, css_module, json_module};
pub use framework::Framework;
pub use normalize::{ModuleFormat, Platform, TransformTarget};

pub(crate) use framework::extension;

use super::cache::{CacheKey, TransformCache};
use super::plugin::{PluginContainer, PluginError};
use super::scan::scan_module;
use crate::compiler::{CompilerBackend, CompilerError, Diagnostic, ParseSyntax, SwcBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// One file to transform. Immutable for the duration of the call.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub file_path: PathBuf,
    pub source: String,
    pub framework: Framework,
    /// Dev mode enables caching and source maps.
    pub dev: bool,
    pub target: TransformTarget,
}

impl TransformRequest {
    /// Dev-mode request for the default browser ESM target.
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>, source: impl Into<String>, framework: Framework) -> Self {
        Self {
            file_path: file_path.into(),
            source: source.into(),
            framework,
            dev: true,
            target: TransformTarget::default(),
        }
    }

    #[must_use]
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: TransformTarget) -> Self {
        self.target = target;
        self
    }

    fn extension(&self) -> String {
        extension(&self.file_path)
    }
}

/// Output of a transform. Handed out and cached by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub code: String,
    pub map: Option<String>,
    /// Module specifiers the output still references, in source order.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{}: unsupported file type `.{extension}`", file.display())]
    Unsupported { file: PathBuf, extension: String },

    #[error("{}: {source}", file.display())]
    Compile {
        file: PathBuf,
        #[source]
        source: CompilerError,
    },

    #[error("{}: invalid {framework} component: {message}", file.display())]
    Component {
        file: PathBuf,
        framework: Framework,
        message: String,
    },

    #[error("{}: invalid JSON module: {message}", file.display())]
    Json { file: PathBuf, message: String },

    #[error("{}: cannot emit {format} output: {message}", file.display())]
    Normalize {
        file: PathBuf,
        format: ModuleFormat,
        message: String,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl TransformError {
    pub(crate) fn compile(file: &Path, source: CompilerError) -> Self {
        Self::Compile {
            file: file.to_path_buf(),
            source,
        }
    }

    /// Positioned diagnostics, when the failure came from the parser.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Compile { source, .. } => source.diagnostics(),
            _ => &[],
        }
    }
}

/// Code produced by a variant before normalization.
#[derive(Debug, Clone)]
pub(crate) struct VariantOutput {
    pub code: String,
    pub map: Option<String>,
}

impl Framework {
    /// Run this variant on `request`.
    pub(crate) fn transform(
        self,
        compiler: &dyn CompilerBackend,
        request: &TransformRequest,
    ) -> Result<VariantOutput, TransformError> {
        match self {
            Self::Vanilla => vanilla::transform(compiler, request),
            Self::React => jsx::transform(compiler, request, "react"),
            Self::Preact => jsx::transform(compiler, request, "preact"),
            Self::Vue => vue::transform(compiler, request),
        }
    }
}

/// Routes files to framework variants and caches their normalized output.
pub struct FrameworkRouter {
    compiler: Arc<dyn CompilerBackend>,
    plugins: Arc<PluginContainer>,
    cache: TransformCache,
}

impl FrameworkRouter {
    #[must_use]
    pub fn new(plugins: Arc<PluginContainer>) -> Self {
        Self::with_compiler(Arc::new(SwcBackend::new()), plugins)
    }

    #[must_use]
    pub fn with_compiler(compiler: Arc<dyn CompilerBackend>, plugins: Arc<PluginContainer>) -> Self {
        Self {
            compiler,
            plugins,
            cache: TransformCache::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &TransformCache {
        &self.cache
    }

    /// Drop cached results for `path`; returns how many entries went away.
    pub fn invalidate(&self, path: &Path) -> usize {
        self.cache.invalidate_path(path)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Transform one file.
    ///
    /// A failing framework variant is logged and retried with the vanilla
    /// variant when vanilla owns the extension. If the retry fails too, the
    /// variant's own error is returned.
    pub fn transform(&self, request: &TransformRequest) -> Result<TransformResult, TransformError> {
        let key = CacheKey::new(
            &request.file_path,
            request.source.as_bytes(),
            request.framework,
            request.target,
        );

        if request.dev {
            if let Some(hit) = self.cache.get(&key) {
                debug!(path = %request.file_path.display(), "transform cache hit");
                return Ok(hit);
            }
        }

        let start = Instant::now();
        let variant = request.framework.for_file(&request.file_path);
        let result = match self.run(variant, request) {
            Ok(result) => result,
            Err(err)
                if variant != Framework::Vanilla
                    && Framework::Vanilla.owns_extension(&request.extension()) =>
            {
                warn!(
                    path = %request.file_path.display(),
                    framework = %variant,
                    error = %err,
                    "framework variant failed, falling back to vanilla"
                );
                self.run(Framework::Vanilla, request).map_err(|_| err)?
            }
            Err(err) => return Err(err),
        };

        debug!(
            path = %request.file_path.display(),
            framework = %variant,
            elapsed_us = start.elapsed().as_micros() as u64,
            "transformed"
        );

        if request.dev {
            self.cache.insert(key, &result);
        }
        Ok(result)
    }

    fn run(&self, variant: Framework, request: &TransformRequest) -> Result<TransformResult, TransformError> {
        let output = variant.transform(self.compiler.as_ref(), request)?;
        let code = self.plugins.transform(output.code, &request.file_path)?;
        let normalized = normalize::normalize(&code, &request.file_path, request.target, request.dev)?;

        let dependencies = scan_module(&normalized.code, ParseSyntax::Js)
            .map(|scan| scan.specifiers.into_iter().map(|s| s.value).collect())
            .unwrap_or_default();

        Ok(TransformResult {
            code: normalized.code,
            map: if normalized.lines_shifted { None } else { output.map },
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn router() -> FrameworkRouter {
        FrameworkRouter::new(Arc::new(PluginContainer::default()))
    }

    /// Counts transpile calls and fails for React-style automatic runtime.
    struct CountingBackend {
        calls: AtomicUsize,
        fail_automatic: bool,
    }

    impl CompilerBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn transpile(
            &self,
            options: &crate::compiler::TranspileOptions,
            source: &str,
        ) -> Result<crate::compiler::TranspileOutput, CompilerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_automatic && options.jsx != crate::compiler::Jsx::Classic {
                return Err(CompilerError::Emit("automatic runtime unavailable".to_string()));
            }
            SwcBackend::new().transpile(options, source)
        }
    }

    #[test]
    fn test_cache_is_keyed_by_content_not_path() {
        let router = router();
        let a = TransformRequest::new("/p/src/a.ts", "export const v: number = 1;", Framework::Vanilla);
        let b = TransformRequest::new("/p/src/a.ts", "export const v: number = 2;", Framework::Vanilla);

        let first = router.transform(&a).unwrap();
        let second = router.transform(&b).unwrap();
        let third = router.transform(&a).unwrap();

        assert!(first.code.contains("= 1"));
        assert!(second.code.contains("= 2"));
        assert_eq!(third, first);
        assert_ne!(third, second);
    }

    #[test]
    fn test_idempotent_output() {
        let router = router();
        let request = TransformRequest::new(
            "/p/src/App.jsx",
            "export const App = () => <p>hi</p>;",
            Framework::Vanilla,
        );
        let once = router.transform(&request).unwrap();
        router.clear();
        let twice = router.transform(&request).unwrap();
        assert_eq!(once.code, twice.code);
    }

    #[test]
    fn test_dev_mode_hits_cache() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail_automatic: false,
        });
        let router = FrameworkRouter::with_compiler(backend.clone(), Arc::new(PluginContainer::default()));
        let request = TransformRequest::new("/p/a.ts", "export const a = 1;", Framework::Vanilla);

        router.transform(&request).unwrap();
        router.transform(&request).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let prod = request.clone().with_dev(false);
        router.transform(&prod).unwrap();
        router.transform(&prod).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_variant_failure_falls_back_to_vanilla() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            fail_automatic: true,
        });
        let router = FrameworkRouter::with_compiler(backend, Arc::new(PluginContainer::default()));
        let request = TransformRequest::new(
            "/p/src/App.tsx",
            "export const App = () => <div />;",
            Framework::React,
        );

        let result = router.transform(&request).unwrap();
        assert!(result.code.contains("React.createElement"));
    }

    #[test]
    fn test_syntax_error_surfaces_after_fallback() {
        let router = router();
        let request = TransformRequest::new("/p/src/App.tsx", "export const App = () => <div>;", Framework::React);

        let err = router.transform(&request).unwrap_err();
        assert!(matches!(err, TransformError::Compile { .. }));
        assert!(!err.diagnostics().is_empty());
        assert!(router.cache().is_empty());
    }

    #[test]
    fn test_broken_vue_script_keeps_its_diagnostics() {
        let router = router();
        let request = TransformRequest::new(
            "/p/src/App.vue",
            "<script>\nexport default { data() { return { n: } } }\n</script>\n<template><p>{{ n }}</p></template>",
            Framework::Vue,
        );

        let err = router.transform(&request).unwrap_err();
        assert!(matches!(err, TransformError::Compile { .. }), "{err}");
        assert!(!err.diagnostics().is_empty());
    }

    #[test]
    fn test_dependencies_reported() {
        let router = router();
        let request = TransformRequest::new(
            "/p/src/main.ts",
            "import { h } from 'preact';\nimport './style.css';\nh();\nconst page = import('./page.ts');",
            Framework::Vanilla,
        );

        let result = router.transform(&request).unwrap();
        assert_eq!(result.dependencies, vec!["preact", "./style.css", "./page.ts"]);
    }

    #[test]
    fn test_invalidate_drops_entries_for_path() {
        let router = router();
        router
            .transform(&TransformRequest::new("/p/a.ts", "export {};", Framework::Vanilla))
            .unwrap();
        router
            .transform(&TransformRequest::new("/p/b.ts", "export {};", Framework::Vanilla))
            .unwrap();

        assert_eq!(router.invalidate(Path::new("/p/a.ts")), 1);
        assert_eq!(router.cache().len(), 1);
    }
}
