//! Request routing for the dev server.
//!
//! ```text
//! GET /src/App.tsx
//!   → resolve on disk (extension candidates, index files)
//!   → accelerator or FrameworkRouter::transform
//!   → ImportRewriter::rewrite
//!   → HMR preamble + inline source map
//!   → application/javascript, no-cache
//! ```
//!
//! A failed transform is still a 200: the body is a module that logs the
//! error and opens the client overlay. File changes come in through
//! [`RequestRouter::on_file_change`] and leave through the HMR throttle.

use super::accel::{NativeAccelerator, NoopAccelerator};
use super::hmr::{
    module_preamble, HmrBroadcaster, HmrPayload, HmrThrottle, HmrUpdate, UpdateKind, CLIENT_PATH,
    CLIENT_RUNTIME,
};
use super::plugin::PluginContainer;
use super::prebundle::{DependencyBundler, PreBundleError, PreBundleMap, PreBundler, DEPS_URL_PREFIX, MODULES_URL_PREFIX};
use super::rewrite::{ImportRewriter, SCRIPT_EXTENSIONS};
use super::transform::{asset_url_module, extension, Framework, FrameworkRouter, TransformError, TransformRequest, TransformResult};
use crate::config::{DevConfig, CONFIG_FILE};
use crate::error::Error;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use vela_util::fs::{escapes_root, to_url_path};

/// Dev output changes on every edit; clients must never cache it.
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

const JS: &str = "application/javascript";
const HTML: &str = "text/html; charset=utf-8";

/// Tried in order when the requested path has no file on disk.
const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "vue"];

/// One response, independent of the HTTP server serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub cache_control: &'static str,
    /// Redirect target for 302 responses.
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl DevResponse {
    fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            cache_control: NO_CACHE,
            location: None,
            body: body.into(),
        }
    }

    fn js(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, JS, body)
    }

    fn not_found(what: &str) -> Self {
        Self::new(404, "text/plain; charset=utf-8", format!("Not found: {what}"))
    }

    fn forbidden(what: &str) -> Self {
        Self::new(403, "text/plain; charset=utf-8", format!("Forbidden: {what}"))
    }

    fn redirect(location: String) -> Self {
        Self {
            location: Some(location),
            ..Self::new(302, "text/plain; charset=utf-8", Vec::new())
        }
    }

    /// Body as text, for logging and tests.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Ties the transform pipeline, pre-bundler and HMR layer together.
pub struct RequestRouter {
    root: PathBuf,
    config: DevConfig,
    config_file: PathBuf,
    framework: Framework,
    transforms: FrameworkRouter,
    rewriter: ImportRewriter,
    prebundler: Arc<PreBundler>,
    broadcaster: Arc<HmrBroadcaster>,
    throttle: HmrThrottle,
    accel: Arc<dyn NativeAccelerator>,
    /// Specifiers a background pre-bundle pass has been started for.
    discovering: Arc<Mutex<BTreeSet<String>>>,
}

impl RequestRouter {
    /// Build a router for `config`. Must be called inside a tokio runtime.
    pub fn new(
        mut config: DevConfig,
        bundler: Arc<dyn DependencyBundler>,
        broadcaster: Arc<HmrBroadcaster>,
    ) -> Result<Self, Error> {
        let root = dunce::canonicalize(&config.root).map_err(|source| Error::RootUnreadable {
            path: config.root.clone(),
            source,
        })?;
        std::fs::read_dir(&root).map_err(|source| Error::RootUnreadable {
            path: root.clone(),
            source,
        })?;
        config.root = root.clone();
        config.validate()?;

        let plugins = Arc::new(
            PluginContainer::from_config(&config.plugins).map_err(|e| Error::ConfigInvalid(e.to_string()))?,
        );
        let framework = config.framework.unwrap_or_else(|| Framework::detect(&root));
        let throttle = HmrThrottle::spawn(
            broadcaster.clone(),
            Duration::from_millis(config.server.hmr_debounce_ms),
        );
        info!(root = %root.display(), %framework, plugins = plugins.len(), "dev engine ready");

        Ok(Self {
            config_file: root.join(CONFIG_FILE),
            framework,
            transforms: FrameworkRouter::new(plugins.clone()),
            rewriter: ImportRewriter::new(root.clone(), plugins),
            prebundler: Arc::new(PreBundler::new(&config, bundler)),
            broadcaster,
            throttle,
            accel: Arc::new(NoopAccelerator),
            discovering: Arc::default(),
            root,
            config,
        })
    }

    #[must_use]
    pub fn with_accelerator(mut self, accel: Arc<dyn NativeAccelerator>) -> Self {
        self.accel = accel;
        self
    }

    /// Config file whose changes restart the server.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &DevConfig {
        &self.config
    }

    #[must_use]
    pub fn framework(&self) -> Framework {
        self.framework
    }

    #[must_use]
    pub fn prebundler(&self) -> &Arc<PreBundler> {
        &self.prebundler
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Arc<HmrBroadcaster> {
        &self.broadcaster
    }

    #[must_use]
    pub fn transforms(&self) -> &FrameworkRouter {
        &self.transforms
    }

    /// Pre-bundle everything reachable from the configured entries.
    pub async fn warm_up(&self) -> Result<Arc<PreBundleMap>, PreBundleError> {
        let entries: Vec<PathBuf> = self.config.entry.iter().map(|e| self.root.join(e)).collect();
        let found = self.prebundler.discover(&entries);
        debug!(count = found.len(), "dependencies discovered from entries");
        self.prebundler.pre_bundle(&found).await
    }

    /// Serve `url` (path plus optional query).
    pub async fn handle(&self, url: &str) -> DevResponse {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));

        if path == CLIENT_PATH {
            return DevResponse::js(CLIENT_RUNTIME);
        }
        if let Some(name) = path.strip_prefix(DEPS_URL_PREFIX) {
            return self.serve_dep(name).await;
        }
        if let Some(specifier) = path.strip_prefix(MODULES_URL_PREFIX) {
            return self.serve_passthrough(specifier);
        }
        if escapes_root(path) {
            warn!(path, "rejected path outside the project root");
            return DevResponse::forbidden(path);
        }
        if path == "/" || path == "/index.html" {
            return self.serve_index().await;
        }

        let Some(file) = self.resolve_file(path) else {
            let last = path.rsplit('/').next().unwrap_or(path);
            if last.contains('.') {
                return DevResponse::not_found(path);
            }
            return self.serve_index().await;
        };

        let import = query.split('&').any(|p| p == "import");
        let ext = extension(&file);
        match ext.as_str() {
            "html" => match tokio::fs::read_to_string(&file).await {
                Ok(html) => DevResponse::new(200, HTML, inject_client(html)),
                Err(err) => self.read_failure(&file, &err),
            },
            "css" | "json" if !import => self.serve_static(&file, &ext).await,
            "css" | "json" => self.serve_module(&file, path).await,
            ext if SCRIPT_EXTENSIONS.contains(&ext) => self.serve_module(&file, path).await,
            _ if import => DevResponse::js(asset_url_module(path)),
            _ => self.serve_static(&file, &ext).await,
        }
    }

    /// Literal file, then `<path>.<ext>`, then `<path>/index.<ext>`.
    fn resolve_file(&self, url_path: &str) -> Option<PathBuf> {
        let base = self.root.join(url_path.trim_start_matches('/'));
        if base.is_file() {
            return Some(base);
        }
        let name = base.file_name()?.to_string_lossy().into_owned();
        CANDIDATE_EXTENSIONS
            .iter()
            .map(|ext| base.with_file_name(format!("{name}.{ext}")))
            .chain(CANDIDATE_EXTENSIONS.iter().map(|ext| base.join(format!("index.{ext}"))))
            .find(|p| p.is_file())
    }

    async fn serve_module(&self, file: &Path, url_path: &str) -> DevResponse {
        let result = match self.accel.process_file(file) {
            Some(hit) => {
                debug!(path = %file.display(), accelerator = self.accel.name(), "accelerated transform");
                Ok(hit)
            }
            None => match tokio::fs::read_to_string(file).await {
                Ok(source) => {
                    let request = TransformRequest::new(file, source, self.framework);
                    self.transforms.transform(&request)
                }
                Err(err) => return self.read_failure(file, &err),
            },
        };

        match result {
            Ok(result) => DevResponse::js(self.finish_module(url_path, result)),
            Err(err) => {
                warn!(path = %file.display(), error = %err, "transform failed");
                let payload = error_payload(&err, url_path);
                self.broadcaster.broadcast(&payload);
                DevResponse::js(error_module(&payload))
            }
        }
    }

    /// Rewrite, prepend the HMR preamble and inline the source map.
    fn finish_module(&self, url_path: &str, result: TransformResult) -> String {
        let rewritten = self.rewriter.rewrite(&result.code, &self.prebundler.snapshot());
        if !rewritten.unbundled.is_empty() {
            self.discover_in_background(rewritten.unbundled);
        }

        let preamble = module_preamble(url_path);
        let shift = preamble.lines().count();
        let mut code = preamble;
        code.push_str(&rewritten.code);

        if let Some(map) = result.map.as_deref().and_then(|m| shift_source_map(m, shift)) {
            if !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str("//# sourceMappingURL=data:application/json;base64,");
            code.push_str(&STANDARD.encode(map));
            code.push('\n');
        }
        code
    }

    /// Start a superset pre-bundle pass for specifiers not yet in the map.
    fn discover_in_background(&self, specifiers: Vec<String>) {
        let fresh: BTreeSet<String> = {
            let mut inflight = self.discovering.lock().unwrap_or_else(PoisonError::into_inner);
            specifiers
                .into_iter()
                .filter(|s| self.prebundler.should_prebundle(s))
                .filter(|s| inflight.insert(s.clone()))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }

        info!(count = fresh.len(), "new dependencies discovered, pre-bundling");
        let prebundler = self.prebundler.clone();
        let broadcaster = self.broadcaster.clone();
        let discovering = self.discovering.clone();
        tokio::spawn(async move {
            match prebundler.pre_bundle(&fresh).await {
                Ok(map) => {
                    let mut inflight = discovering.lock().unwrap_or_else(PoisonError::into_inner);
                    for specifier in &fresh {
                        inflight.remove(specifier);
                    }
                    drop(inflight);
                    debug!(token = %map.token, "dependency map updated");
                    broadcaster.broadcast(&HmrPayload::full_reload("/"));
                }
                Err(err) => warn!(error = %err, "background pre-bundle failed"),
            }
        });
    }

    async fn serve_dep(&self, name: &str) -> DevResponse {
        let Some(path) = self.prebundler.chunk_path(name) else {
            return DevResponse::not_found(name);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => DevResponse::js(bytes),
            Err(err) => self.read_failure(&path, &err),
        }
    }

    /// Redirect to the resolved file so its relative imports resolve against
    /// its real location.
    fn serve_passthrough(&self, specifier: &str) -> DevResponse {
        match self.prebundler.resolver().resolve(specifier) {
            Ok(entry) => match to_url_path(&self.root, &entry.path) {
                Some(url) => DevResponse::redirect(url),
                None => {
                    warn!(specifier, path = %entry.path.display(), "dependency resolved outside the project root");
                    DevResponse::forbidden(specifier)
                }
            },
            Err(err) => {
                warn!(specifier, error = %err, "cannot resolve dependency");
                DevResponse::not_found(specifier)
            }
        }
    }

    async fn serve_index(&self) -> DevResponse {
        let html = match tokio::fs::read_to_string(self.root.join("index.html")).await {
            Ok(html) => html,
            Err(_) => default_index(self.config.entry.first().map(String::as_str)),
        };
        DevResponse::new(200, HTML, inject_client(html))
    }

    async fn serve_static(&self, file: &Path, ext: &str) -> DevResponse {
        match tokio::fs::read(file).await {
            Ok(bytes) => DevResponse::new(200, content_type(ext), bytes),
            Err(err) => self.read_failure(file, &err),
        }
    }

    fn read_failure(&self, file: &Path, err: &std::io::Error) -> DevResponse {
        let shown = to_url_path(&self.root, file).unwrap_or_else(|| file.display().to_string());
        if err.kind() == std::io::ErrorKind::NotFound {
            DevResponse::not_found(&shown)
        } else {
            warn!(path = %file.display(), error = %err, "cannot read file");
            DevResponse::new(500, "text/plain; charset=utf-8", format!("Cannot read {shown}: {err}"))
        }
    }

    /// React to a watched file changing on disk.
    pub async fn on_file_change(&self, path: &Path) {
        if path == self.config_file {
            let shown = to_url_path(&self.root, path).unwrap_or_else(|| path.display().to_string());
            info!(path = %shown, "config changed, restarting");
            self.broadcaster.broadcast(&HmrPayload::ConfigChanged {
                path: shown.trim_start_matches('/').to_string(),
            });
            self.broadcaster.broadcast(&HmrPayload::Restarting);
            return;
        }

        if self.prebundler.is_manifest_file(path) {
            self.on_manifest_change().await;
            return;
        }

        let Some(url) = to_url_path(&self.root, path) else {
            return;
        };
        self.transforms.invalidate(path);
        self.accel.invalidate(path);

        for file in self.accel.rebuild(path) {
            let Some(file_url) = to_url_path(&self.root, &file) else {
                continue;
            };
            if file != path {
                self.transforms.invalidate(&file);
            }
            let kind = self.update_kind(&file, &file_url);
            debug!(path = %file_url, ?kind, changed = %url, "queued hmr update");
            self.throttle.notify(HmrUpdate::new(file_url, kind));
        }
    }

    /// Kind for a changed file; re-transforms it so errors surface now.
    fn update_kind(&self, file: &Path, url: &str) -> UpdateKind {
        let kind = UpdateKind::for_path(file);
        if kind == UpdateKind::FullReload {
            return kind;
        }
        let Ok(source) = std::fs::read_to_string(file) else {
            return UpdateKind::FullReload;
        };
        match self.transforms.transform(&TransformRequest::new(file, source, self.framework)) {
            Ok(_) => kind,
            Err(err) => {
                warn!(path = %url, error = %err, "transform failed after change");
                self.broadcaster.broadcast(&error_payload(&err, url));
                UpdateKind::FullReload
            }
        }
    }

    async fn on_manifest_change(&self) {
        info!("dependency manifest changed, re-bundling");
        let previous = self.prebundler.invalidate();
        self.discovering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.transforms.clear();
        if let Err(err) = self.prebundler.pre_bundle(&previous).await {
            warn!(error = %err, "pre-bundle after manifest change failed");
        }
        self.broadcaster.broadcast(&HmrPayload::full_reload("/"));
    }
}

fn error_payload(err: &TransformError, url_path: &str) -> HmrPayload {
    let first = err.diagnostics().first();
    HmrPayload::Error {
        message: err.to_string(),
        file: Some(url_path.to_string()),
        line: first.and_then(|d| d.line),
        column: first.and_then(|d| d.column),
    }
}

/// Module served in place of one that failed to transform.
fn error_module(payload: &HmrPayload) -> String {
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{\"message\":\"transform failed\"}".to_string());
    format!(
        "import {{ showErrorOverlay }} from \"{CLIENT_PATH}\";\nconst error = {json};\nconsole.error(\"[vela] \" + error.message);\nshowErrorOverlay(error);\nexport {{}};\n"
    )
}

/// Prefix the map's mappings with one empty line per preamble line.
fn shift_source_map(map: &str, lines: usize) -> Option<String> {
    let mut value: serde_json::Value = serde_json::from_str(map).ok()?;
    let mappings = value.get("mappings")?.as_str()?;
    let shifted = format!("{}{mappings}", ";".repeat(lines));
    value["mappings"] = serde_json::Value::String(shifted);
    serde_json::to_string(&value).ok()
}

fn inject_client(mut html: String) -> String {
    if html.contains(CLIENT_PATH) {
        return html;
    }
    let tag = format!("<script type=\"module\" src=\"{CLIENT_PATH}\"></script>");
    if let Some(pos) = html.find("</head>") {
        html.insert_str(pos, &format!("  {tag}\n  "));
    } else if let Some(pos) = html.find("<body") {
        html.insert_str(pos, &format!("{tag}\n"));
    } else {
        html.insert_str(0, &format!("{tag}\n"));
    }
    html
}

fn default_index(entry: Option<&str>) -> String {
    let entry = entry.map_or_else(String::new, |e| {
        format!("\n  <script type=\"module\" src=\"/{}\"></script>", e.trim_start_matches("./").trim_start_matches('/'))
    });
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>vela</title>
</head>
<body>
  <div id="app"></div>{entry}
</body>
</html>
"#
    )
}

fn content_type(ext: &str) -> &'static str {
    match ext {
        "html" => HTML,
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "js" | "mjs" => JS,
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
