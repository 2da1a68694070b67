//! Dependency pre-bundling.
//!
//! Bare specifiers are resolved to entry files (see [`PackageResolver`]) and
//! bundled together in one pass with shared-chunk extraction, so packages
//! that depend on a common third package do not each carry a copy. Entries
//! bundled from CommonJS get named-export shims afterwards.
//!
//! Output lives in `<cacheDir>/deps_<token>/` and is served under
//! [`DEPS_URL_PREFIX`]. The resulting [`PreBundleMap`] is persisted as
//! `<cacheDir>/_metadata.json` and reused while the dependency manifest hash
//! (package.json plus lockfiles) is unchanged.
//!
//! At most one bundling pass runs at a time. A caller arriving while a pass is
//! in flight waits for it and then reuses its map if that already covers the
//! requested specifiers.

mod esbuild;
mod shim;

pub use esbuild::EsbuildBundler;

use crate::config::{DevConfig, PrebundleConfig};
use crate::resolver::{PackageResolver, ResolutionStrategy, ResolvedEntryPoint};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vela_util::fs::atomic_write;
use vela_util::hash::{blake3_bytes, blake3_files};

/// URL prefix for pre-bundled entries and chunks.
pub const DEPS_URL_PREFIX: &str = "/@deps/";

/// URL prefix for dependencies served file-by-file.
pub const MODULES_URL_PREFIX: &str = "/@modules/";

pub const METADATA_FILE: &str = "_metadata.json";

/// Files whose content defines the dependency set.
pub const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
];

const TOKEN_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundler `{0}` not found")]
    NotFound(String),

    #[error("failed to start bundler: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("bundler exited with status {}: {stderr}", status.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed { status: Option<i32>, stderr: String },
}

#[derive(Debug, Error)]
pub enum PreBundleError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("pre-bundle I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One bundling pass: every entry in `entries` becomes `out_dir/<stem>.js`.
#[derive(Debug, Clone)]
pub struct BundleJob {
    pub root: PathBuf,
    pub out_dir: PathBuf,
    /// Output stem → entry file.
    pub entries: BTreeMap<String, PathBuf>,
}

/// Bundles resolved entries with shared-chunk extraction.
///
/// Implementations must emit one ESM file per entry named after its stem and
/// put shared code in sibling files under `out_dir` whose names start with `_`.
pub trait DependencyBundler: Send + Sync {
    fn name(&self) -> &'static str;

    fn bundle<'a>(&'a self, job: &'a BundleJob) -> BoxFuture<'a, Result<(), BundleError>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreBundledEntry {
    /// Served URL, cache-busting token included.
    pub url: String,
    /// File name inside the map's output directory.
    pub file: String,
    pub source: PathBuf,
    pub strategy: ResolutionStrategy,
}

/// Specifier → served URL for one bundling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreBundleMap {
    pub manifest_hash: String,
    pub token: String,
    pub out_dir: PathBuf,
    pub entries: BTreeMap<String, PreBundledEntry>,
    /// Requested but unresolvable; served through [`MODULES_URL_PREFIX`] instead.
    pub skipped: BTreeSet<String>,
}

impl PreBundleMap {
    /// A map with no entries for `manifest_hash`.
    #[must_use]
    pub fn empty(manifest_hash: &str) -> Self {
        Self {
            manifest_hash: manifest_hash.to_string(),
            token: short_token(manifest_hash),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn url(&self, specifier: &str) -> Option<&str> {
        self.entries.get(specifier).map(|e| e.url.as_str())
    }

    /// Pre-bundled URL if present, else the passthrough URL.
    #[must_use]
    pub fn served_url(&self, specifier: &str) -> String {
        self.url(specifier)
            .map_or_else(|| self.passthrough_url(specifier), str::to_string)
    }

    #[must_use]
    pub fn passthrough_url(&self, specifier: &str) -> String {
        format!("{MODULES_URL_PREFIX}{specifier}?v={}", self.token)
    }

    /// Every specifier this pass handled, bundled or skipped.
    #[must_use]
    pub fn specifiers(&self) -> BTreeSet<String> {
        self.entries.keys().chain(self.skipped.iter()).cloned().collect()
    }

    #[must_use]
    pub fn covers<'a>(&self, specifiers: impl IntoIterator<Item = &'a String>) -> bool {
        specifiers
            .into_iter()
            .all(|s| self.entries.contains_key(s) || self.skipped.contains(s))
    }

    fn files_exist(&self) -> bool {
        self.entries.values().all(|e| self.out_dir.join(&e.file).is_file())
    }
}

/// Runs and caches dependency bundling passes.
pub struct PreBundler {
    root: PathBuf,
    cache_dir: PathBuf,
    config: PrebundleConfig,
    resolver: PackageResolver,
    bundler: Arc<dyn DependencyBundler>,
    pass: Mutex<()>,
    current: RwLock<Arc<PreBundleMap>>,
}

impl PreBundler {
    /// Create a pre-bundler, adopting persisted metadata when it still matches.
    #[must_use]
    pub fn new(config: &DevConfig, bundler: Arc<dyn DependencyBundler>) -> Self {
        let root = config.root.clone();
        let cache_dir = config.cache_dir();
        let manifest_hash = manifest_hash(&root);
        let current = load_metadata(&cache_dir, &manifest_hash)
            .unwrap_or_else(|| PreBundleMap::empty(&manifest_hash));

        Self {
            resolver: PackageResolver::new(root.clone()),
            root,
            cache_dir,
            config: config.prebundle.clone(),
            bundler,
            pass: Mutex::new(()),
            current: RwLock::new(Arc::new(current)),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &PackageResolver {
        &self.resolver
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The latest completed map.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PreBundleMap> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `specifier` belongs in a pre-bundle pass at all.
    #[must_use]
    pub fn should_prebundle(&self, specifier: &str) -> bool {
        self.config.should_prebundle(specifier)
    }

    /// Whether `path` is one of the root's dependency manifest files.
    #[must_use]
    pub fn is_manifest_file(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| MANIFEST_FILES.contains(&n))
    }

    /// Drop the current map after a manifest change.
    ///
    /// Returns the specifiers it covered so the caller can bundle them again.
    pub fn invalidate(&self) -> BTreeSet<String> {
        let fresh = Arc::new(PreBundleMap::empty(&manifest_hash(&self.root)));
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *current, fresh);
        previous.specifiers()
    }

    /// On-disk path of a file under [`DEPS_URL_PREFIX`].
    #[must_use]
    pub fn chunk_path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return None;
        }
        let path = self.snapshot().out_dir.join(name);
        path.is_file().then_some(path)
    }

    /// Map every specifier in `specifiers` (plus configured includes) to a served URL.
    ///
    /// Specifiers that cannot be resolved are logged and left out of the
    /// bundle; only a failing bundler fails the pass.
    pub async fn pre_bundle(&self, specifiers: &BTreeSet<String>) -> Result<Arc<PreBundleMap>, PreBundleError> {
        let _pass = self.pass.lock().await;

        let manifest_hash = manifest_hash(&self.root);
        let previous = self.snapshot();
        let mut wanted: BTreeSet<String> = specifiers
            .iter()
            .chain(self.config.include.iter())
            .filter(|s| self.should_prebundle(s))
            .cloned()
            .collect();

        if previous.manifest_hash == manifest_hash {
            if previous.covers(&wanted) {
                debug!(count = wanted.len(), "pre-bundle map reused");
                return Ok(previous);
            }
            wanted.extend(previous.specifiers());
        }

        let start = Instant::now();
        info!(count = wanted.len(), bundler = self.bundler.name(), "pre-bundling dependencies");

        let mut resolved: BTreeMap<String, ResolvedEntryPoint> = BTreeMap::new();
        let mut skipped = BTreeSet::new();
        for specifier in &wanted {
            match self.resolver.resolve(specifier) {
                Ok(entry) => {
                    debug!(specifier = %specifier, strategy = ?entry.strategy, path = %entry.path.display(), "resolved");
                    resolved.insert(specifier.clone(), entry);
                }
                Err(err) => {
                    warn!(specifier = %specifier, error = %err, "skipping unresolvable dependency");
                    skipped.insert(specifier.clone());
                }
            }
        }

        let token = short_token(&blake3_bytes(
            format!("{manifest_hash}\n{}", wanted.iter().cloned().collect::<Vec<_>>().join("\n")).as_bytes(),
        ));
        let out_dir = self.cache_dir.join(format!("deps_{token}"));
        let entries = if resolved.is_empty() {
            BTreeMap::new()
        } else {
            self.bundle(&resolved, &out_dir, &token, &mut skipped).await?
        };

        let map = Arc::new(PreBundleMap {
            manifest_hash,
            token,
            out_dir,
            entries,
            skipped,
        });
        self.persist(&map);
        self.remove_stale_outputs(&map.out_dir);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = map.clone();

        info!(
            bundled = map.entries.len(),
            skipped = map.skipped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pre-bundle finished"
        );
        Ok(map)
    }

    async fn bundle(
        &self,
        resolved: &BTreeMap<String, ResolvedEntryPoint>,
        out_dir: &Path,
        token: &str,
        skipped: &mut BTreeSet<String>,
    ) -> Result<BTreeMap<String, PreBundledEntry>, PreBundleError> {
        let io_err = |source| PreBundleError::Io {
            path: out_dir.to_path_buf(),
            source,
        };
        if out_dir.exists() {
            tokio::fs::remove_dir_all(out_dir).await.map_err(io_err)?;
        }
        tokio::fs::create_dir_all(out_dir).await.map_err(io_err)?;

        let stems = unique_stems(resolved.keys());
        let job = BundleJob {
            root: self.root.clone(),
            out_dir: out_dir.to_path_buf(),
            entries: resolved
                .iter()
                .map(|(spec, entry)| (stems[spec].clone(), entry.path.clone()))
                .collect(),
        };
        self.bundler.bundle(&job).await?;

        let mut entries = BTreeMap::new();
        for (specifier, entry) in resolved {
            let file = format!("{}.js", stems[specifier]);
            let path = out_dir.join(&file);
            let Ok(code) = tokio::fs::read_to_string(&path).await else {
                warn!(specifier = %specifier, path = %path.display(), "bundler produced no output for entry");
                skipped.insert(specifier.clone());
                continue;
            };
            if let Some(repaired) = shim::repair_named_exports(&code, &entry.path) {
                atomic_write(&path, repaired.as_bytes()).map_err(|source| PreBundleError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
            entries.insert(
                specifier.clone(),
                PreBundledEntry {
                    url: format!("{DEPS_URL_PREFIX}{file}?v={token}"),
                    file,
                    source: entry.path.clone(),
                    strategy: entry.strategy,
                },
            );
        }
        Ok(entries)
    }

    fn persist(&self, map: &PreBundleMap) {
        let path = self.cache_dir.join(METADATA_FILE);
        let result = serde_json::to_vec_pretty(map)
            .map_err(std::io::Error::other)
            .and_then(|bytes| atomic_write(&path, &bytes));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "cannot write pre-bundle metadata");
        }
    }

    fn remove_stale_outputs(&self, keep: &Path) {
        let Ok(dir) = std::fs::read_dir(&self.cache_dir) else {
            return;
        };
        for entry in dir.flatten() {
            let path = entry.path();
            let stale = path != keep
                && path.is_dir()
                && entry.file_name().to_str().is_some_and(|n| n.starts_with("deps_"));
            if stale {
                if let Err(err) = std::fs::remove_dir_all(&path) {
                    debug!(path = %path.display(), error = %err, "cannot remove stale pre-bundle output");
                }
            }
        }
    }

    /// Bare specifiers reachable from `entries` through relative imports.
    ///
    /// Files are parsed with the scanner; unreadable or unparsable files are skipped.
    #[must_use]
    pub fn discover(&self, entries: &[PathBuf]) -> BTreeSet<String> {
        use crate::compiler::ParseSyntax;
        use crate::dev::scan::scan_module;
        use crate::resolver::is_bare_specifier;

        let mut found = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut queue: Vec<PathBuf> = entries.to_vec();

        while let Some(path) = queue.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            let Ok(source) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(scan) = scan_module(&source, ParseSyntax::from_path(&path)) else {
                debug!(path = %path.display(), "skipping unparsable file during discovery");
                continue;
            };
            if scan.has_computed_import {
                debug!(path = %path.display(), "computed dynamic import, its dependencies are found on request");
            }
            let dir = path.parent().unwrap_or(Path::new("/"));
            for spec in scan.specifiers {
                if is_bare_specifier(&spec.value) {
                    if self.should_prebundle(&spec.value) {
                        found.insert(spec.value);
                    }
                } else if spec.value.starts_with("./") || spec.value.starts_with("../") {
                    if let Some(next) = probe_source(&dir.join(&spec.value)) {
                        queue.push(next);
                    }
                }
            }
        }
        found
    }
}

/// Extensions tried for extensionless relative imports during discovery.
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "mts"];

fn probe_source(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    let file = base.file_name()?.to_string_lossy().into_owned();
    SOURCE_EXTENSIONS
        .iter()
        .map(|ext| base.with_file_name(format!("{file}.{ext}")))
        .chain(SOURCE_EXTENSIONS.iter().map(|ext| base.join(format!("index.{ext}"))))
        .find(|p| p.is_file())
}

/// Hash of the root's dependency manifest files.
#[must_use]
pub fn manifest_hash(root: &Path) -> String {
    let paths: Vec<PathBuf> = MANIFEST_FILES.iter().map(|f| root.join(f)).collect();
    let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
    blake3_files(&refs).unwrap_or_else(|err| {
        warn!(root = %root.display(), error = %err, "cannot hash dependency manifest");
        String::new()
    })
}

/// Output file stem for a specifier: `@scope/pkg/sub` → `@scope__pkg__sub`.
#[must_use]
pub fn safe_name(specifier: &str) -> String {
    let (prefix, rest) = match specifier.strip_prefix('@') {
        Some(rest) => ("@", rest),
        None => ("", specifier),
    };
    let body: String = rest
        .replace('/', "__")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect();
    format!("{prefix}{body}")
}

/// [`safe_name`] per specifier, with a numeric suffix on stems already taken.
fn unique_stems<'a>(specifiers: impl Iterator<Item = &'a String>) -> BTreeMap<&'a String, String> {
    let mut taken = BTreeSet::new();
    let mut stems = BTreeMap::new();
    for specifier in specifiers {
        let base = safe_name(specifier);
        let mut stem = base.clone();
        let mut n = 2;
        while !taken.insert(stem.clone()) {
            stem = format!("{base}-{n}");
            n += 1;
        }
        stems.insert(specifier, stem);
    }
    stems
}

fn short_token(hash: &str) -> String {
    hash.chars().take(TOKEN_LEN).collect()
}

fn load_metadata(cache_dir: &Path, manifest_hash: &str) -> Option<PreBundleMap> {
    let bytes = std::fs::read(cache_dir.join(METADATA_FILE)).ok()?;
    let map: PreBundleMap = serde_json::from_slice(&bytes).ok()?;
    if map.manifest_hash != manifest_hash || !map.files_exist() {
        debug!("persisted pre-bundle metadata is stale");
        return None;
    }
    info!(count = map.entries.len(), "reusing persisted pre-bundle");
    Some(map)
}
