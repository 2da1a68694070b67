//! Entry-point resolution for bare package specifiers.
//!
//! Strategies are tried in a fixed order and the first one that lands on an
//! existing file wins:
//!
//! 1. the export map (`exports`), using browser/import conditions
//! 2. the root `module` field
//! 3. the root `main` field, with Node's extension and index probing
//! 4. a direct probe of the subpath (or `index.js`) under the package directory

use super::exports::{read_package_json, resolve_exports, Conditions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions probed after a path without one, in order.
const PROBE_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".json"];

/// Index files probed inside a directory, in order.
const INDEX_FILES: &[&str] = &["index.js", "index.mjs", "index.cjs", "index.json"];

/// How an entry point was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    ExportMap,
    ModuleField,
    MainField,
    DirectFile,
}

/// A bare specifier mapped to a concrete file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntryPoint {
    pub specifier: String,
    pub path: PathBuf,
    pub strategy: ResolutionStrategy,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("`{specifier}` is not a bare package specifier")]
    NotBare { specifier: String },

    #[error("package `{package}` not found in any node_modules above {from}")]
    PackageNotFound { package: String, from: PathBuf },

    #[error("package.json of `{package}` could not be read or parsed")]
    InvalidManifest { package: String },

    #[error("no entry point found for `{specifier}` in {package_dir}")]
    NoEntry {
        specifier: String,
        package_dir: PathBuf,
    },
}

/// Resolves bare specifiers against the `node_modules` tree above a root.
#[derive(Debug, Clone)]
pub struct PackageResolver {
    root: PathBuf,
}

impl PackageResolver {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate the installed directory of `package`, walking up from the root.
    #[must_use]
    pub fn find_package_dir(&self, package: &str) -> Option<PathBuf> {
        self.root
            .ancestors()
            .map(|dir| dir.join("node_modules").join(package))
            .find(|candidate| candidate.join("package.json").is_file())
    }

    /// Resolve `specifier` (`pkg`, `pkg/sub`, `@scope/pkg/sub`) to its entry file.
    pub fn resolve(&self, specifier: &str) -> Result<ResolvedEntryPoint, ResolveError> {
        if !is_bare_specifier(specifier) {
            return Err(ResolveError::NotBare {
                specifier: specifier.to_string(),
            });
        }

        let (package, subpath) = split_specifier(specifier);
        let package_dir =
            self.find_package_dir(&package)
                .ok_or_else(|| ResolveError::PackageNotFound {
                    package: package.clone(),
                    from: self.root.clone(),
                })?;
        let manifest = read_package_json(&package_dir.join("package.json"))
            .ok_or_else(|| ResolveError::InvalidManifest {
                package: package.clone(),
            })?;

        let found = resolve_in_package(&package_dir, &manifest, subpath.as_deref());
        match found {
            Some((path, strategy)) => Ok(ResolvedEntryPoint {
                specifier: specifier.to_string(),
                path: dunce::canonicalize(&path).unwrap_or(path),
                strategy,
            }),
            None => Err(ResolveError::NoEntry {
                specifier: specifier.to_string(),
                package_dir,
            }),
        }
    }
}

fn resolve_in_package(
    package_dir: &Path,
    manifest: &Value,
    subpath: Option<&str>,
) -> Option<(PathBuf, ResolutionStrategy)> {
    if manifest.get("exports").is_some() {
        if let Some(target) = resolve_exports(manifest, subpath, Conditions::BROWSER_IMPORT) {
            let path = package_dir.join(target.trim_start_matches("./"));
            if path.is_file() {
                return Some((path, ResolutionStrategy::ExportMap));
            }
        }
    }

    match subpath {
        None => {
            if let Some(module) = manifest.get("module").and_then(Value::as_str) {
                if let Some(path) = probe_file(&package_dir.join(module)) {
                    return Some((path, ResolutionStrategy::ModuleField));
                }
            }
            if let Some(main) = manifest.get("main").and_then(Value::as_str) {
                let main_path = package_dir.join(main);
                if let Some(path) = probe_file(&main_path).or_else(|| probe_index(&main_path)) {
                    return Some((path, ResolutionStrategy::MainField));
                }
            }
            probe_index(package_dir).map(|p| (p, ResolutionStrategy::DirectFile))
        }
        Some(sub) => {
            let target = package_dir.join(sub.trim_start_matches("./"));
            probe_file(&target)
                .or_else(|| probe_nested_package(&target))
                .or_else(|| probe_index(&target))
                .map(|p| (p, ResolutionStrategy::DirectFile))
        }
    }
}

fn probe_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let base = path.to_string_lossy();
    PROBE_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("{base}{ext}")))
        .find(|candidate| candidate.is_file())
}

fn probe_index(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    INDEX_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Subpath directories that carry their own package.json (`react-dom/client` style).
fn probe_nested_package(dir: &Path) -> Option<PathBuf> {
    let manifest = read_package_json(&dir.join("package.json"))?;
    ["module", "main"]
        .iter()
        .filter_map(|field| manifest.get(*field).and_then(Value::as_str))
        .find_map(|entry| probe_file(&dir.join(entry)))
}

/// True for specifiers that name a package rather than a path, URL or virtual module.
#[must_use]
pub fn is_bare_specifier(specifier: &str) -> bool {
    !specifier.is_empty()
        && !specifier.starts_with('.')
        && !specifier.starts_with('/')
        && !specifier.starts_with('\0')
        && !specifier.starts_with('#')
        && !specifier.contains(':')
}

/// Package name of a specifier: `@scope/pkg/x` → `@scope/pkg`, `pkg/x` → `pkg`.
#[must_use]
pub fn package_name_from_specifier(specifier: &str) -> String {
    split_specifier(specifier).0
}

/// Split a bare specifier into the package name and an optional `./subpath`.
#[must_use]
pub fn split_specifier(specifier: &str) -> (String, Option<String>) {
    let segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut parts = specifier.splitn(segments + 1, '/');
    let name: Vec<&str> = parts.by_ref().take(segments).collect();
    let rest = parts.next().filter(|s| !s.is_empty());
    (name.join("/"), rest.map(|s| format!("./{s}")))
}
