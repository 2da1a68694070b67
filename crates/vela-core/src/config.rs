//! Resolved configuration consumed by the dev engine.
//!
//! Loaded from `vela.config.json` at the project root:
//!
//! ```json
//! {
//!   "entry": ["src/main.tsx"],
//!   "plugins": [{ "name": "define", "options": { "__APP_VERSION__": "\"1.0.0\"" } }],
//!   "prebundle": { "include": ["react-dom/client"], "exclude": ["fsevents"] },
//!   "server": { "port": 3000, "proxy": { "/api": "http://localhost:8080" } }
//! }
//! ```

use crate::dev::transform::Framework;
use crate::error::Error;
use crate::resolver::package_name_from_specifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the project root.
pub const CONFIG_FILE: &str = "vela.config.json";

/// Top-level dev configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevConfig {
    /// Project root. Relative values are resolved against the config file's directory.
    pub root: PathBuf,
    /// Entry modules, relative to `root`. Used to discover dependencies up front.
    pub entry: Vec<String>,
    /// Built-in plugin instances.
    pub plugins: Vec<PluginConfig>,
    pub prebundle: PrebundleConfig,
    pub server: ServerConfig,
    /// Overrides framework detection from `package.json`.
    pub framework: Option<Framework>,
}

/// One entry of `plugins[]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrebundleConfig {
    pub enabled: bool,
    /// Specifiers always pre-bundled, even if never seen in source.
    pub include: Vec<String>,
    /// Specifiers never pre-bundled; they are served through `/@modules/`.
    pub exclude: Vec<String>,
    /// Relative to `root`.
    pub cache_dir: PathBuf,
}

impl PrebundleConfig {
    /// Whether `specifier` should go through the pre-bundler. An exclude entry
    /// matches the exact specifier or its whole package.
    #[must_use]
    pub fn should_prebundle(&self, specifier: &str) -> bool {
        let package = package_name_from_specifier(specifier);
        self.enabled && !self.exclude.iter().any(|e| e == specifier || *e == package)
    }
}

impl Default for PrebundleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include: Vec::new(),
            exclude: Vec::new(),
            cache_dir: PathBuf::from("node_modules/.vela"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// URL prefix (`/api`) to upstream base URL (`http://localhost:8080`).
    pub proxy: BTreeMap<String, String>,
    pub https: bool,
    pub open: bool,
    /// HMR debounce window in milliseconds.
    pub hmr_debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5173,
            host: "localhost".to_string(),
            proxy: BTreeMap::new(),
            https: false,
            open: false,
            hmr_debounce_ms: 30,
        }
    }
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entry: Vec::new(),
            plugins: Vec::new(),
            prebundle: PrebundleConfig::default(),
            server: ServerConfig::default(),
            framework: None,
        }
    }
}

impl DevConfig {
    /// Defaults rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Load `path`, falling back to defaults rooted at its directory if it does not exist.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(base));
            }
            Err(source) => {
                return Err(Error::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut config: Self = serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.root.is_relative() {
            config.root = base.join(&config.root);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.hmr_debounce_ms == 0 {
            return Err(Error::ConfigInvalid(
                "server.hmrDebounceMs must be greater than zero".to_string(),
            ));
        }
        for prefix in self.server.proxy.keys() {
            if !prefix.starts_with('/') {
                return Err(Error::ConfigInvalid(format!(
                    "proxy prefix `{prefix}` must start with `/`"
                )));
            }
        }
        Ok(())
    }

    /// Absolute pre-bundle cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.prebundle.cache_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = DevConfig::default();
        assert_eq!(config.server.port, 5173);
        assert_eq!(config.server.host, "localhost");
        assert!(config.prebundle.enabled);
        assert_eq!(config.server.hmr_debounce_ms, 30);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = DevConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.root, dir.path());
        assert!(config.entry.is_empty());
    }

    #[test]
    fn test_load_camel_case_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{
                "entry": ["src/main.tsx"],
                "framework": "react",
                "plugins": [{ "name": "define", "options": { "__DEV__": "true" } }],
                "prebundle": { "exclude": ["fsevents"], "cacheDir": ".cache/deps" },
                "server": { "port": 3000, "hmrDebounceMs": 50, "proxy": { "/api": "http://localhost:8080" } }
            }"#,
        )
        .unwrap();

        let config = DevConfig::load(&path).unwrap();
        assert_eq!(config.root, dir.path().join("."));
        assert_eq!(config.entry, vec!["src/main.tsx"]);
        assert_eq!(config.framework, Some(Framework::React));
        assert_eq!(config.plugins[0].options["__DEV__"], "true");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.hmr_debounce_ms, 50);
        assert_eq!(config.cache_dir(), dir.path().join(".").join(".cache/deps"));
        assert!(!config.prebundle.should_prebundle("fsevents"));
        assert!(!config.prebundle.should_prebundle("fsevents/lib"));
        assert!(config.prebundle.should_prebundle("react"));
    }

    #[test]
    fn test_load_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let err = DevConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_proxy_prefix() {
        let mut config = DevConfig::default();
        config
            .server
            .proxy
            .insert("api".to_string(), "http://localhost:8080".to_string());
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }
}
