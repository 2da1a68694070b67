pub mod dev;
pub mod prebundle;

use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use vela_core::config::CONFIG_FILE;
use vela_core::dev::EsbuildBundler;
use vela_core::DevConfig;

/// Load `<root>/vela.config.json`, or `explicit` when given.
///
/// Returns the config and the file it was (or would have been) read from.
pub(crate) fn load_config(root: &Path, explicit: Option<&Path>) -> Result<(DevConfig, PathBuf)> {
    let root = dunce::canonicalize(root)
        .map_err(|source| vela_core::Error::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })
        .into_diagnostic()?;
    let path = explicit.map_or_else(|| root.join(CONFIG_FILE), |p| root.join(p));
    let mut config = DevConfig::load(&path).into_diagnostic()?;
    if explicit.is_none() {
        config.root = root;
    }
    Ok((config, path))
}

/// `esbuild` from the project or `PATH`. Without one, pre-bundling is turned
/// off and dependencies are served file by file.
pub(crate) fn locate_bundler(config: &mut DevConfig) -> EsbuildBundler {
    match EsbuildBundler::locate(&config.root) {
        Ok(bundler) => bundler,
        Err(err) => {
            tracing::warn!(error = %err, "pre-bundling disabled");
            config.prebundle.enabled = false;
            EsbuildBundler::new("esbuild")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_defaults_to_root() {
        let dir = TempDir::new().unwrap();
        let (config, path) = load_config(dir.path(), None).unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        assert_eq!(config.root, root);
        assert_eq!(path, root.join(CONFIG_FILE));
    }

    #[test]
    fn test_load_config_explicit_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("conf")).unwrap();
        std::fs::write(
            dir.path().join("conf/dev.json"),
            r#"{ "root": "..", "server": { "port": 4000 } }"#,
        )
        .unwrap();

        let (config, path) = load_config(dir.path(), Some(Path::new("conf/dev.json"))).unwrap();
        assert_eq!(config.server.port, 4000);
        assert!(path.ends_with("conf/dev.json"));
        assert_eq!(dunce::canonicalize(&config.root).unwrap(), dunce::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(&dir.path().join("nope"), None).is_err());
    }
}
