//! `esbuild` as the dependency bundler, run as a child process.

use super::{BundleError, BundleJob, DependencyBundler};
use futures::future::BoxFuture;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Shared chunk file names. Package names cannot start with `_`, so these
/// never collide with entry files.
pub const CHUNK_NAMES: &str = "_chunk-[hash]";

#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: PathBuf,
}

impl EsbuildBundler {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Find `esbuild` in the project's `node_modules/.bin`, then on `PATH`.
    pub fn locate(root: &Path) -> Result<Self, BundleError> {
        let local = root.join("node_modules").join(".bin").join(binary_name());
        if local.is_file() {
            return Ok(Self::new(local));
        }
        which::which("esbuild")
            .map(Self::new)
            .map_err(|_| BundleError::NotFound("esbuild".to_string()))
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(job: &BundleJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--bundle",
            "--format=esm",
            "--splitting",
            "--platform=browser",
            "--target=es2020",
            "--log-level=warning",
            "--define:process.env.NODE_ENV=\"development\"",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(format!("--chunk-names={CHUNK_NAMES}").into());

        let mut outdir = OsString::from("--outdir=");
        outdir.push(job.out_dir.as_os_str());
        args.push(outdir);

        for (stem, entry) in &job.entries {
            let mut arg = OsString::from(format!("{stem}="));
            arg.push(entry.as_os_str());
            args.push(arg);
        }
        args
    }
}

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "esbuild.cmd"
    } else {
        "esbuild"
    }
}

impl DependencyBundler for EsbuildBundler {
    fn name(&self) -> &'static str {
        "esbuild"
    }

    fn bundle<'a>(&'a self, job: &'a BundleJob) -> BoxFuture<'a, Result<(), BundleError>> {
        Box::pin(async move {
            let args = Self::args(job);
            debug!(program = %self.program.display(), entries = job.entries.len(), "running esbuild");

            let output = Command::new(&self.program)
                .args(&args)
                .current_dir(&job.root)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(BundleError::Spawn)?;

            if !output.status.success() {
                return Err(BundleError::Failed {
                    status: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_args_name_entries_by_stem() {
        let job = BundleJob {
            root: PathBuf::from("/p"),
            out_dir: PathBuf::from("/p/node_modules/.vela/deps_ab12cd34"),
            entries: BTreeMap::from([
                ("react".to_string(), PathBuf::from("/p/node_modules/react/index.js")),
                ("@scope__ui".to_string(), PathBuf::from("/p/node_modules/@scope/ui/dist/index.mjs")),
            ]),
        };
        let args: Vec<String> = EsbuildBundler::args(&job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--splitting".to_string()));
        assert!(args.contains(&"--format=esm".to_string()));
        assert!(args.contains(&"--chunk-names=_chunk-[hash]".to_string()));
        assert!(args.contains(&"--outdir=/p/node_modules/.vela/deps_ab12cd34".to_string()));
        assert!(args.contains(&"react=/p/node_modules/react/index.js".to_string()));
        assert!(args.contains(&"@scope__ui=/p/node_modules/@scope/ui/dist/index.mjs".to_string()));
    }

    #[test]
    fn test_locate_prefers_project_binary() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("node_modules/.bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(binary_name()), "").unwrap();

        let bundler = EsbuildBundler::locate(dir.path()).unwrap();
        assert_eq!(bundler.program(), bin.join(binary_name()));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let bundler = EsbuildBundler::new(dir.path().join("no-such-esbuild"));
        let job = BundleJob {
            root: dir.path().to_path_buf(),
            out_dir: dir.path().join("out"),
            entries: BTreeMap::new(),
        };

        let err = bundler.bundle(&job).await.unwrap_err();
        assert!(matches!(err, BundleError::Spawn(_)));
    }
}
