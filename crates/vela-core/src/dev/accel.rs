//! Native acceleration seam.
//!
//! An accelerator may answer transforms from its own dependency graph and
//! report which files a change affects. It is an optimization only: the
//! request router treats `None` from [`NativeAccelerator::process_file`] as a
//! miss and runs the regular pipeline.

use super::transform::TransformResult;
use std::path::{Path, PathBuf};

pub trait NativeAccelerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Precomputed transform for `path`, if the accelerator has one.
    fn process_file(&self, path: &Path) -> Option<TransformResult>;

    fn invalidate(&self, path: &Path);

    /// Files whose output depends on `path`, `path` included.
    fn rebuild(&self, path: &Path) -> Vec<PathBuf>;
}

/// Accelerator that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccelerator;

impl NativeAccelerator for NoopAccelerator {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn process_file(&self, _path: &Path) -> Option<TransformResult> {
        None
    }

    fn invalidate(&self, _path: &Path) {}

    fn rebuild(&self, path: &Path) -> Vec<PathBuf> {
        vec![path.to_path_buf()]
    }
}
