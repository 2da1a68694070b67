//! On-demand development pipeline.
//!
//! Serves individual ES modules instead of a bundle. Each request runs
//! resolve → transform → rewrite, with results cached until the source file
//! changes; third-party packages are pre-bundled once per dependency manifest.

pub mod accel;
pub mod cache;
pub mod cjs;
pub mod edit;
pub mod hmr;
pub mod plugin;
pub mod prebundle;
pub mod ready;
pub mod request;
pub mod rewrite;
pub mod scan;
pub mod transform;

pub use accel::{NativeAccelerator, NoopAccelerator};
pub use cache::{CacheKey, TransformCache};
pub use hmr::{HmrBroadcaster, HmrPayload, HmrThrottle, HmrUpdate, UpdateKind};
pub use plugin::{Plugin, PluginContainer, PluginError};
pub use prebundle::{DependencyBundler, EsbuildBundler, PreBundleMap, PreBundler};
pub use ready::wait_until_ready;
pub use request::{DevResponse, RequestRouter};
pub use rewrite::ImportRewriter;
pub use transform::{
    Framework, FrameworkRouter, ModuleFormat, Platform, TransformError, TransformRequest,
    TransformResult, TransformTarget,
};
