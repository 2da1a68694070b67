//! Package resolution for third-party specifiers.
//!
//! `exports` implements the package.json export map; `package` layers the
//! entry-point priority (export map, `module`, `main`, direct file) on top.

mod exports;
mod package;

pub use exports::{
    read_package_json, resolve_exports, resolve_exports_pattern, resolve_exports_root,
    resolve_exports_subpath, Conditions,
};
pub use package::{
    is_bare_specifier, package_name_from_specifier, split_specifier, PackageResolver,
    ResolveError, ResolutionStrategy, ResolvedEntryPoint,
};
