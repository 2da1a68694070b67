#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Development-time module engine for vela.
//!
//! Turns requested source files into browser-runnable modules, pre-bundles
//! third-party dependencies on first use and pushes file-change notifications
//! to connected clients.

pub mod compiler;
pub mod config;
pub mod dev;
pub mod error;
pub mod resolver;

pub use config::DevConfig;
pub use error::Error;

/// Crate version, reported by the CLI and the HMR handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
