#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for vela.
//!
//! Pure helpers with no logging dependencies; callers decide what to trace.

pub mod fs;
pub mod hash;
