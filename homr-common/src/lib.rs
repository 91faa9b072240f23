//! # HOMR Common Library
//!
//! Shared code for the HOMR prediction service crates:
//! - Configuration loading (TOML file, environment, compiled defaults)
//! - Root folder resolution
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
