//! # VortexFetch Common Library
//!
//! Shared code for the VortexFetch crates:
//! - Error and result types
//! - Configuration loading (TOML file, environment overrides, defaults)
//! - Root / download folder resolution

pub mod config;
pub mod error;

pub use config::TomlConfig;
pub use error::{Error, Result};
