//! # Lumen Config
//!
//! Configuration management for the pooling and caching layer.
//! Supports layered configuration from files, environment variables,
//! and runtime refresh.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
