//! # Lumen Server Library
//!
//! Wires the connection pool and cache tiers together from configuration
//! and provides startup utilities for the `lumen-server` binary.

pub mod app;
pub mod startup;

pub use app::AppServices;
