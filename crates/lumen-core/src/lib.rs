//! # Lumen Core
//!
//! Core types, traits, and error definitions shared by the connection pool
//! and the cache tiers.

pub mod error;
pub mod result;
pub mod telemetry;
pub mod traits;

pub use error::*;
pub use result::*;
pub use traits::*;
