//! # Lumen Resilience
//!
//! Resilience patterns for the pooling and caching layer.
//! Provides retry policies and timeouts.

pub mod retry;
pub mod timeout;

pub use retry::*;
pub use timeout::*;
