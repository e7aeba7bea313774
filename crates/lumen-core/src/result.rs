//! Result type aliases for Lumen.

use crate::LumenError;

/// A specialized `Result` type for Lumen operations.
pub type LumenResult<T> = Result<T, LumenError>;
