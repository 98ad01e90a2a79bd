//! Protocol error types.

use thiserror::Error;

/// Errors raised while building or transporting expression trees.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A builder method was applied to an expression it cannot wrap.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}
