//! Runtime error types

use crate::loader::LoadError;

/// Runtime error types
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("type {type_name} has no member {member}")]
    MissingMember { type_name: String, member: String },

    #[error("member {member} of type {type_name} is not callable")]
    NotCallable { type_name: String, member: String },

    /// An ownership/discovery invariant was violated. These indicate a
    /// programming error, never an expected runtime condition.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
