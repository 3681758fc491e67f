//! Core capability errors (parsing, validation).
//!
//! These are bounded and stable: core errors represent domain/refusal states,
//! not library implementation details.

use thiserror::Error;

/// Invalid ID or content identifier.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("metadata id `{raw}` is invalid: {reason}")]
    Md { raw: String, reason: String },
    #[error("branch id `{raw}` is invalid: {reason}")]
    Branch { raw: String, reason: String },
    #[error("folder id `{raw}` is invalid: {reason}")]
    Tlf { raw: String, reason: String },
    #[error("user id `{raw}` is invalid: {reason}")]
    User { raw: String, reason: String },
    #[error("revision `{raw}` is invalid: {reason}")]
    Revision { raw: String, reason: String },
}
