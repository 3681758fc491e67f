use thiserror::Error;

use crate::core::{DecodeError, EncodeError, InvalidId, MetadataError};
use crate::journal::{JournalError, MdStoreError, OrdinalLogError};

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Log(#[from] OrdinalLogError),

    #[error(transparent)]
    Store(#[from] MdStoreError),
}

impl Error {
    /// True when the operation failed because a merged revision was offered
    /// to a journal that has forked; callers retry with an unmerged revision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Journal(JournalError::Conflict))
    }
}
