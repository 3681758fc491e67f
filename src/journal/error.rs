//! Journal capability errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{
    BranchId, DecodeError, EncodeError, EncryptError, MdId, MergeStatus, MetadataError, Revision,
    SuccessorError, UserId,
};

use super::md_store::MdStoreError;
use super::ordinal_log::OrdinalLogError;
use super::ServerError;

/// Errors surfaced by the journal coordinator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    /// A merged revision was offered to a journal that has forked. Expected
    /// retry path: the caller marks the revision unmerged and puts again.
    #[error("metadata journal conflict: merged revision offered to a forked journal")]
    Conflict,

    #[error("{uid} is not authorized for this folder")]
    Unauthorized { uid: UserId },

    #[error("metadata id mismatch: expected {expected}, got {got}")]
    MdIdMismatch { expected: MdId, got: MdId },

    #[error("branch id mismatch: expected {expected}, got {got}")]
    BranchMismatch { expected: BranchId, got: BranchId },

    #[error("merge status {status} does not match branch {branch_id}")]
    MergeStatusMismatch {
        status: MergeStatus,
        branch_id: BranchId,
    },

    #[error("unmerged revision offered with no branch context")]
    UnmergedPutWithoutBranch,

    #[error("journal is already on branch {bid}")]
    AlreadyBranched { bid: BranchId },

    #[error("cannot clear the merged trunk")]
    ClearNullBranch,

    #[error("journal unexpectedly empty")]
    UnexpectedlyEmpty,

    #[error("flushed entry mismatch: expected {expected}, got {got}")]
    FlushedEntryMismatch { expected: MdId, got: MdId },

    #[error("flushed revision does not match the earliest journal entry")]
    FlushedPayloadMismatch,

    #[error("revision {got} stored at ordinal {expected}")]
    RevisionOutOfPlace { expected: Revision, got: Revision },

    #[error("block changes are embedded but should not be")]
    EmbeddedBlockChanges,

    #[error("corrupt journal: {reason}")]
    Corrupt { reason: String },

    #[error("server returned {count} revisions for {revision}")]
    AmbiguousServerRevision { revision: Revision, count: usize },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Successor(#[from] SuccessorError),

    #[error(transparent)]
    Encrypt(#[from] EncryptError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Log(#[from] OrdinalLogError),

    #[error(transparent)]
    Store(#[from] MdStoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl JournalError {
    /// True when the caller should retry with an unmerged revision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, JournalError::Conflict)
    }

    /// True when the underlying content file is absent. Meaningful inside
    /// `put_md`, which distinguishes "already present" from "must write".
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, JournalError::Store(MdStoreError::NotFound { .. }))
    }
}
