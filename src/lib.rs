#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod journal;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::config::JournalOptions;
pub use crate::core::{
    BareRootMetadata, BlockChanges, BlockPointer, BlockSplitter, BranchId, DecodeError,
    DeviceSigner, EncodeError, EncryptError, ImmutableRootMetadata, InvalidId, MdId, MergeStatus,
    MetadataError, PrivateDataEncryptor, PrivateMetadata, Revision, RootMetadata,
    RootMetadataSigned, Sha256, SignatureInfo, Signer, SuccessorError, TlfId, UserId,
    WriterMetadata, make_md_id, sha256_bytes, sign_md,
};
pub use crate::journal::{
    JournalError, MdCache, MdJournal, MdServer, MdStoreError, OrdinalLogError, ServerError,
    md_id_from_server,
};
