//! Core domain types for the metadata journal
//!
//! Module hierarchy follows type dependency order:
//! - digest: content fingerprinting (Layer 0)
//! - identity: TlfId, BranchId, MdId, UserId (Layer 1)
//! - revision: metadata ordinals (Layer 1)
//! - crypto: device signatures (Layer 2)
//! - metadata: root metadata objects and their validation (Layer 3)
//! - codec: the canonical encoding every layer above hashes and signs (Layer 3)

pub mod codec;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod revision;

pub use codec::{
    DecodeError, EncodeError, codec_equal, decode_bare_md, decode_md_id, decode_signed_md,
    encode_bare_md, encode_md_id, encode_signed_md, encode_writer_metadata,
};
pub use crypto::{DeviceSigner, SignatureInfo, Signer};
pub use digest::{Sha256, sha256_bytes};
pub use error::InvalidId;
pub use identity::{BranchId, MdId, TlfId, UserId};
pub use metadata::{
    BareRootMetadata, BlockChanges, BlockPointer, BlockSplitter, EncryptError,
    ImmutableRootMetadata, MergeStatus, MetadataError, PrivateDataEncryptor, PrivateMetadata,
    RootMetadata, RootMetadataSigned, SuccessorError, WriterMetadata, make_md_id, sign_md,
};
pub use revision::{REVISION_NAME_WIDTH, Revision};
