//! Root metadata objects for a journaled folder.
//!
//! `RootMetadata` is the in-memory candidate a caller builds for the next
//! revision: header fields plus the plaintext private payload. Committing it
//! encrypts the payload and seals the writer-signed portion into a
//! `BareRootMetadata`, the storable form. `ImmutableRootMetadata` pairs a
//! stored object with its content fingerprint and local timestamp and is
//! never mutated again.
//!
//! The writer signature covers only `WriterMetadata`; `prev_root` and
//! `revision` live outside it so branch conversion can re-chain entries
//! without invalidating previously flushed signatures beyond the re-signed
//! writer portion.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use ed25519_dalek::{SignatureError, VerifyingKey};
use thiserror::Error;

use super::codec::{self, EncodeError};
use super::crypto::{SignatureInfo, Signer};
use super::digest::sha256_bytes;
use super::identity::{BranchId, MdId, TlfId, UserId};
use super::revision::Revision;

/// Whether a revision belongs to the merged trunk or a local fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStatus {
    Merged,
    Unmerged,
}

impl MergeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeStatus::Merged => "merged",
            MergeStatus::Unmerged => "unmerged",
        }
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an out-of-band block holding unembedded block changes.
///
/// The journal never dereferences it; a zero pointer means the change list
/// is embedded in the private payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockPointer([u8; 32]);

impl BlockPointer {
    pub const ZERO: BlockPointer = BlockPointer([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Block change list attached to a revision, embedded or referenced.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockChanges {
    pub info: BlockPointer,
    pub ops: Bytes,
}

/// Plaintext private payload of an in-memory revision.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PrivateMetadata {
    pub changes: BlockChanges,
    pub payload: Bytes,
}

/// Decides whether a revision's block changes are small enough to embed.
pub trait BlockSplitter {
    fn should_embed_block_changes(&self, changes: &BlockChanges) -> bool;
}

/// Encrypts the private payload for storage; implemented by the caller's
/// key manager.
pub trait PrivateDataEncryptor {
    fn encrypt_private_data(
        &self,
        private: &PrivateMetadata,
        uid: &UserId,
    ) -> Result<Bytes, EncryptError>;
}

#[derive(Debug, Error)]
#[error("private data encryption failed: {source}")]
pub struct EncryptError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl EncryptError {
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
        }
    }
}

/// The writer-signed portion of a stored revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterMetadata {
    pub tlf_id: TlfId,
    pub branch_id: BranchId,
    pub merge_status: MergeStatus,
    pub writers: Vec<UserId>,
    pub last_modifying_writer: UserId,
    pub rekey: bool,
    pub encrypted_private: Bytes,
}

/// Structural or cryptographic defect in a metadata object.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetadataError {
    #[error("revision {got} is not a valid revision")]
    InvalidRevision { got: Revision },
    #[error("merge status {status} does not match branch {branch_id}")]
    BranchStatusMismatch {
        status: MergeStatus,
        branch_id: BranchId,
    },
    #[error("metadata has no writers")]
    NoWriters,
    #[error("writer signature invalid")]
    SignatureInvalid(#[source] SignatureError),
    #[error("last modifier mismatch: expected {expected}, got {got}")]
    LastModifierMismatch { expected: UserId, got: UserId },
    #[error("last modifier verifying key mismatch")]
    LastModifierKeyMismatch,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Violation of the append-successor rules.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuccessorError {
    #[error("revision gap: expected {expected}, got {got}")]
    RevisionGap { expected: Revision, got: Revision },
    #[error("prev root mismatch: expected {expected}, got {got}")]
    PrevRootMismatch { expected: MdId, got: MdId },
    #[error("folder mismatch: expected {expected}, got {got}")]
    TlfMismatch { expected: TlfId, got: TlfId },
}

/// A storable, writer-signed revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BareRootMetadata {
    pub writer_md: WriterMetadata,
    pub writer_sig: SignatureInfo,
    pub revision: Revision,
    pub prev_root: MdId,
    pub readers: Vec<UserId>,
    pub last_modifying_user: UserId,
}

impl BareRootMetadata {
    /// Seal a candidate revision: attach the encrypted payload and sign the
    /// writer portion with the current device key.
    pub fn seal(
        rmd: &RootMetadata,
        encrypted_private: Bytes,
        signer: &dyn Signer,
    ) -> Result<Self, EncodeError> {
        let writer_md = WriterMetadata {
            tlf_id: rmd.tlf_id,
            branch_id: rmd.branch_id,
            merge_status: rmd.merge_status,
            writers: rmd.writers.clone(),
            last_modifying_writer: rmd.last_modifying_writer.clone(),
            rekey: rmd.rekey,
            encrypted_private,
        };
        let writer_sig = signer.sign(&codec::encode_writer_metadata(&writer_md)?);
        Ok(Self {
            writer_md,
            writer_sig,
            revision: rmd.revision,
            prev_root: rmd.prev_root,
            readers: rmd.readers.clone(),
            last_modifying_user: rmd.last_modifying_writer.clone(),
        })
    }

    pub fn tlf_id(&self) -> TlfId {
        self.writer_md.tlf_id
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn branch_id(&self) -> BranchId {
        self.writer_md.branch_id
    }

    pub fn prev_root(&self) -> MdId {
        self.prev_root
    }

    pub fn merge_status(&self) -> MergeStatus {
        self.writer_md.merge_status
    }

    pub fn writers(&self) -> &[UserId] {
        &self.writer_md.writers
    }

    pub fn readers(&self) -> &[UserId] {
        &self.readers
    }

    /// Canonical bytes covered by the writer signature.
    pub fn serialized_writer_metadata(&self) -> Result<Vec<u8>, EncodeError> {
        codec::encode_writer_metadata(&self.writer_md)
    }

    /// Structural checks plus strict verification of the writer signature.
    pub fn is_valid_and_signed(&self) -> Result<(), MetadataError> {
        if !self.revision.is_initialized() {
            return Err(MetadataError::InvalidRevision { got: self.revision });
        }
        let merged = self.merge_status() == MergeStatus::Merged;
        if merged != self.branch_id().is_null() {
            return Err(MetadataError::BranchStatusMismatch {
                status: self.merge_status(),
                branch_id: self.branch_id(),
            });
        }
        if self.writer_md.writers.is_empty() {
            return Err(MetadataError::NoWriters);
        }
        let bytes = self.serialized_writer_metadata()?;
        self.writer_sig
            .verify(&bytes)
            .map_err(MetadataError::SignatureInvalid)
    }

    /// Check that this object was produced by the given user on the device
    /// holding the given verifying key.
    pub fn is_last_modified_by(
        &self,
        uid: &UserId,
        key: &VerifyingKey,
    ) -> Result<(), MetadataError> {
        if &self.last_modifying_user != uid {
            return Err(MetadataError::LastModifierMismatch {
                expected: uid.clone(),
                got: self.last_modifying_user.clone(),
            });
        }
        if &self.writer_md.last_modifying_writer != uid {
            return Err(MetadataError::LastModifierMismatch {
                expected: uid.clone(),
                got: self.writer_md.last_modifying_writer.clone(),
            });
        }
        if self.writer_sig.verifying_key() != key {
            return Err(MetadataError::LastModifierKeyMismatch);
        }
        Ok(())
    }

    pub fn is_writer(&self, uid: &UserId) -> bool {
        self.writer_md.writers.contains(uid)
    }

    pub fn is_reader(&self, uid: &UserId) -> bool {
        self.is_writer(uid) || self.readers.contains(uid)
    }

    /// Whether `uid` may put `next` on top of this head: either a listed
    /// writer, or a reader performing a rekey that leaves the writer list
    /// untouched.
    pub fn is_writer_or_valid_rekey(&self, uid: &UserId, next: &RootMetadata) -> bool {
        if self.is_writer(uid) {
            return true;
        }
        next.rekey && next.writers == self.writer_md.writers && self.is_reader(uid)
    }

    /// Successor predicate: `next` must directly follow this head, whose
    /// fingerprint is `self_id`.
    pub fn check_valid_successor(
        &self,
        self_id: MdId,
        next: &RootMetadata,
    ) -> Result<(), SuccessorError> {
        if next.revision != self.revision.next() {
            return Err(SuccessorError::RevisionGap {
                expected: self.revision.next(),
                got: next.revision,
            });
        }
        if next.prev_root != self_id {
            return Err(SuccessorError::PrevRootMismatch {
                expected: self_id,
                got: next.prev_root,
            });
        }
        if next.tlf_id != self.tlf_id() {
            return Err(SuccessorError::TlfMismatch {
                expected: self.tlf_id(),
                got: next.tlf_id,
            });
        }
        Ok(())
    }

    // Mutation surface used only by branch conversion.

    pub fn set_unmerged(&mut self) {
        self.writer_md.merge_status = MergeStatus::Unmerged;
    }

    pub fn set_branch_id(&mut self, bid: BranchId) {
        self.writer_md.branch_id = bid;
    }

    pub fn set_prev_root(&mut self, id: MdId) {
        self.prev_root = id;
    }

    pub fn set_writer_sig(&mut self, sig: SignatureInfo) {
        self.writer_sig = sig;
    }
}

/// Compute the content fingerprint of a storable revision.
pub fn make_md_id(md: &BareRootMetadata) -> Result<MdId, EncodeError> {
    let bytes = codec::encode_bare_md(md)?;
    Ok(MdId::from_digest(sha256_bytes(&bytes)))
}

/// An in-memory candidate for the next revision of a folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootMetadata {
    tlf_id: TlfId,
    revision: Revision,
    branch_id: BranchId,
    prev_root: MdId,
    merge_status: MergeStatus,
    writers: Vec<UserId>,
    readers: Vec<UserId>,
    last_modifying_writer: UserId,
    rekey: bool,
    private: PrivateMetadata,
}

impl RootMetadata {
    /// A merged trunk candidate. Branch fields start null; the unmerged
    /// setters below adjust them for fork-bound revisions.
    pub fn new(
        tlf_id: TlfId,
        revision: Revision,
        writers: Vec<UserId>,
        readers: Vec<UserId>,
        last_modifying_writer: UserId,
        private: PrivateMetadata,
    ) -> Self {
        Self {
            tlf_id,
            revision,
            branch_id: BranchId::NULL,
            prev_root: MdId::NULL,
            merge_status: MergeStatus::Merged,
            writers,
            readers,
            last_modifying_writer,
            rekey: false,
            private,
        }
    }

    pub fn tlf_id(&self) -> TlfId {
        self.tlf_id
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn prev_root(&self) -> MdId {
        self.prev_root
    }

    pub fn merge_status(&self) -> MergeStatus {
        self.merge_status
    }

    pub fn writers(&self) -> &[UserId] {
        &self.writers
    }

    pub fn readers(&self) -> &[UserId] {
        &self.readers
    }

    pub fn rekey(&self) -> bool {
        self.rekey
    }

    pub fn private(&self) -> &PrivateMetadata {
        &self.private
    }

    pub fn set_prev_root(&mut self, id: MdId) {
        self.prev_root = id;
    }

    pub fn set_branch_id(&mut self, bid: BranchId) {
        self.branch_id = bid;
    }

    pub fn set_unmerged(&mut self) {
        self.merge_status = MergeStatus::Unmerged;
    }

    pub fn set_rekey(&mut self, rekey: bool) {
        self.rekey = rekey;
    }
}

/// A revision committed to the content store: the stored object, its
/// fingerprint, and the content file's modification time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImmutableRootMetadata {
    md: BareRootMetadata,
    md_id: MdId,
    local_timestamp: SystemTime,
}

impl ImmutableRootMetadata {
    /// Panics on a null `md_id`; committed metadata always has a real
    /// fingerprint and a null one here is a caller bug.
    pub fn new(md: BareRootMetadata, md_id: MdId, local_timestamp: SystemTime) -> Self {
        assert!(
            !md_id.is_null(),
            "null md_id passed to ImmutableRootMetadata::new"
        );
        Self {
            md,
            md_id,
            local_timestamp,
        }
    }

    pub fn md(&self) -> &BareRootMetadata {
        &self.md
    }

    pub fn md_id(&self) -> MdId {
        self.md_id
    }

    pub fn local_timestamp(&self) -> SystemTime {
        self.local_timestamp
    }

    pub fn into_md(self) -> BareRootMetadata {
        self.md
    }
}

/// Wire form of a revision bound for the metadata server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootMetadataSigned {
    pub md: BareRootMetadata,
    pub sig_info: SignatureInfo,
}

impl RootMetadataSigned {
    /// Verify the outer signature over the canonical encoding of `md`.
    pub fn verify(&self) -> Result<(), MetadataError> {
        let bytes = codec::encode_bare_md(&self.md)?;
        self.sig_info
            .verify(&bytes)
            .map_err(MetadataError::SignatureInvalid)
    }
}

/// Sign a storable revision for the wire.
pub fn sign_md(md: BareRootMetadata, signer: &dyn Signer) -> Result<RootMetadataSigned, EncodeError> {
    let bytes = codec::encode_bare_md(&md)?;
    let sig_info = signer.sign(&bytes);
    Ok(RootMetadataSigned { md, sig_info })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::crypto::DeviceSigner;

    pub(crate) fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    pub(crate) fn test_signer() -> DeviceSigner {
        DeviceSigner::from_bytes(&[7u8; 32])
    }

    pub(crate) fn sample_root_md(rev: u64) -> RootMetadata {
        RootMetadata::new(
            TlfId::from_bytes([3u8; 16]),
            Revision::new(rev),
            vec![alice()],
            vec![UserId::new("bob").unwrap()],
            alice(),
            PrivateMetadata {
                changes: BlockChanges::default(),
                payload: Bytes::from_static(b"ops"),
            },
        )
    }

    pub(crate) fn sample_bare_md(rev: u64) -> BareRootMetadata {
        let rmd = sample_root_md(rev);
        BareRootMetadata::seal(&rmd, Bytes::from_static(b"sealed"), &test_signer()).unwrap()
    }

    #[test]
    fn seal_produces_valid_signed_metadata() {
        let md = sample_bare_md(1);
        md.is_valid_and_signed().unwrap();
        md.is_last_modified_by(&alice(), &test_signer().verifying_key())
            .unwrap();
    }

    #[test]
    fn tampered_writer_metadata_fails_verification() {
        let mut md = sample_bare_md(1);
        md.writer_md.rekey = true;
        assert!(matches!(
            md.is_valid_and_signed(),
            Err(MetadataError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn prev_root_is_outside_the_writer_signature() {
        let mut md = sample_bare_md(2);
        md.set_prev_root(MdId::from_digest(sha256_bytes(b"prev")));
        md.is_valid_and_signed().unwrap();
    }

    #[test]
    fn merged_with_branch_is_rejected() {
        let mut md = sample_bare_md(1);
        md.set_branch_id(BranchId::from_bytes([9u8; 16]));
        let wm = md.serialized_writer_metadata().unwrap();
        md.set_writer_sig(test_signer().sign(&wm));
        assert!(matches!(
            md.is_valid_and_signed(),
            Err(MetadataError::BranchStatusMismatch { .. })
        ));
    }

    #[test]
    fn uninitialized_revision_is_rejected() {
        let md = sample_bare_md(0);
        assert!(matches!(
            md.is_valid_and_signed(),
            Err(MetadataError::InvalidRevision { .. })
        ));
    }

    #[test]
    fn last_modifier_checks_uid_and_key() {
        let md = sample_bare_md(1);
        let carol = UserId::new("carol").unwrap();
        assert!(matches!(
            md.is_last_modified_by(&carol, &test_signer().verifying_key()),
            Err(MetadataError::LastModifierMismatch { .. })
        ));
        let other = DeviceSigner::from_bytes(&[8u8; 32]);
        assert!(matches!(
            md.is_last_modified_by(&alice(), &other.verifying_key()),
            Err(MetadataError::LastModifierKeyMismatch)
        ));
    }

    #[test]
    fn successor_predicate_enforces_chain() {
        let head = sample_bare_md(4);
        let head_id = make_md_id(&head).unwrap();

        let mut good = sample_root_md(5);
        good.set_prev_root(head_id);
        head.check_valid_successor(head_id, &good).unwrap();

        let mut gap = sample_root_md(6);
        gap.set_prev_root(head_id);
        assert!(matches!(
            head.check_valid_successor(head_id, &gap),
            Err(SuccessorError::RevisionGap { .. })
        ));

        let bad_prev = sample_root_md(5);
        assert!(matches!(
            head.check_valid_successor(head_id, &bad_prev),
            Err(SuccessorError::PrevRootMismatch { .. })
        ));
    }

    #[test]
    fn rekey_by_reader_is_permitted() {
        let head = sample_bare_md(1);
        let bob = UserId::new("bob").unwrap();

        let mut rekey = sample_root_md(2);
        rekey.set_rekey(true);
        assert!(head.is_writer_or_valid_rekey(&bob, &rekey));

        let plain = sample_root_md(2);
        assert!(!head.is_writer_or_valid_rekey(&bob, &plain));
        assert!(head.is_writer_or_valid_rekey(&alice(), &plain));
    }

    #[test]
    #[should_panic(expected = "null md_id")]
    fn immutable_metadata_rejects_null_id() {
        let md = sample_bare_md(1);
        ImmutableRootMetadata::new(md, MdId::NULL, SystemTime::now());
    }

    #[test]
    fn make_md_id_is_stable_and_content_sensitive() {
        let a = sample_bare_md(1);
        let b = sample_bare_md(1);
        assert_eq!(make_md_id(&a).unwrap(), make_md_id(&b).unwrap());
        let c = sample_bare_md(2);
        assert_ne!(make_md_id(&a).unwrap(), make_md_id(&c).unwrap());
    }
}
