//! Shared fixtures for journal integration tests.

use std::cell::RefCell;
use std::path::Path;

use bytes::Bytes;

use md_journal::{
    BlockChanges, BlockSplitter, BranchId, DeviceSigner, EncryptError, JournalOptions, MdCache,
    MdJournal, PrivateDataEncryptor, PrivateMetadata, Revision, RootMetadata, Signer as _, TlfId,
    UserId,
};

pub const DEVICE_KEY: [u8; 32] = [7u8; 32];

pub fn alice() -> UserId {
    UserId::new("alice").unwrap()
}

pub fn bob() -> UserId {
    UserId::new("bob").unwrap()
}

pub fn signer() -> DeviceSigner {
    DeviceSigner::from_bytes(&DEVICE_KEY)
}

pub fn tlf() -> TlfId {
    TlfId::from_bytes([3u8; 16])
}

pub struct PlainEncryptor;

impl PrivateDataEncryptor for PlainEncryptor {
    fn encrypt_private_data(
        &self,
        private: &PrivateMetadata,
        _uid: &UserId,
    ) -> Result<Bytes, EncryptError> {
        let mut buf = b"enc:".to_vec();
        buf.extend_from_slice(&private.payload);
        Ok(Bytes::from(buf))
    }
}

pub struct EmbedSplitter;

impl BlockSplitter for EmbedSplitter {
    fn should_embed_block_changes(&self, _changes: &BlockChanges) -> bool {
        true
    }
}

/// Records evictions so tests can assert on what branch conversion dropped.
#[derive(Default)]
pub struct RecordingCache {
    pub deleted: RefCell<Vec<(TlfId, Revision, BranchId)>>,
}

impl MdCache for RecordingCache {
    fn delete(&self, tlf_id: TlfId, revision: Revision, bid: BranchId) {
        self.deleted.borrow_mut().push((tlf_id, revision, bid));
    }
}

pub fn open_journal(dir: &Path) -> MdJournal {
    MdJournal::open(
        dir,
        alice(),
        signer().verifying_key(),
        JournalOptions::no_fsync(),
    )
    .expect("open journal")
}

/// A merged trunk candidate for the given revision, with a payload that
/// varies by revision so fingerprints differ.
pub fn draft(rev: u64) -> RootMetadata {
    RootMetadata::new(
        tlf(),
        Revision::new(rev),
        vec![alice()],
        vec![bob()],
        alice(),
        PrivateMetadata {
            changes: BlockChanges::default(),
            payload: Bytes::from(format!("payload for revision {}", rev)),
        },
    )
}

pub fn put(journal: &mut MdJournal, rmd: &mut RootMetadata) -> md_journal::MdId {
    journal
        .put(rmd, &signer(), &PlainEncryptor, &EmbedSplitter)
        .expect("put revision")
}
