//! Journal coordinator: invariants across the ordinal log and content store.
//!
//! A journal is single-writer per folder. The caller holds a per-folder
//! exclusive lock for the whole duration of any call here; there is no
//! internal locking, and readers are not safe against concurrent writers.
//!
//! `branch_id` and `last_md_id` live only in memory. After a restart the
//! branch is re-adopted from the on-disk endpoints (or re-learned from the
//! server via [`md_id_from_server`](super::md_id_from_server)); the lost
//! `last_md_id` is reconstituted by the Unmerged-3 put path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use tracing::{debug, warn};

use crate::config::JournalOptions;
use crate::core::codec::{codec_equal, decode_bare_md, encode_bare_md};
use crate::core::{
    BareRootMetadata, BlockSplitter, BranchId, ImmutableRootMetadata, MdId, MergeStatus,
    PrivateDataEncryptor, Revision, RootMetadata, RootMetadataSigned, Signer, UserId, make_md_id,
    sign_md,
};

use super::error::JournalError;
use super::md_store::MdStore;
use super::ordinal_log::OrdinalLog;
use super::MdCache;

const JOURNAL_DIR_NAME: &str = "md_journal";
const MDS_DIR_NAME: &str = "mds";

/// A per-folder metadata journal rooted at one directory on disk.
pub struct MdJournal {
    uid: UserId,
    verifying_key: VerifyingKey,
    dir: PathBuf,
    options: JournalOptions,

    log: OrdinalLog,
    store: MdStore,

    // Not persisted: on restart the branch is re-read from the journal
    // endpoints, or re-learned from the server once the journal is empty.
    branch_id: BranchId,

    // Set only when the journal becomes empty through flushing, so the next
    // unmerged put can chain its prev_root. Not persisted either.
    last_md_id: Option<MdId>,
}

impl MdJournal {
    /// Open (or create) the journal rooted at `dir`, verify the endpoint
    /// invariants, and adopt the stored branch.
    pub fn open(
        dir: impl Into<PathBuf>,
        uid: UserId,
        verifying_key: VerifyingKey,
        options: JournalOptions,
    ) -> Result<Self, JournalError> {
        let dir = dir.into();
        let log = OrdinalLog::open(dir.join(JOURNAL_DIR_NAME), options.fsync)?;
        let store = MdStore::open(dir.join(MDS_DIR_NAME), options.fsync)?;
        let mut journal = Self {
            uid,
            verifying_key,
            dir,
            options,
            log,
            store,
            branch_id: BranchId::NULL,
            last_md_id: None,
        };

        // Branch verification is off here: these reads are what establish
        // the in-memory branch in the first place.
        let earliest = journal.earliest_md(false)?;
        let latest = journal.latest_md(false)?;
        match (&earliest, &latest) {
            (None, None) => {}
            (Some(e), Some(l)) => {
                if e.md().branch_id() != l.md().branch_id() {
                    return Err(JournalError::Corrupt {
                        reason: format!(
                            "earliest branch {} != latest branch {}",
                            e.md().branch_id(),
                            l.md().branch_id()
                        ),
                    });
                }
                journal.branch_id = e.md().branch_id();
            }
            (e, l) => {
                return Err(JournalError::Corrupt {
                    reason: format!(
                        "has earliest={} but latest={}",
                        e.is_some(),
                        l.is_some()
                    ),
                });
            }
        }
        Ok(journal)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn len(&self) -> Result<u64, JournalError> {
        Ok(self.log.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, JournalError> {
        Ok(self.log.is_empty()?)
    }

    /// One past the latest journaled revision, or the uninitialized revision
    /// when the journal is empty.
    pub fn end(&self) -> Result<Revision, JournalError> {
        Ok(self.log.end()?)
    }

    pub fn read_earliest_revision(&self) -> Result<Option<Revision>, JournalError> {
        Ok(self.log.read_earliest_revision()?)
    }

    pub fn read_latest_revision(&self) -> Result<Option<Revision>, JournalError> {
        Ok(self.log.read_latest_revision()?)
    }

    /// Read, decode, and verify the stored revision `id`: the fingerprint is
    /// recomputed from the canonical form, the last modifier must be the
    /// current device, the writer signature must check out, and with
    /// `verify_branch` the revision must be on the journal's branch.
    pub fn get_md(
        &self,
        id: MdId,
        verify_branch: bool,
    ) -> Result<(BareRootMetadata, SystemTime), JournalError> {
        let (data, mtime) = self.store.read(id)?;
        let md = decode_bare_md(&data)?;

        let computed = make_md_id(&md)?;
        if computed != id {
            return Err(JournalError::MdIdMismatch {
                expected: id,
                got: computed,
            });
        }

        md.is_last_modified_by(&self.uid, &self.verifying_key)?;
        md.is_valid_and_signed()?;

        if verify_branch && md.branch_id() != self.branch_id {
            return Err(JournalError::BranchMismatch {
                expected: self.branch_id,
                got: md.branch_id(),
            });
        }

        Ok((md, mtime))
    }

    /// Store the given revision under its fingerprint, unless it is already
    /// stored. Idempotent per id.
    pub fn put_md(&self, md: &BareRootMetadata) -> Result<MdId, JournalError> {
        md.is_valid_and_signed()?;
        md.is_last_modified_by(&self.uid, &self.verifying_key)?;

        let id = make_md_id(md)?;
        match self.get_md(id, true) {
            Ok(_) => return Ok(id),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let bytes = encode_bare_md(md)?;
        self.store.put(id, &bytes)?;
        Ok(id)
    }

    /// The journal head, after checking that the current user may read this
    /// folder.
    pub fn head(&self) -> Result<Option<ImmutableRootMetadata>, JournalError> {
        self.check_get_params()
    }

    /// Journaled revisions in `[start, stop]`, clamped to the live range.
    /// Each entry is verified to sit at its claimed ordinal.
    pub fn range(
        &self,
        start: Revision,
        stop: Revision,
    ) -> Result<Vec<ImmutableRootMetadata>, JournalError> {
        self.check_get_params()?;
        let (real_start, ids) = self.log.range(start, stop)?;
        let mut out = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let expected = Revision::new(real_start.get() + i as u64);
            let (md, ts) = self.get_md(*id, true)?;
            if md.revision() != expected {
                return Err(JournalError::RevisionOutOfPlace {
                    expected,
                    got: md.revision(),
                });
            }
            out.push(ImmutableRootMetadata::new(md, *id, ts));
        }
        Ok(out)
    }

    /// Verify and store a candidate revision, normalizing it as needed.
    ///
    /// Four cases, by the candidate's merge status and branch:
    ///
    /// - **Merged**: the journal must still be on trunk, else the caller
    ///   gets [`JournalError::Conflict`] and retries unmerged.
    /// - **Unmerged-1** (null branch on a forked journal): the candidate
    ///   adopts the journal's branch and chains to the last known root.
    /// - **Unmerged-2** (explicit branch, journal has context): stored as
    ///   given.
    /// - **Unmerged-3** (explicit branch, journal empty and on trunk): the
    ///   server-provided branch is trusted and becomes the journal's branch;
    ///   reverted if this put fails.
    ///
    /// A candidate at the head's exact revision replaces the head, so a
    /// cancelled-but-stored put can be safely retried; otherwise it must be
    /// a valid successor and is appended.
    pub fn put(
        &mut self,
        rmd: &mut RootMetadata,
        signer: &dyn Signer,
        encryptor: &dyn PrivateDataEncryptor,
        splitter: &dyn BlockSplitter,
    ) -> Result<MdId, JournalError> {
        debug!(
            tlf = %rmd.tlf_id(),
            rev = %rmd.revision(),
            bid = %rmd.branch_id(),
            "putting metadata revision"
        );

        let head = self.latest_md(true)?;
        let m_status = rmd.merge_status();
        let mut adopted_branch = false;

        if m_status == MergeStatus::Unmerged {
            let last_md_id = match &head {
                Some(h) => Some(h.md_id()),
                None => self.last_md_id,
            };

            if rmd.branch_id().is_null() && self.branch_id.is_null() {
                return Err(JournalError::UnmergedPutWithoutBranch);
            }

            if head.is_none() && self.branch_id.is_null() {
                // Unmerged-3: the journal has been empty for this process
                // lifetime; trust the caller's server-provided branch.
                self.branch_id = rmd.branch_id();
                adopted_branch = true;
            } else if rmd.branch_id().is_null() {
                // Unmerged-1.
                debug!(
                    bid = %self.branch_id,
                    prev = %last_md_id.unwrap_or(MdId::NULL),
                    "adopting journal branch for unmerged put"
                );
                rmd.set_branch_id(self.branch_id);
                rmd.set_prev_root(last_md_id.unwrap_or(MdId::NULL));
            }
            // Unmerged-2 otherwise: the revision already names a branch and
            // the journal has context for it; nothing to normalize.
        }

        let result = self.put_common(&head, m_status, rmd, signer, encryptor, splitter);
        if let Err(err) = &result {
            debug!(
                tlf = %rmd.tlf_id(),
                rev = %rmd.revision(),
                error = %err,
                "metadata put failed"
            );
            if adopted_branch {
                self.branch_id = BranchId::NULL;
            }
        }
        result
    }

    fn put_common(
        &mut self,
        head: &Option<ImmutableRootMetadata>,
        m_status: MergeStatus,
        rmd: &RootMetadata,
        signer: &dyn Signer,
        encryptor: &dyn PrivateDataEncryptor,
        splitter: &dyn BlockSplitter,
    ) -> Result<MdId, JournalError> {
        if (m_status == MergeStatus::Merged) != rmd.branch_id().is_null() {
            return Err(JournalError::MergeStatusMismatch {
                status: m_status,
                branch_id: rmd.branch_id(),
            });
        }

        // A merged revision on a forked journal is the expected conflict;
        // the caller retries with an unmerged one.
        if m_status == MergeStatus::Merged && !self.branch_id.is_null() {
            return Err(JournalError::Conflict);
        }

        if rmd.branch_id() != self.branch_id {
            return Err(JournalError::BranchMismatch {
                expected: self.branch_id,
                got: rmd.branch_id(),
            });
        }

        if let Some(head) = head {
            if !head.md().is_writer_or_valid_rekey(&self.uid, rmd) {
                return Err(JournalError::Unauthorized {
                    uid: self.uid.clone(),
                });
            }
            if rmd.revision() != head.md().revision() {
                head.md().check_valid_successor(head.md_id(), rmd)?;
            }
        }

        if rmd.private().changes.info.is_zero()
            && !splitter.should_embed_block_changes(&rmd.private().changes)
        {
            return Err(JournalError::EmbeddedBlockChanges);
        }

        let encrypted = encryptor.encrypt_private_data(rmd.private(), &self.uid)?;
        let brmd = BareRootMetadata::seal(rmd, encrypted, signer)?;
        let id = self.put_md(&brmd)?;

        match head {
            Some(h) if rmd.revision() == h.md().revision() => {
                debug!(rev = %rmd.revision(), id = %id, "replacing journal head");
                self.log.replace_head(id)?;
            }
            _ => {
                self.log.append(brmd.revision(), id)?;
            }
        }

        // The journal is non-empty again.
        self.last_md_id = None;
        Ok(id)
    }

    /// The earliest entry with revision below `end`, re-signed for the wire,
    /// or `None` when the journal has nothing to flush yet.
    pub fn next_entry_to_flush(
        &self,
        end: Revision,
        signer: &dyn Signer,
    ) -> Result<Option<(MdId, RootMetadataSigned)>, JournalError> {
        let Some(earliest) = self.earliest_md(true)? else {
            return Ok(None);
        };
        if earliest.md().revision() >= end {
            return Ok(None);
        }
        let id = earliest.md_id();
        let rmds = sign_md(earliest.into_md(), signer)?;
        Ok(Some((id, rmds)))
    }

    /// Drop the earliest entry after the server acknowledged it. The id and
    /// the signed payload must both match what the journal stored.
    pub fn remove_flushed_entry(
        &mut self,
        md_id: MdId,
        rmds: &RootMetadataSigned,
    ) -> Result<(), JournalError> {
        let Some(earliest) = self.earliest_md(true)? else {
            return Err(JournalError::UnexpectedlyEmpty);
        };
        if md_id != earliest.md_id() {
            return Err(JournalError::FlushedEntryMismatch {
                expected: earliest.md_id(),
                got: md_id,
            });
        }
        if !codec_equal(earliest.md(), &rmds.md)? {
            return Err(JournalError::FlushedPayloadMismatch);
        }

        let empty = self.log.remove_earliest()?;
        if empty {
            debug!(id = %md_id, "journal drained; remembering last flushed id");
            self.last_md_id = Some(md_id);
        }

        self.store.remove(md_id)?;
        Ok(())
    }

    /// Fork the whole journal onto a fresh branch: every entry is rewritten
    /// as unmerged under the new branch id, re-chained, re-signed, and
    /// stored under its new fingerprint; then the rewritten ordinal log is
    /// swapped into place. Stale merged revisions are evicted from
    /// `md_cache`.
    ///
    /// On success the old log directory and old content files are removed;
    /// on failure the scratch directory and any new content files are. The
    /// swap itself is two renames and only as atomic as the filesystem makes
    /// them; the open-time invariants reject a journal caught in between.
    pub fn convert_to_branch(
        &mut self,
        signer: &dyn Signer,
        md_cache: &dyn MdCache,
    ) -> Result<BranchId, JournalError> {
        if !self.branch_id.is_null() {
            return Err(JournalError::AlreadyBranched {
                bid: self.branch_id,
            });
        }

        let all_ids = match (
            self.log.read_earliest_revision()?,
            self.log.read_latest_revision()?,
        ) {
            (Some(earliest), Some(latest)) => self.log.range(earliest, latest)?.1,
            _ => Vec::new(),
        };

        let bid = BranchId::random();
        debug!(bid = %bid, entries = all_ids.len(), "converting journal to branch");

        let scratch_name = self.fresh_scratch_name();
        let scratch_dir = self.dir.join(&scratch_name);
        let aside_dir = self.dir.join(format!("{}.old", scratch_name));

        let mut new_ids = Vec::with_capacity(all_ids.len());
        match self.rewrite_to_branch(&all_ids, bid, &scratch_dir, &aside_dir, &mut new_ids, signer, md_cache)
        {
            Ok(new_log) => {
                self.log = new_log;
                self.branch_id = bid;
                self.cleanup_conversion(&aside_dir, &all_ids);
                Ok(bid)
            }
            Err(err) => {
                self.cleanup_conversion(&scratch_dir, &new_ids);
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rewrite_to_branch(
        &mut self,
        all_ids: &[MdId],
        bid: BranchId,
        scratch_dir: &Path,
        aside_dir: &Path,
        new_ids: &mut Vec<MdId>,
        signer: &dyn Signer,
        md_cache: &dyn MdCache,
    ) -> Result<OrdinalLog, JournalError> {
        let mut scratch = OrdinalLog::open(scratch_dir.to_path_buf(), self.options.fsync)?;
        let mut prev_id: Option<MdId> = None;

        for &old_id in all_ids {
            let (mut md, _) = self.get_md(old_id, true)?;
            md.set_unmerged();
            md.set_branch_id(bid);

            // Drop the stale merged version from the external cache.
            md_cache.delete(md.tlf_id(), md.revision(), BranchId::NULL);

            if let Some(prev) = prev_id {
                md.set_prev_root(prev);
            }

            // Re-sign the writer portion for the new branch. The rewrite
            // also refreshes the content file's mtime, so local timestamps
            // for these revisions drift; carrying the original time forward
            // is a possible refinement.
            let wm_bytes = md.serialized_writer_metadata()?;
            md.set_writer_sig(signer.sign(&wm_bytes));

            let new_id = self.put_md(&md)?;
            new_ids.push(new_id);
            scratch.append(md.revision(), new_id)?;
            debug!(
                rev = %md.revision(),
                old = %old_id,
                new = %new_id,
                "rewrote revision for branch"
            );
            prev_id = Some(new_id);
        }

        // The decisive swap: move the live log aside, then the scratch log
        // into its place.
        let journal_dir = self.log.move_to(aside_dir.to_path_buf())?;
        scratch.move_to(journal_dir)?;
        Ok(scratch)
    }

    fn cleanup_conversion(&self, dir: &Path, ids: &[MdId]) {
        debug!(dir = %dir.display(), files = ids.len(), "cleaning up after branch conversion");
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "failed to remove conversion directory");
            }
        }
        for &id in ids {
            if let Err(err) = self.store.remove(id) {
                warn!(id = %id, error = %err, "failed to remove stale metadata file");
            }
        }
    }

    fn fresh_scratch_name(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let name = format!("{}.{:08x}", JOURNAL_DIR_NAME, rng.next_u32());
            if !self.dir.join(&name).exists() {
                return name;
            }
        }
    }

    /// Empty a resolved branch. A no-op unless the journal's head is on
    /// `bid`; clearing the trunk is refused.
    pub fn clear(&mut self, bid: BranchId) -> Result<(), JournalError> {
        debug!(bid = %bid, "clearing branch");
        if bid.is_null() {
            return Err(JournalError::ClearNullBranch);
        }

        let Some(head) = self.head()? else {
            return Ok(());
        };
        if head.md().branch_id() != bid {
            return Ok(());
        }

        let (earliest, latest) = match (
            self.log.read_earliest_revision()?,
            self.log.read_latest_revision()?,
        ) {
            (Some(e), Some(l)) => (e, l),
            _ => return Ok(()),
        };
        let (_, all_ids) = self.log.range(earliest, latest)?;

        // Branch resolution resets chaining; last_md_id stays as-is.
        self.branch_id = BranchId::NULL;
        self.log.clear()?;

        for id in all_ids {
            self.store.remove(id)?;
        }
        Ok(())
    }

    fn check_get_params(&self) -> Result<Option<ImmutableRootMetadata>, JournalError> {
        let head = self.latest_md(true)?;
        if let Some(head) = &head {
            if !head.md().is_reader(&self.uid) {
                return Err(JournalError::Unauthorized {
                    uid: self.uid.clone(),
                });
            }
        }
        Ok(head)
    }

    fn earliest_md(
        &self,
        verify_branch: bool,
    ) -> Result<Option<ImmutableRootMetadata>, JournalError> {
        self.endpoint_md(self.log.earliest()?, verify_branch)
    }

    fn latest_md(
        &self,
        verify_branch: bool,
    ) -> Result<Option<ImmutableRootMetadata>, JournalError> {
        self.endpoint_md(self.log.latest()?, verify_branch)
    }

    fn endpoint_md(
        &self,
        entry: Option<(Revision, MdId)>,
        verify_branch: bool,
    ) -> Result<Option<ImmutableRootMetadata>, JournalError> {
        let Some((rev, id)) = entry else {
            return Ok(None);
        };
        let (md, ts) = self.get_md(id, verify_branch)?;
        if md.revision() != rev {
            return Err(JournalError::RevisionOutOfPlace {
                expected: rev,
                got: md.revision(),
            });
        }
        Ok(Some(ImmutableRootMetadata::new(md, id, ts)))
    }
}
