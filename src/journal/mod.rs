//! Per-folder metadata journal: a durable, ordered, append-mostly log of
//! locally produced root metadata revisions that the remote server has not
//! yet acknowledged.
//!
//! Two sub-stores cooperate under one coordinator: the ordinal log maps
//! revision numbers to content fingerprints, and the content store holds the
//! encoded revisions themselves. The coordinator enforces the invariants
//! between them.

pub mod error;
pub mod md_journal;
pub mod md_store;
pub mod ordinal_log;

use thiserror::Error;

use crate::core::{BranchId, MdId, MergeStatus, Revision, RootMetadataSigned, TlfId, make_md_id};

pub use error::JournalError;
pub use md_journal::MdJournal;
pub use md_store::{MdStore, MdStoreError};
pub use ordinal_log::{OrdinalLog, OrdinalLogError};

/// Cache of merged metadata kept outside the journal; branch conversion
/// evicts the revisions it rewrites.
pub trait MdCache {
    fn delete(&self, tlf_id: TlfId, revision: Revision, bid: BranchId);
}

#[derive(Debug, Error)]
#[error("metadata server request failed: {source}")]
pub struct ServerError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl ServerError {
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
        }
    }
}

/// The slice of the remote metadata server the journal consumes.
pub trait MdServer {
    fn get_range(
        &self,
        tlf_id: TlfId,
        bid: BranchId,
        merge_status: MergeStatus,
        start: Revision,
        stop: Revision,
    ) -> Result<Vec<RootMetadataSigned>, ServerError>;
}

/// Fetch the fingerprint of a single server-side revision, if it exists.
///
/// Used after process restart to rediscover chaining state the journal keeps
/// only in memory.
pub fn md_id_from_server(
    server: &dyn MdServer,
    tlf_id: TlfId,
    bid: BranchId,
    merge_status: MergeStatus,
    revision: Revision,
) -> Result<Option<MdId>, JournalError> {
    let rmdses = server.get_range(tlf_id, bid, merge_status, revision, revision)?;
    match rmdses.len() {
        0 => Ok(None),
        1 => Ok(Some(make_md_id(&rmdses[0].md)?)),
        count => Err(JournalError::AmbiguousServerRevision { revision, count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceSigner;
    use crate::core::metadata::tests::sample_bare_md;
    use crate::core::sign_md;

    struct FixedServer(Vec<RootMetadataSigned>);

    impl MdServer for FixedServer {
        fn get_range(
            &self,
            _tlf_id: TlfId,
            _bid: BranchId,
            _merge_status: MergeStatus,
            _start: Revision,
            _stop: Revision,
        ) -> Result<Vec<RootMetadataSigned>, ServerError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn md_id_from_server_handles_each_cardinality() {
        let tlf_id = TlfId::from_bytes([3u8; 16]);
        let rev = Revision::new(1);
        let lookup = |server: &FixedServer| {
            md_id_from_server(server, tlf_id, BranchId::NULL, MergeStatus::Merged, rev)
        };

        let empty = FixedServer(Vec::new());
        assert!(lookup(&empty).unwrap().is_none());

        let signer = DeviceSigner::from_bytes(&[7u8; 32]);
        let rmds = sign_md(sample_bare_md(1), &signer).unwrap();
        let expected = make_md_id(&rmds.md).unwrap();
        let one = FixedServer(vec![rmds.clone()]);
        assert_eq!(lookup(&one).unwrap(), Some(expected));

        let two = FixedServer(vec![rmds.clone(), rmds]);
        assert!(matches!(
            lookup(&two).unwrap_err(),
            JournalError::AmbiguousServerRevision { count: 2, .. }
        ));
    }
}
