//! On-disk ordinal log: a totally-ordered map from revision to metadata id.
//!
//! Layout inside the log directory:
//!
//! ```text
//! EARLIEST            first live revision, fixed-width hex
//! LATEST              last live revision, fixed-width hex
//! 0000000000000001    one entry file per revision, canonical-CBOR MdId
//! 0000000000000002
//! ```
//!
//! Revisions are strictly monotonic with no gaps. `replace_head` is the only
//! in-place mutation. All writes go through a temp file plus rename so a
//! crash leaves either the old or the new contents, never a torn file;
//! `LATEST` is updated as the final step of an append.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::{InvalidId, MdId, Revision};
use crate::core::codec::{DecodeError, EncodeError, decode_md_id, encode_md_id};

const EARLIEST_NAME: &str = "EARLIEST";
const LATEST_NAME: &str = "LATEST";

#[derive(Debug, Error)]
pub enum OrdinalLogError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("path is a symlink: {path:?}")]
    Symlink { path: PathBuf },
    #[error("corrupt ordinal log: {reason}")]
    Corrupt { reason: String },
    #[error("non-sequential append: expected {expected}, got {got}")]
    NonSequentialAppend { expected: Revision, got: Revision },
    #[error("append of uninitialized revision")]
    UninitializedRevision,
    #[error("ordinal log is empty")]
    Empty,
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug)]
pub struct OrdinalLog {
    dir: PathBuf,
    fsync: bool,
}

impl OrdinalLog {
    /// Open (or create) the log rooted at `dir` and verify pointer parity.
    pub fn open(dir: PathBuf, fsync: bool) -> Result<Self, OrdinalLogError> {
        reject_symlink(&dir)?;
        fs::create_dir_all(&dir).map_err(|source| OrdinalLogError::Io {
            path: dir.clone(),
            source,
        })?;
        set_dir_permissions(&dir)?;

        let log = Self { dir, fsync };
        let earliest = log.read_pointer(EARLIEST_NAME)?;
        let latest = log.read_pointer(LATEST_NAME)?;
        match (earliest, latest) {
            (None, None) => {}
            (Some(e), Some(l)) if e <= l => {}
            (Some(e), Some(l)) => {
                return Err(OrdinalLogError::Corrupt {
                    reason: format!("earliest {} is after latest {}", e, l),
                });
            }
            (e, l) => {
                return Err(OrdinalLogError::Corrupt {
                    reason: format!(
                        "has earliest={} but latest={}",
                        e.is_some(),
                        l.is_some()
                    ),
                });
            }
        }
        Ok(log)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_earliest_revision(&self) -> Result<Option<Revision>, OrdinalLogError> {
        self.read_pointer(EARLIEST_NAME)
    }

    pub fn read_latest_revision(&self) -> Result<Option<Revision>, OrdinalLogError> {
        self.read_pointer(LATEST_NAME)
    }

    pub fn earliest(&self) -> Result<Option<(Revision, MdId)>, OrdinalLogError> {
        self.read_endpoint(EARLIEST_NAME)
    }

    pub fn latest(&self) -> Result<Option<(Revision, MdId)>, OrdinalLogError> {
        self.read_endpoint(LATEST_NAME)
    }

    /// One past the latest revision, or the uninitialized revision when the
    /// log is empty.
    pub fn end(&self) -> Result<Revision, OrdinalLogError> {
        Ok(self
            .read_pointer(LATEST_NAME)?
            .map(|rev| rev.next())
            .unwrap_or(Revision::UNINITIALIZED))
    }

    pub fn len(&self) -> Result<u64, OrdinalLogError> {
        match (
            self.read_pointer(EARLIEST_NAME)?,
            self.read_pointer(LATEST_NAME)?,
        ) {
            (Some(e), Some(l)) => Ok(l.get() - e.get() + 1),
            _ => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool, OrdinalLogError> {
        Ok(self.read_pointer(LATEST_NAME)?.is_none())
    }

    /// Append `(rev, id)`. The log must be empty or `rev` must directly
    /// succeed the current latest revision.
    pub fn append(&mut self, rev: Revision, id: MdId) -> Result<(), OrdinalLogError> {
        if !rev.is_initialized() {
            return Err(OrdinalLogError::UninitializedRevision);
        }
        let latest = self.read_pointer(LATEST_NAME)?;
        if let Some(latest) = latest {
            if rev != latest.next() {
                return Err(OrdinalLogError::NonSequentialAppend {
                    expected: latest.next(),
                    got: rev,
                });
            }
        }
        self.write_entry(rev, id)?;
        if latest.is_none() {
            self.write_pointer(EARLIEST_NAME, rev)?;
        }
        self.write_pointer(LATEST_NAME, rev)
    }

    /// Replace the MdId stored at the current latest revision.
    pub fn replace_head(&mut self, id: MdId) -> Result<(), OrdinalLogError> {
        let rev = self
            .read_pointer(LATEST_NAME)?
            .ok_or(OrdinalLogError::Empty)?;
        self.write_entry(rev, id)
    }

    /// Drop the earliest entry; returns whether the log is now empty.
    pub fn remove_earliest(&mut self) -> Result<bool, OrdinalLogError> {
        let earliest = self
            .read_pointer(EARLIEST_NAME)?
            .ok_or(OrdinalLogError::Empty)?;
        let latest = self
            .read_pointer(LATEST_NAME)?
            .ok_or(OrdinalLogError::Empty)?;
        let empty = earliest == latest;
        if empty {
            self.remove_file(EARLIEST_NAME)?;
            self.remove_file(LATEST_NAME)?;
        } else {
            self.write_pointer(EARLIEST_NAME, earliest.next())?;
        }
        self.remove_file(&earliest.file_name())?;
        Ok(empty)
    }

    /// Entry ids for revisions in `[max(earliest, start), min(latest, stop)]`,
    /// plus the first revision actually returned.
    pub fn range(
        &self,
        start: Revision,
        stop: Revision,
    ) -> Result<(Revision, Vec<MdId>), OrdinalLogError> {
        let (earliest, latest) = match (
            self.read_pointer(EARLIEST_NAME)?,
            self.read_pointer(LATEST_NAME)?,
        ) {
            (Some(e), Some(l)) => (e, l),
            _ => return Ok((start, Vec::new())),
        };
        let real_start = start.max(earliest);
        let real_stop = stop.min(latest);
        if real_start > real_stop {
            return Ok((start, Vec::new()));
        }
        let mut ids = Vec::with_capacity((real_stop.get() - real_start.get() + 1) as usize);
        let mut rev = real_start;
        while rev <= real_stop {
            ids.push(self.read_entry(rev)?);
            rev = rev.next();
        }
        Ok((real_start, ids))
    }

    /// Empty the log, removing pointers and every entry file.
    pub fn clear(&mut self) -> Result<(), OrdinalLogError> {
        let (earliest, latest) = match (
            self.read_pointer(EARLIEST_NAME)?,
            self.read_pointer(LATEST_NAME)?,
        ) {
            (Some(e), Some(l)) => (e, l),
            _ => return Ok(()),
        };
        self.remove_file(EARLIEST_NAME)?;
        self.remove_file(LATEST_NAME)?;
        let mut rev = earliest;
        while rev <= latest {
            self.remove_file(&rev.file_name())?;
            rev = rev.next();
        }
        Ok(())
    }

    /// Rename the log's directory to `new_dir` and return the old directory.
    /// The log keeps operating out of `new_dir` afterwards.
    pub fn move_to(&mut self, new_dir: PathBuf) -> Result<PathBuf, OrdinalLogError> {
        fs::rename(&self.dir, &new_dir).map_err(|source| OrdinalLogError::Io {
            path: new_dir.clone(),
            source,
        })?;
        Ok(std::mem::replace(&mut self.dir, new_dir))
    }

    fn read_endpoint(&self, name: &str) -> Result<Option<(Revision, MdId)>, OrdinalLogError> {
        let Some(rev) = self.read_pointer(name)? else {
            return Ok(None);
        };
        Ok(Some((rev, self.read_entry(rev)?)))
    }

    fn read_entry(&self, rev: Revision) -> Result<MdId, OrdinalLogError> {
        let path = self.dir.join(rev.file_name());
        let bytes = fs::read(&path).map_err(|source| OrdinalLogError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(decode_md_id(&bytes)?)
    }

    fn write_entry(&self, rev: Revision, id: MdId) -> Result<(), OrdinalLogError> {
        let bytes = encode_md_id(&id)?;
        self.write_file(&rev.file_name(), &bytes)
    }

    fn read_pointer(&self, name: &str) -> Result<Option<Revision>, OrdinalLogError> {
        let path = self.dir.join(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(OrdinalLogError::Io { path, source }),
        };
        let rev = Revision::from_file_name(raw.trim())?;
        if !rev.is_initialized() {
            return Err(OrdinalLogError::Corrupt {
                reason: format!("{} names the uninitialized revision", name),
            });
        }
        Ok(Some(rev))
    }

    fn write_pointer(&self, name: &str, rev: Revision) -> Result<(), OrdinalLogError> {
        self.write_file(name, rev.file_name().as_bytes())
    }

    // Temp file plus rename; the entry either has its old contents or its
    // new contents after a crash.
    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), OrdinalLogError> {
        let tmp_path = self.dir.join(format!("{}.tmp", name));
        let final_path = self.dir.join(name);

        let mut file = open_for_write(&tmp_path)?;
        file.write_all(bytes).map_err(|source| OrdinalLogError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        if self.fsync {
            file.sync_all().map_err(|source| OrdinalLogError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|source| OrdinalLogError::Io {
            path: final_path.clone(),
            source,
        })?;
        if self.fsync {
            fsync_dir(&self.dir)?;
        }
        Ok(())
    }

    fn remove_file(&self, name: &str) -> Result<(), OrdinalLogError> {
        let path = self.dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OrdinalLogError::Io { path, source }),
        }
    }
}

fn open_for_write(path: &Path) -> Result<File, OrdinalLogError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|source| OrdinalLogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn fsync_dir(dir: &Path) -> Result<(), OrdinalLogError> {
    let file = File::open(dir).map_err(|source| OrdinalLogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(|source| OrdinalLogError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn set_dir_permissions(path: &Path) -> Result<(), OrdinalLogError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|source| {
            OrdinalLogError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

fn reject_symlink(path: &Path) -> Result<(), OrdinalLogError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(OrdinalLogError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(OrdinalLogError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sha256_bytes;
    use tempfile::TempDir;

    fn id(n: u8) -> MdId {
        MdId::from_digest(sha256_bytes(&[n]))
    }

    fn open_log(temp: &TempDir) -> OrdinalLog {
        OrdinalLog::open(temp.path().join("md_journal"), false).unwrap()
    }

    #[test]
    fn append_tracks_endpoints() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        assert!(log.is_empty().unwrap());
        assert_eq!(log.end().unwrap(), Revision::UNINITIALIZED);

        log.append(Revision::new(5), id(1)).unwrap();
        log.append(Revision::new(6), id(2)).unwrap();
        assert_eq!(log.earliest().unwrap(), Some((Revision::new(5), id(1))));
        assert_eq!(log.latest().unwrap(), Some((Revision::new(6), id(2))));
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.end().unwrap(), Revision::new(7));
    }

    #[test]
    fn append_rejects_gaps() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        log.append(Revision::new(1), id(1)).unwrap();
        let err = log.append(Revision::new(3), id(2)).unwrap_err();
        assert!(matches!(
            err,
            OrdinalLogError::NonSequentialAppend {
                expected,
                got,
            } if expected == Revision::new(2) && got == Revision::new(3)
        ));
        assert!(matches!(
            log.append(Revision::UNINITIALIZED, id(2)).unwrap_err(),
            OrdinalLogError::UninitializedRevision
        ));
    }

    #[test]
    fn replace_head_keeps_revision() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        assert!(matches!(
            log.replace_head(id(9)).unwrap_err(),
            OrdinalLogError::Empty
        ));
        log.append(Revision::new(1), id(1)).unwrap();
        log.replace_head(id(9)).unwrap();
        assert_eq!(log.latest().unwrap(), Some((Revision::new(1), id(9))));
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn remove_earliest_reports_empty() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        log.append(Revision::new(1), id(1)).unwrap();
        log.append(Revision::new(2), id(2)).unwrap();
        assert!(!log.remove_earliest().unwrap());
        assert_eq!(log.earliest().unwrap(), Some((Revision::new(2), id(2))));
        assert!(log.remove_earliest().unwrap());
        assert!(log.is_empty().unwrap());
        assert!(!temp.path().join("md_journal").join(EARLIEST_NAME).exists());
    }

    #[test]
    fn range_clamps_to_live_entries() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        for n in 3..=6u64 {
            log.append(Revision::new(n), id(n as u8)).unwrap();
        }
        let (start, ids) = log.range(Revision::new(1), Revision::new(4)).unwrap();
        assert_eq!(start, Revision::new(3));
        assert_eq!(ids, vec![id(3), id(4)]);

        let (start, ids) = log.range(Revision::new(5), Revision::new(99)).unwrap();
        assert_eq!(start, Revision::new(5));
        assert_eq!(ids, vec![id(5), id(6)]);

        let (_, ids) = log.range(Revision::new(7), Revision::new(9)).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        for n in 1..=3u64 {
            log.append(Revision::new(n), id(n as u8)).unwrap();
        }
        log.clear().unwrap();
        assert!(log.is_empty().unwrap());
        let entries: Vec<_> = fs::read_dir(log.dir()).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn move_to_renames_directory() {
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        log.append(Revision::new(1), id(1)).unwrap();
        let old = log
            .move_to(temp.path().join("md_journal.moved"))
            .unwrap();
        assert_eq!(old, temp.path().join("md_journal"));
        assert!(!old.exists());
        assert_eq!(log.latest().unwrap(), Some((Revision::new(1), id(1))));
    }

    #[test]
    fn open_rejects_pointer_mismatch() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("md_journal");
        {
            let mut log = OrdinalLog::open(dir.clone(), false).unwrap();
            log.append(Revision::new(1), id(1)).unwrap();
        }
        fs::remove_file(dir.join(LATEST_NAME)).unwrap();
        assert!(matches!(
            OrdinalLog::open(dir, false).unwrap_err(),
            OrdinalLogError::Corrupt { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn open_sets_directory_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let log = open_log(&temp);
        let mode = fs::metadata(log.dir()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn entry_files_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let mut log = open_log(&temp);
        log.append(Revision::new(1), id(1)).unwrap();
        let path = log.dir().join(Revision::new(1).file_name());
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn reopen_preserves_state() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("md_journal");
        {
            let mut log = OrdinalLog::open(dir.clone(), false).unwrap();
            log.append(Revision::new(8), id(8)).unwrap();
            log.append(Revision::new(9), id(9)).unwrap();
        }
        let log = OrdinalLog::open(dir, false).unwrap();
        assert_eq!(log.earliest().unwrap(), Some((Revision::new(8), id(8))));
        assert_eq!(log.latest().unwrap(), Some((Revision::new(9), id(9))));
    }
}
