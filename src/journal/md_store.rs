//! Content-addressed store for encoded metadata revisions.
//!
//! Files live at `<root>/mds/<first two hex chars>/<remaining hex>` so the
//! top-level directory stays at a manageable 256 entries, the way git splays
//! its object store. Files are immutable once written: a put of an id that
//! already exists succeeds without touching the file.
//!
//! The store does not verify content integrity; the coordinator re-derives
//! every id after decoding.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

use crate::core::MdId;

#[derive(Debug, Error)]
pub enum MdStoreError {
    #[error("no stored metadata for {id}")]
    NotFound { id: MdId },
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("path is a symlink: {path:?}")]
    Symlink { path: PathBuf },
}

pub struct MdStore {
    dir: PathBuf,
    fsync: bool,
}

impl MdStore {
    pub fn open(dir: PathBuf, fsync: bool) -> Result<Self, MdStoreError> {
        reject_symlink(&dir)?;
        fs::create_dir_all(&dir).map_err(|source| MdStoreError::Io {
            path: dir.clone(),
            source,
        })?;
        set_dir_permissions(&dir)?;
        Ok(Self { dir, fsync })
    }

    pub fn path_for(&self, id: MdId) -> PathBuf {
        let hex = id.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Idempotent put-if-absent: write the bytes under `id` unless a file is
    /// already there.
    pub fn put(&self, id: MdId, bytes: &[u8]) -> Result<(), MdStoreError> {
        let path = self.path_for(id);
        if path.exists() {
            return Ok(());
        }

        let parent = path.parent().expect("content path always has a parent");
        reject_symlink(parent)?;
        fs::create_dir_all(parent).map_err(|source| MdStoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        set_dir_permissions(parent)?;

        let tmp_path = path.with_extension("tmp");
        let mut file = open_for_write(&tmp_path)?;
        file.write_all(bytes).map_err(|source| MdStoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        if self.fsync {
            file.sync_all().map_err(|source| MdStoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        }
        fs::rename(&tmp_path, &path).map_err(|source| MdStoreError::Io {
            path: path.clone(),
            source,
        })?;
        if self.fsync {
            fsync_dir(parent)?;
        }
        Ok(())
    }

    /// Read the bytes stored under `id` along with the content file's
    /// modification time.
    pub fn read(&self, id: MdId) -> Result<(Bytes, SystemTime), MdStoreError> {
        let path = self.path_for(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MdStoreError::NotFound { id });
            }
            Err(source) => return Err(MdStoreError::Io { path, source }),
        };
        let meta = fs::metadata(&path).map_err(|source| MdStoreError::Io {
            path: path.clone(),
            source,
        })?;
        let modified = meta.modified().map_err(|source| MdStoreError::Io {
            path,
            source,
        })?;
        Ok((Bytes::from(bytes), modified))
    }

    /// Remove the file for `id`; absence is tolerated silently.
    pub fn remove(&self, id: MdId) -> Result<(), MdStoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(MdStoreError::Io { path, source }),
        }
    }
}

fn open_for_write(path: &Path) -> Result<File, MdStoreError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|source| MdStoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn fsync_dir(dir: &Path) -> Result<(), MdStoreError> {
    let file = File::open(dir).map_err(|source| MdStoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(|source| MdStoreError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn set_dir_permissions(path: &Path) -> Result<(), MdStoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|source| {
            MdStoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

fn reject_symlink(path: &Path) -> Result<(), MdStoreError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(MdStoreError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(MdStoreError::Io {
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

    fn open_store(temp: &TempDir) -> MdStore {
        MdStore::open(temp.path().join("mds"), false).unwrap()
    }

    #[test]
    fn put_then_read_round_trips() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.put(id(1), b"encoded md").unwrap();
        let (bytes, _mtime) = store.read(id(1)).unwrap();
        assert_eq!(&bytes[..], b"encoded md");
    }

    #[test]
    fn put_is_idempotent_and_keeps_first_contents() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.put(id(2), b"first").unwrap();
        store.put(id(2), b"second").unwrap();
        let (bytes, _) = store.read(id(2)).unwrap();
        assert_eq!(&bytes[..], b"first");
    }

    #[test]
    fn read_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        assert!(matches!(
            store.read(id(3)).unwrap_err(),
            MdStoreError::NotFound { .. }
        ));
    }

    #[test]
    fn remove_tolerates_absence() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.remove(id(4)).unwrap();
        store.put(id(4), b"bytes").unwrap();
        store.remove(id(4)).unwrap();
        assert!(matches!(
            store.read(id(4)).unwrap_err(),
            MdStoreError::NotFound { .. }
        ));
    }

    #[test]
    fn paths_are_splayed_on_the_first_byte() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let hex = id(5).to_hex();
        let path = store.path_for(id(5));
        assert!(path.ends_with(PathBuf::from(&hex[..2]).join(&hex[2..])));
    }

    #[cfg(unix)]
    #[test]
    fn files_and_directories_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.put(id(6), b"private").unwrap();
        let path = store.path_for(id(6));
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }
}
