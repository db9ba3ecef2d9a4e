/*
 * This file is a part of Arn
 */

//! Persistent object storage (§6.5): a `PersistBackend` collaborator
//! interface plus a directory-of-files implementation, one file per
//! persisted path, simplified from a typical embedded database's binary table format
//! (`server/src/storage/v1/{flush,unflush,preload}.rs`'s load/save split).
//! Each record is `meta (1 byte) || crc32 (4 bytes, LE) || value bytes
//! (§6.3 export encoding)`; the crc guards against truncated writes
//! surviving a crash, the way the teacher's storage engine checksums its
//! journal batches (`engine/storage/v1/raw/batch_jrnl/persist.rs`).

use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use crate::tree::Path;
use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::HashSet;
use std::path::{Path as FsPath, PathBuf};
use std::sync::RwLock;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Per-record metadata: whether the path must be preloaded at startup
/// (`mandatory`) and whether it is currently bound to a live `Save`-mode
/// link (`used`). Persisted alongside the value so a restart can tell
/// mandatory records from ones that merely happened to be saved once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub mandatory: bool,
    pub used: bool,
}

impl RecordMeta {
    fn to_byte(self) -> u8 {
        (self.mandatory as u8) | ((self.used as u8) << 1)
    }

    fn from_byte(b: u8) -> Self {
        RecordMeta { mandatory: b & 0x01 != 0, used: b & 0x02 != 0 }
    }
}

/// §6.5's collaborator interface. A server mounts one backend per
/// `Save`-mode subtree.
pub trait PersistBackend: Send + Sync {
    fn load(&self, path: &Path) -> ArnResult<Option<(Vec<u8>, RecordMeta)>>;
    fn save(&self, path: &Path, value_bytes: &[u8], meta: RecordMeta) -> ArnResult<()>;
    fn list_mandatory(&self) -> ArnResult<Vec<Path>>;
    fn list_used(&self, used: bool) -> ArnResult<Vec<Path>>;
    fn archive(&self, name: Option<&str>) -> ArnResult<()>;
}

/// One file per path under `root`, named by escaping `/` so nested paths
/// don't collide with the filesystem's own directory separators.
pub struct DirPersist {
    root: PathBuf,
    index: RwLock<HashSet<String>>,
}

fn file_name_for(path: &Path) -> String {
    path.as_str().replace('/', "%2F")
}

impl DirPersist {
    pub fn open(root: impl Into<PathBuf>) -> ArnResult<DirPersist> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let mut index = HashSet::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                index.insert(name.to_string());
            }
        }
        Ok(DirPersist { root, index: RwLock::new(index) })
    }

    fn file_path(&self, path: &Path) -> PathBuf {
        self.root.join(file_name_for(path))
    }

    fn path_from_file_name(name: &str) -> Path {
        Path::parse(&name.replace("%2F", "/")).expect("persisted file names are escaped paths")
    }
}

impl PersistBackend for DirPersist {
    fn load(&self, path: &Path) -> ArnResult<Option<(Vec<u8>, RecordMeta)>> {
        let file = self.file_path(path);
        if !file.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&file)?;
        if raw.len() < 5 {
            return Err(ArnError::new(ErrorKind::Io, Subsystem::Persist, format!("truncated record: {path}")));
        }
        let meta = RecordMeta::from_byte(raw[0]);
        let stored_crc = u32::from_le_bytes(raw[1..5].try_into().unwrap());
        let value_bytes = raw[5..].to_vec();
        if CRC32.checksum(&value_bytes) != stored_crc {
            return Err(ArnError::new(ErrorKind::Io, Subsystem::Persist, format!("checksum mismatch: {path}")));
        }
        Ok(Some((value_bytes, meta)))
    }

    fn save(&self, path: &Path, value_bytes: &[u8], meta: RecordMeta) -> ArnResult<()> {
        let mut raw = Vec::with_capacity(5 + value_bytes.len());
        raw.push(meta.to_byte());
        raw.extend_from_slice(&CRC32.checksum(value_bytes).to_le_bytes());
        raw.extend_from_slice(value_bytes);
        let file = self.file_path(path);
        let tmp = file.with_extension("tmp");
        std::fs::write(&tmp, &raw)?;
        std::fs::rename(&tmp, &file)?;
        self.index.write().unwrap().insert(file_name_for(path));
        Ok(())
    }

    fn list_mandatory(&self) -> ArnResult<Vec<Path>> {
        let mut out = Vec::new();
        for name in self.index.read().unwrap().iter() {
            let path = Self::path_from_file_name(name);
            if let Some((_, meta)) = self.load(&path)? {
                if meta.mandatory {
                    out.push(path);
                }
            }
        }
        Ok(out)
    }

    fn list_used(&self, used: bool) -> ArnResult<Vec<Path>> {
        let mut out = Vec::new();
        for name in self.index.read().unwrap().iter() {
            let path = Self::path_from_file_name(name);
            if let Some((_, meta)) = self.load(&path)? {
                if meta.used == used {
                    out.push(path);
                }
            }
        }
        Ok(out)
    }

    fn archive(&self, name: Option<&str>) -> ArnResult<()> {
        let archive_name = name.map(|n| n.to_string()).unwrap_or_else(|| "archive.tar".to_string());
        let dest = self.root.with_file_name(archive_name);
        copy_dir_flat(&self.root, &dest)
    }
}

fn copy_dir_flat(src: &FsPath, dest: &FsPath) -> ArnResult<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::copy(entry.path(), dest.join(entry.file_name()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Value;

    #[test]
    fn save_then_load_roundtrips_value_and_meta() {
        let dir = std::env::temp_dir().join(format!("arn-persist-test-{}", std::process::id()));
        let backend = DirPersist::open(&dir).unwrap();
        let path = Path::parse("/Local/Config/retries").unwrap();
        let value = Value::Int(42);
        backend.save(&path, &value.export(), RecordMeta { mandatory: true, used: true }).unwrap();

        let (bytes, meta) = backend.load(&path).unwrap().unwrap();
        assert_eq!(Value::import(&bytes), value);
        assert!(meta.mandatory);
        assert!(meta.used);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_record_loads_as_none() {
        let dir = std::env::temp_dir().join(format!("arn-persist-test-missing-{}", std::process::id()));
        let backend = DirPersist::open(&dir).unwrap();
        let path = Path::parse("/Local/nope").unwrap();
        assert!(backend.load(&path).unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn list_mandatory_reflects_saved_flag() {
        let dir = std::env::temp_dir().join(format!("arn-persist-test-mandatory-{}", std::process::id()));
        let backend = DirPersist::open(&dir).unwrap();
        let mandatory_path = Path::parse("/Local/A").unwrap();
        let optional_path = Path::parse("/Local/B").unwrap();
        backend
            .save(&mandatory_path, &Value::Int(1).export(), RecordMeta { mandatory: true, used: true })
            .unwrap();
        backend
            .save(&optional_path, &Value::Int(2).export(), RecordMeta { mandatory: false, used: true })
            .unwrap();

        let mandatory = backend.list_mandatory().unwrap();
        assert_eq!(mandatory, vec![mandatory_path]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
