//! Directory-backed store: one file per key.
//!
//! Layout:
//! ```text
//! store_dir/
//!   viewstate.envelope.val
//!   viewstate.legacy%3Av0.val
//! ```
//!
//! Key bytes outside `[A-Za-z0-9._-]` are percent-escaped in file names so
//! [`keys`](PersistentStore::keys) can recover them. Writes go to a hidden
//! temp file which is synced and then renamed over the target, so a crash
//! mid-write never leaves a torn value behind.

use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{DEFAULT_QUOTA, PersistentStore, StorageUsage};
use crate::error::{StoreError, StoreResult};

const EXTENSION: &str = "val";

/// File-backed [`PersistentStore`] with a byte quota.
pub struct FileStore {
    dir: PathBuf,
    quota: usize,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::with_quota(dir, DEFAULT_QUOTA)
    }

    pub fn with_quota(dir: impl Into<PathBuf>, quota: usize) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_key(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.{EXTENSION}.tmp", encode_key(key)))
    }

    /// Value files in the directory with their sizes.
    fn value_files(&self) -> StoreResult<Vec<(String, u64)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type().is_ok_and(|ft| ft.is_file()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{EXTENSION}")) else {
                continue;
            };
            let Some(key) = decode_key(stem) else {
                continue;
            };
            files.push((key, entry.metadata()?.len()));
        }
        Ok(files)
    }

    fn file_len(path: &Path) -> StoreResult<u64> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl PersistentStore for FileStore {
    fn name(&self) -> &str {
        "FileStore"
    }

    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        let final_path = self.value_path(key);
        let used: u64 = self.value_files()?.iter().map(|(_, len)| len).sum();
        let existing = Self::file_len(&final_path)?;
        let used_after = (used - existing) as usize + bytes.len();
        if used_after > self.quota {
            return Err(StoreError::CapacityExceeded {
                requested: bytes.len(),
                quota: self.quota,
            });
        }

        // Atomic write: temp file, sync, rename into place.
        let tmp_path = self.temp_path(key);
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(path = %final_path.display(), bytes = bytes.len(), "wrote store value");
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self.value_files()?.into_iter().map(|(k, _)| k).collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn estimate_usage(&self) -> StoreResult<StorageUsage> {
        let used: u64 = self.value_files()?.iter().map(|(_, len)| len).sum();
        Ok(StorageUsage {
            used: used as usize,
            quota: self.quota,
        })
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .field("quota", &self.quota)
            .finish()
    }
}

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-')
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_safe(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    // A leading dot would hide the file and collide with temp files.
    if out.starts_with('.') {
        out.replace_range(..1, "%2E");
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
