//! Durable file cache strategy: one JSON file per key.
//!
//! File names are a reversible, filesystem-safe encoding of the key, but the
//! original key is also stored inside the payload so enumeration never has to
//! decode names. Writes go to a temp file that is renamed over the target, so a
//! reader sees either the old entry or the new one.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Cache, CacheEntry, CacheStrategy, expiry_from};
use crate::clock::Clock;
use crate::error::CacheError;

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";
/// Leaves room for the extension and the temp-file suffix within the
/// 255-byte file name limit.
const MAX_STEM_LEN: usize = 160;

/// On-disk payload.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    value: serde_json::Value,
    expires_at: u64,
}

/// Cache that persists each entry as a file under `directory`.
pub struct FileCache {
    directory: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileCache {
    /// Open (creating if needed) a file cache rooted at `directory`.
    pub async fn open(directory: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory, clock })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{ENTRY_EXTENSION}", encode_key(key)))
    }

    async fn remove_quietly(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
    }

    /// Read and parse one entry file. Unparsable files are deleted and read as absent.
    async fn read_record(&self, path: &Path) -> Result<Option<FileRecord>, CacheError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<FileRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupted cache file, deleting");
                self.remove_quietly(path).await;
                Ok(None)
            }
        }
    }

    /// Paths of every entry file currently in the directory.
    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut read_dir = match fs::read_dir(&self.directory).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl Cache for FileCache {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::File
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let record = FileRecord {
            key: key.to_string(),
            value,
            expires_at: expiry_from(self.clock.now_ms(), ttl),
        };
        let bytes = serde_json::to_vec(&record)?;
        write_atomic(&self.entry_path(key), &bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let path = self.entry_path(key);
        let Some(record) = self.read_record(&path).await? else {
            return Ok(None);
        };

        if record.key != key {
            warn!(key, stored_key = %record.key, "Cache file key mismatch, deleting");
            self.remove_quietly(&path).await;
            return Ok(None);
        }

        if self.clock.now_ms() >= record.expires_at {
            debug!(key, "Evicted expired cache file on read");
            self.remove_quietly(&path).await;
            return Ok(None);
        }

        Ok(Some(record.value))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut read_dir = match fs::read_dir(&self.directory).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some(ENTRY_EXTENSION | TEMP_EXTENSION)
            ) {
                self.remove_quietly(&path).await;
            }
        }
        Ok(())
    }

    async fn get_all_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let now = self.clock.now_ms();
        let mut entries = Vec::new();

        for path in self.entry_files().await? {
            let record = match self.read_record(&path).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache file");
                    continue;
                }
            };

            if now >= record.expires_at {
                self.remove_quietly(&path).await;
                continue;
            }

            entries.push(CacheEntry {
                key: record.key,
                value: record.value,
                ttl_ms: record.expires_at - now,
            });
        }

        Ok(entries)
    }
}

/// Encode a key as a file stem: ASCII alphanumerics and `-` pass through,
/// every other byte becomes `_XX`. The mapping never yields `.` or a path
/// separator.
///
/// Stems longer than [`MAX_STEM_LEN`] are replaced by `_h` and the SHA-256 of
/// the key. `_` is otherwise always followed by an uppercase hex digit, so
/// hashed stems cannot collide with plain ones. The key stored in the payload
/// tells entries apart if two keys ever hash alike.
pub(crate) fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            let _ = write!(out, "_{byte:02X}");
        }
    }
    if out.len() > MAX_STEM_LEN {
        return format!("_h{:x}", Sha256::digest(key.as_bytes()));
    }
    out
}

/// Write `bytes` to `path` through a uniquely named temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(
        "{file_name}.{}.{TEMP_EXTENSION}",
        Uuid::new_v4().simple()
    ));

    fs::write(&temp, bytes).await?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}
