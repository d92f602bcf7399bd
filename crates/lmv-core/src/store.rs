//! On-disk persistence for the three vault artifacts.
//!
//! Layout inside the data directory:
//!
//! - `vault.enc` — one UTF-8 JSON envelope (the snapshot)
//! - `ledger.jsonl.enc` — zero or more LF-terminated JSON envelope lines
//! - `meta.json` — plaintext, non-secret metadata
//!
//! Writes follow the temp-file + fsync + rename protocol for whole-file
//! replacement and fsync-before-close for journal appends, so a crash leaves
//! either the old complete artifact or the new complete artifact. At worst
//! the journal carries one torn final line, which the engine discards on
//! read.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::model::VaultMetadata;

/// Snapshot envelope file name.
pub const VAULT_FILE: &str = "vault.enc";

/// Journal file name.
pub const LEDGER_FILE: &str = "ledger.jsonl.enc";

/// Metadata file name.
pub const META_FILE: &str = "meta.json";

/// Size cap for the snapshot and metadata files.
pub const MAX_RECORD_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Size cap for the journal file as a whole.
pub const MAX_LEDGER_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A file exceeded its size cap.
    #[error("file too large: {} is {size} bytes, cap is {max}", path.display())]
    FileTooLarge {
        /// Offending path.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
        /// Configured cap in bytes.
        max: u64,
    },

    /// The target path has no parent directory.
    #[error("path has no parent directory: {}", path.display())]
    NoParentDirectory {
        /// Path with no parent.
        path: PathBuf,
    },

    /// JSON (de)serialization of a persisted artifact failed.
    #[error("artifact serialization failed for {}: {source}", path.display())]
    Serde {
        /// Offending path.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// What the store was doing.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Handle to one data directory holding the three artifacts.
#[derive(Debug, Clone)]
pub struct VaultStore {
    data_dir: PathBuf,
}

impl VaultStore {
    /// Creates a store rooted at `data_dir`. No filesystem access happens
    /// until an operation is called.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the snapshot envelope file.
    #[must_use]
    pub fn vault_path(&self) -> PathBuf {
        self.data_dir.join(VAULT_FILE)
    }

    /// Path of the journal file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    /// Path of the metadata file.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join(META_FILE)
    }

    /// Creates the data directory (mode 0700 on Unix) if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if creation fails.
    pub fn ensure_dir(&self) -> Result<(), StoreError> {
        ensure_dir(&self.data_dir)
    }

    /// Whether the snapshot file exists.
    #[must_use]
    pub fn snapshot_exists(&self) -> bool {
        self.vault_path().is_file()
    }

    /// Whether the journal file exists.
    #[must_use]
    pub fn ledger_exists(&self) -> bool {
        self.ledger_path().is_file()
    }

    /// Whether the metadata file exists.
    #[must_use]
    pub fn metadata_exists(&self) -> bool {
        self.meta_path().is_file()
    }

    /// Reads and parses the snapshot envelope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure, size-cap violation, or JSON
    /// parse failure.
    pub fn read_snapshot(&self) -> Result<Envelope, StoreError> {
        read_json(&self.vault_path(), MAX_RECORD_FILE_SIZE)
    }

    /// Atomically replaces the snapshot envelope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or any step of the atomic
    /// write protocol fails.
    pub fn write_snapshot(&self, envelope: &Envelope) -> Result<(), StoreError> {
        write_json_atomic(&self.vault_path(), envelope)
    }

    /// Appends one envelope line to the journal and fsyncs before returning.
    ///
    /// The line (JSON plus trailing LF) is written with a single `write_all`
    /// call and made durable with `sync_all`; the append is on disk when
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn append_ledger(&self, envelope: &Envelope) -> Result<(), StoreError> {
        let path = self.ledger_path();
        let mut line = serde_json::to_string(envelope).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io("open journal for append", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io("append journal line", e))?;
        file.sync_all()
            .map_err(|e| StoreError::io("fsync journal", e))?;
        Ok(())
    }

    /// Reads all journal lines as raw strings, excluding the trailing LF.
    ///
    /// Decoding (envelope parse, decryption) is the engine's concern; this
    /// just splits the file so the engine can apply the torn-tail rule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or size-cap violation.
    pub fn read_ledger_lines(&self) -> Result<Vec<String>, StoreError> {
        let path = self.ledger_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let bytes = read_bounded(&path, MAX_LEDGER_FILE_SIZE)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Atomically rewrites the journal to exactly the given lines.
    ///
    /// Used to drop a torn final line before the next append; a torn tail
    /// may lack its LF, and appending after it would merge two records into
    /// one garbage line.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the atomic write fails.
    pub fn rewrite_ledger(&self, lines: &[String]) -> Result<(), StoreError> {
        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        atomic_write(&self.ledger_path(), text.as_bytes())
    }

    /// Truncates the journal to an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on failure.
    pub fn truncate_ledger(&self) -> Result<(), StoreError> {
        let file = File::create(self.ledger_path())
            .map_err(|e| StoreError::io("truncate journal", e))?;
        file.sync_all()
            .map_err(|e| StoreError::io("fsync truncated journal", e))?;
        Ok(())
    }

    /// Reads and parses the metadata file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure, size-cap violation, or JSON
    /// parse failure (including unknown fields).
    pub fn read_metadata(&self) -> Result<VaultMetadata, StoreError> {
        read_json(&self.meta_path(), MAX_RECORD_FILE_SIZE)
    }

    /// Atomically replaces the metadata file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or the atomic write fails.
    pub fn write_metadata(&self, metadata: &VaultMetadata) -> Result<(), StoreError> {
        write_json_atomic(&self.meta_path(), metadata)
    }
}

/// Writes `data` to `path` via temp file + fsync + rename + parent fsync.
///
/// A reader never observes a partial file: the rename installs the complete
/// new content or nothing.
///
/// # Errors
///
/// Returns [`StoreError`] if any step fails.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::NoParentDirectory {
        path: path.to_path_buf(),
    })?;
    ensure_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| StoreError::io("create temp file", e))?;
    tmp.write_all(data)
        .map_err(|e| StoreError::io("write temp file", e))?;
    tmp.flush()
        .map_err(|e| StoreError::io("flush temp file", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io("fsync temp file", e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io("rename temp file into place", e.error))?;

    fsync_dir(parent)
}

/// Reads at most `max_size` bytes from `path`, rejecting larger files.
///
/// # Errors
///
/// Returns [`StoreError::FileTooLarge`] past the cap, [`StoreError::Io`]
/// otherwise.
pub fn read_bounded(path: &Path, max_size: u64) -> Result<Vec<u8>, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(format!("open {}", path.display()), e))?;
    let metadata = file
        .metadata()
        .map_err(|e| StoreError::io("fstat for size check", e))?;
    if metadata.len() > max_size {
        return Err(StoreError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max: max_size,
        });
    }

    let mut buf = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or(0));
    file.take(max_size.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| StoreError::io("bounded read", e))?;

    // The file may have grown between stat and read; `take` caps the damage
    // and this check rejects the overflow.
    if buf.len() as u64 > max_size {
        return Err(StoreError::FileTooLarge {
            path: path.to_path_buf(),
            size: buf.len() as u64,
            max: max_size,
        });
    }
    Ok(buf)
}

fn read_json<T: DeserializeOwned>(path: &Path, max_size: u64) -> Result<T, StoreError> {
    let bytes = read_bounded(path, max_size)?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string(value).map_err(|source| StoreError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, json.as_bytes())
}

fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    if dir.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(|e| StoreError::io("create data directory with mode 0700", e))?;
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir).map_err(|e| StoreError::io("create data directory", e))?;
    }

    Ok(())
}

/// fsyncs a directory so renames within it are durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), StoreError> {
    let handle = File::open(dir).map_err(|e| StoreError::io("open directory for fsync", e))?;
    handle
        .sync_all()
        .map_err(|e| StoreError::io("fsync directory", e))?;
    Ok(())
}
