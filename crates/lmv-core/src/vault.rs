//! The vault engine: state assembly, patch admission, pagination,
//! compaction, and integrity verification.
//!
//! The engine exclusively owns mutation of the three persisted artifacts.
//! One mutex serializes every mutating operation (patch, compaction, the
//! rotation rewrite); reads take no lock and instead rely on the ordering
//! guarantee of the persistence layer: the snapshot is read before the
//! journal, snapshot replacement is atomic, and a journal observed
//! afterwards always extends the snapshot that was read.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::canonical::canonical_json;
use crate::envelope::{self, Envelope, KeyDomain};
use crate::error::VaultError;
use crate::model::{
    ledger_aad, now_rfc3339_millis, parse_if_match, vault_aad, AuthMode, JournalEntry, Memory,
    Snapshot, VaultMetadata, SCHEMA_VERSION, VAULT_UID,
};
use crate::patch;
use crate::store::VaultStore;

/// Memory plus the two cursors, as returned by read operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentState {
    /// The assembled memory document.
    pub memory: Memory,
    /// Cursor of the last entry folded into the on-disk snapshot.
    pub snapshot_cursor: u64,
    /// Total number of journal entries.
    pub ledger_cursor: u64,
}

/// Result of an admitted patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOutcome {
    /// State after the append.
    #[serde(flatten)]
    pub state: CurrentState,
    /// Cursor of the entry this patch produced.
    pub applied_entry_cursor: u64,
}

/// One page of journal entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerPage {
    /// Decrypted entries with `cursor > since`, oldest first.
    pub entries: Vec<JournalEntry>,
    /// Cursor of the last returned entry, or the request's `since` when the
    /// page is empty.
    pub next_cursor: u64,
    /// Whether entries beyond this page exist.
    pub has_more: bool,
    /// Cursor of the last entry folded into the snapshot.
    pub snapshot_cursor: u64,
    /// Total number of journal entries.
    pub ledger_cursor: u64,
}

/// Result of a compaction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotOutcome {
    /// Cursor the snapshot now covers.
    pub snapshot_cursor: u64,
    /// Total number of journal entries.
    pub ledger_cursor: u64,
    /// Memory version captured by the snapshot.
    pub memory_version: u64,
}

/// Everything the vault persists, in plaintext. Produced for rotation.
#[derive(Debug, Clone)]
pub struct VaultExport {
    /// The decrypted snapshot.
    pub snapshot: Snapshot,
    /// All decrypted journal entries in order.
    pub entries: Vec<JournalEntry>,
    /// The plaintext metadata.
    pub metadata: VaultMetadata,
}

/// Handle to one vault data directory opened under one passphrase.
pub struct VaultEngine {
    store: VaultStore,
    passphrase: Zeroizing<String>,
    write_lock: Mutex<()>,
}

impl VaultEngine {
    /// Opens (and if necessary initializes) the vault at `data_dir`.
    ///
    /// Missing artifacts are created: an empty-memory snapshot, an empty
    /// journal, and default metadata. Existing metadata is checked against
    /// the supported parameter suite.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Corruption`] for unsupported metadata and
    /// [`VaultError::Internal`] for I/O failures.
    pub fn open(data_dir: &Path, passphrase: &str) -> Result<Self, VaultError> {
        let engine = Self::attach(data_dir, passphrase);
        engine.store.ensure_dir()?;
        crate::rotation::recover_interrupted(data_dir)?;

        let ts = now_rfc3339_millis();
        if !engine.store.metadata_exists() {
            engine.store.write_metadata(&VaultMetadata::new(&ts))?;
            info!(data_dir = %data_dir.display(), "wrote default vault metadata");
        }
        let metadata = engine.store.read_metadata()?;
        metadata
            .check_supported()
            .map_err(VaultError::Corruption)?;

        if !engine.store.snapshot_exists() {
            let snapshot = Snapshot::initial(&ts);
            engine.write_snapshot_record(&snapshot)?;
            info!(data_dir = %data_dir.display(), "initialized empty vault snapshot");
        }
        if !engine.store.ledger_exists() {
            engine.store.truncate_ledger()?;
        }

        Ok(engine)
    }

    /// Builds a handle without touching the filesystem. The rotation
    /// rewrite uses this to address a staging directory it populates by
    /// hand.
    pub(crate) fn attach(data_dir: &Path, passphrase: &str) -> Self {
        Self {
            store: VaultStore::new(data_dir),
            passphrase: Zeroizing::new(passphrase.to_string()),
            write_lock: Mutex::new(()),
        }
    }

    /// The persistence handle backing this engine.
    #[must_use]
    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    /// Assembles the current memory by replaying the journal over the
    /// snapshot, verifying the hash chain and version continuity on the way.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Corruption`] on any integrity failure.
    pub fn current_state(&self) -> Result<CurrentState, VaultError> {
        let (snapshot, entries, memory) = self.assemble()?;
        Ok(CurrentState {
            memory,
            snapshot_cursor: snapshot.snapshot_cursor,
            ledger_cursor: entries.len() as u64,
        })
    }

    /// Admits one JSON-Patch mutation.
    ///
    /// The patch is validated and the precondition parsed before the lock is
    /// taken; state assembly, application, and the fsync'd append happen
    /// inside the critical section. The entry is durable on disk before this
    /// returns.
    ///
    /// # Errors
    ///
    /// - [`VaultError::BadRequest`] for a malformed patch or precondition
    /// - [`VaultError::Conflict`] when `if_match` is stale
    /// - [`VaultError::PatchApply`] when the patch cannot be applied
    /// - [`VaultError::Corruption`] when stored state fails verification
    pub fn patch_memory(
        &self,
        if_match: &str,
        raw_patch: Value,
        actor: &str,
        reason: &str,
        auth: AuthMode,
    ) -> Result<PatchOutcome, VaultError> {
        let parsed = patch::parse_patch(&raw_patch)?;
        let expected_version = parse_if_match(if_match).ok_or_else(|| {
            VaultError::bad_request(format!("malformed If-Match {if_match:?}, expected \"v{{n}}\""))
        })?;

        let _guard = self.lock()?;
        let (snapshot, entries, memory) = self.assemble()?;
        if expected_version != memory.version {
            return Err(VaultError::Conflict {
                current_etag: memory.etag(),
            });
        }

        let next_blocks = patch::apply_to_blocks(&memory.blocks, &parsed)?;

        // A torn final line was only discarded logically; drop it from the
        // file before appending after it.
        let raw_lines = self.store.read_ledger_lines()?;
        if raw_lines.len() > entries.len() {
            self.store.rewrite_ledger(&raw_lines[..entries.len()])?;
        }

        let cursor = entries.len() as u64 + 1;
        let ts = now_rfc3339_millis();
        let mut entry = JournalEntry {
            cursor,
            ts: ts.clone(),
            actor: actor.to_string(),
            base_version: memory.version,
            new_version: memory.version + 1,
            reason: reason.to_string(),
            auth: Some(auth),
            patch: raw_patch,
            prev_hash: entries
                .last()
                .map_or_else(String::new, |last| last.entry_hash.clone()),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();

        let payload = serde_json::to_value(&entry)
            .map_err(|e| VaultError::Internal(format!("entry serialization failed: {e}")))?;
        let envelope = envelope::seal(
            &self.passphrase,
            KeyDomain::Ledger,
            &payload,
            &ledger_aad(cursor),
        )?;
        self.store.append_ledger(&envelope)?;

        debug!(cursor, actor, new_version = entry.new_version, "journal entry appended");

        let new_memory = Memory {
            version: entry.new_version,
            blocks: next_blocks,
            updated_at: ts,
        };
        Ok(PatchOutcome {
            state: CurrentState {
                memory: new_memory,
                snapshot_cursor: snapshot.snapshot_cursor,
                ledger_cursor: cursor,
            },
            applied_entry_cursor: cursor,
        })
    }

    /// Returns one page of journal entries with `cursor > since`.
    ///
    /// `since` is clamped to be non-negative and `limit` to `1..=500`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Corruption`] when the journal fails
    /// verification.
    pub fn get_ledger(&self, since: i64, limit: i64) -> Result<LedgerPage, VaultError> {
        let since = u64::try_from(since.max(0)).unwrap_or(0);
        let limit = usize::try_from(limit.clamp(1, 500)).unwrap_or(1);

        let (snapshot, entries, _memory) = self.assemble()?;
        let ledger_cursor = entries.len() as u64;

        let mut page: Vec<JournalEntry> = Vec::new();
        let mut remaining = 0usize;
        for entry in entries {
            if entry.cursor <= since {
                continue;
            }
            if page.len() < limit {
                page.push(entry);
            } else {
                remaining += 1;
            }
        }

        let next_cursor = page.last().map_or(since, |entry| entry.cursor);
        Ok(LedgerPage {
            has_more: remaining > 0,
            next_cursor,
            entries: page,
            snapshot_cursor: snapshot.snapshot_cursor,
            ledger_cursor,
        })
    }

    /// Folds the journal into a fresh snapshot.
    ///
    /// A no-op when the snapshot already covers the whole journal. The
    /// journal itself is retained: replay skips folded entries but the audit
    /// chain stays intact.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Corruption`] on verification failure and
    /// [`VaultError::Internal`] on I/O failure.
    pub fn snapshot(&self) -> Result<SnapshotOutcome, VaultError> {
        let _guard = self.lock()?;
        let (snapshot, entries, memory) = self.assemble()?;
        let ledger_cursor = entries.len() as u64;

        if ledger_cursor <= snapshot.snapshot_cursor {
            return Ok(SnapshotOutcome {
                snapshot_cursor: snapshot.snapshot_cursor,
                ledger_cursor,
                memory_version: memory.version,
            });
        }

        let memory_version = memory.version;
        let new_snapshot = Snapshot {
            uid: VAULT_UID.to_string(),
            schema_version: SCHEMA_VERSION,
            memory,
            snapshot_cursor: ledger_cursor,
            updated_at: now_rfc3339_millis(),
        };
        self.write_snapshot_record(&new_snapshot)?;
        info!(snapshot_cursor = ledger_cursor, memory_version, "vault compacted");

        Ok(SnapshotOutcome {
            snapshot_cursor: ledger_cursor,
            ledger_cursor,
            memory_version,
        })
    }

    /// Runs the full integrity verification without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Corruption`] on any chain or replay failure.
    pub fn verify_ledger(&self) -> Result<u64, VaultError> {
        let (_snapshot, entries, _memory) = self.assemble()?;
        Ok(entries.len() as u64)
    }

    /// Decrypts everything the vault persists, for the rotation rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Corruption`] when any artifact fails
    /// verification.
    pub fn export(&self) -> Result<VaultExport, VaultError> {
        let (snapshot, entries, _memory) = self.assemble()?;
        let metadata = self.store.read_metadata()?;
        metadata.check_supported().map_err(VaultError::Corruption)?;
        Ok(VaultExport {
            snapshot,
            entries,
            metadata,
        })
    }

    /// Seals and atomically installs a snapshot record.
    pub(crate) fn write_snapshot_record(&self, snapshot: &Snapshot) -> Result<(), VaultError> {
        let payload = serde_json::to_value(snapshot)
            .map_err(|e| VaultError::Internal(format!("snapshot serialization failed: {e}")))?;
        let envelope = envelope::seal(
            &self.passphrase,
            KeyDomain::Vault,
            &payload,
            &vault_aad(snapshot.memory.version),
        )?;
        self.store.write_snapshot(&envelope)?;
        Ok(())
    }

    /// Seals and appends a journal entry record. Used by the rotation
    /// rewrite; regular admission goes through [`Self::patch_memory`].
    pub(crate) fn append_entry_record(&self, entry: &JournalEntry) -> Result<(), VaultError> {
        let payload = serde_json::to_value(entry)
            .map_err(|e| VaultError::Internal(format!("entry serialization failed: {e}")))?;
        let envelope = envelope::seal(
            &self.passphrase,
            KeyDomain::Ledger,
            &payload,
            &ledger_aad(entry.cursor),
        )?;
        self.store.append_ledger(&envelope)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ()>, VaultError> {
        self.write_lock
            .lock()
            .map_err(|_| VaultError::Internal("engine lock poisoned".to_string()))
    }

    /// Loads the snapshot, the verified journal, and the replayed memory.
    ///
    /// The snapshot is read before the journal so a concurrent compaction
    /// can only make the journal longer than the snapshot expects, never
    /// shorter.
    fn assemble(&self) -> Result<(Snapshot, Vec<JournalEntry>, Memory), VaultError> {
        let snapshot = self.load_snapshot()?;
        let entries = self.load_entries()?;

        if snapshot.snapshot_cursor > entries.len() as u64 {
            return Err(VaultError::corruption(format!(
                "snapshot covers cursor {} but the journal has only {} entries",
                snapshot.snapshot_cursor,
                entries.len()
            )));
        }
        if snapshot.snapshot_cursor > 0 {
            let folded = &entries[snapshot.snapshot_cursor as usize - 1];
            if folded.new_version != snapshot.memory.version {
                return Err(VaultError::corruption(format!(
                    "snapshot version {} disagrees with entry {} (new_version {})",
                    snapshot.memory.version, folded.cursor, folded.new_version
                )));
            }
        } else if snapshot.memory.version != 0 {
            return Err(VaultError::corruption(format!(
                "snapshot at cursor 0 must be version 0, found {}",
                snapshot.memory.version
            )));
        }

        let mut memory = snapshot.memory.clone();
        for entry in &entries {
            if entry.cursor <= snapshot.snapshot_cursor {
                continue;
            }
            if entry.base_version != memory.version {
                return Err(VaultError::corruption(format!(
                    "entry {} applies to version {} but replay reached {}",
                    entry.cursor, entry.base_version, memory.version
                )));
            }
            let parsed = patch::parse_patch(&entry.patch)
                .map_err(|e| VaultError::corruption(format!("entry {}: {e}", entry.cursor)))?;
            memory.blocks = patch::apply_to_blocks(&memory.blocks, &parsed)
                .map_err(|e| VaultError::corruption(format!("entry {}: {e}", entry.cursor)))?;
            memory.version = entry.new_version;
            memory.updated_at.clone_from(&entry.ts);
        }

        Ok((snapshot, entries, memory))
    }

    fn load_snapshot(&self) -> Result<Snapshot, VaultError> {
        let envelope = self.store.read_snapshot()?;
        let (payload, recorded_aad) =
            envelope::open(&self.passphrase, KeyDomain::Vault, &envelope)?;

        let snapshot: Snapshot = serde_json::from_value(payload)
            .map_err(|e| VaultError::corruption(format!("snapshot payload: {e}")))?;
        snapshot.check_identity().map_err(VaultError::Corruption)?;
        patch::ensure_blocks_shape(&snapshot.memory.blocks)
            .map_err(|e| VaultError::corruption(format!("snapshot blocks: {e}")))?;

        let expected = vault_aad(snapshot.memory.version);
        if canonical_json(&recorded_aad) != canonical_json(&expected) {
            return Err(VaultError::corruption(
                "snapshot aad does not match its payload".to_string(),
            ));
        }
        Ok(snapshot)
    }

    /// Reads and decrypts the journal, applying the torn-tail rule, then
    /// verifies cursor density, the hash chain, and version continuity.
    fn load_entries(&self) -> Result<Vec<JournalEntry>, VaultError> {
        let lines = self.store.read_ledger_lines()?;
        let mut entries = Vec::with_capacity(lines.len());

        let last_index = lines.len().saturating_sub(1);
        for (index, line) in lines.iter().enumerate() {
            match self.decode_entry(line) {
                Ok(entry) => entries.push(entry),
                Err(err) if index == last_index => {
                    // A crash mid-append leaves exactly one undecodable final
                    // line; anything earlier is real damage.
                    warn!(line = index + 1, %err, "discarding torn final journal line");
                    break;
                },
                Err(err) => {
                    return Err(VaultError::corruption(format!(
                        "journal line {} failed to decode: {err}",
                        index + 1
                    )));
                },
            }
        }

        let mut prev_hash = String::new();
        for (index, entry) in entries.iter().enumerate() {
            let expected_cursor = index as u64 + 1;
            if entry.cursor != expected_cursor {
                return Err(VaultError::corruption(format!(
                    "journal cursor {} at position {expected_cursor}",
                    entry.cursor
                )));
            }
            if entry.new_version != entry.base_version + 1 {
                return Err(VaultError::corruption(format!(
                    "entry {} new_version {} is not base_version {} + 1",
                    entry.cursor, entry.new_version, entry.base_version
                )));
            }
            if index == 0 {
                if entry.base_version != 0 {
                    return Err(VaultError::corruption(format!(
                        "entry 1 base_version {} is not 0",
                        entry.base_version
                    )));
                }
            } else if entry.base_version != entries[index - 1].new_version {
                return Err(VaultError::corruption(format!(
                    "entry {} base_version {} does not continue entry {}",
                    entry.cursor,
                    entry.base_version,
                    entry.cursor - 1
                )));
            }
            if entry.prev_hash != prev_hash {
                return Err(VaultError::corruption(format!(
                    "entry {} prev_hash does not chain",
                    entry.cursor
                )));
            }
            let recomputed = entry.compute_hash();
            if recomputed != entry.entry_hash {
                return Err(VaultError::corruption(format!(
                    "entry {} hash mismatch",
                    entry.cursor
                )));
            }
            prev_hash.clone_from(&entry.entry_hash);
        }

        Ok(entries)
    }

    fn decode_entry(&self, line: &str) -> Result<JournalEntry, VaultError> {
        let envelope: Envelope = serde_json::from_str(line)
            .map_err(|e| VaultError::corruption(format!("envelope parse: {e}")))?;
        let (payload, recorded_aad) =
            envelope::open(&self.passphrase, KeyDomain::Ledger, &envelope)?;
        let entry: JournalEntry = serde_json::from_value(payload)
            .map_err(|e| VaultError::corruption(format!("entry payload: {e}")))?;

        let expected = ledger_aad(entry.cursor);
        if canonical_json(&recorded_aad) != canonical_json(&expected) {
            return Err(VaultError::corruption(format!(
                "entry {} aad does not match its payload",
                entry.cursor
            )));
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const PASS: &str = "unit-pass";

    fn engine(dir: &Path) -> VaultEngine {
        VaultEngine::open(dir, PASS).unwrap()
    }

    fn add_op(path: &str, value: Value) -> Value {
        json!([{"op": "add", "path": path, "value": value}])
    }

    #[test]
    fn fresh_vault_starts_at_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let state = engine(dir.path()).current_state().unwrap();
        assert_eq!(state.memory.version, 0);
        assert_eq!(state.snapshot_cursor, 0);
        assert_eq!(state.ledger_cursor, 0);
        assert_eq!(
            state.memory.blocks,
            json!({"identity": {}, "methodology": {}, "projects": {}, "rules": {}})
        );
    }

    #[test]
    fn patch_advances_version_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let vault = engine(dir.path());

        let outcome = vault
            .patch_memory(
                "\"v0\"",
                add_op("/identity/name", json!("Alice")),
                "alice",
                "seed",
                AuthMode::None,
            )
            .unwrap();
        assert_eq!(outcome.applied_entry_cursor, 1);
        assert_eq!(outcome.state.memory.version, 1);
        assert_eq!(outcome.state.memory.blocks["identity"]["name"], json!("Alice"));

        let state = vault.current_state().unwrap();
        assert_eq!(state, outcome.state);
    }

    #[test]
    fn stale_if_match_conflicts_with_current_etag() {
        let dir = tempfile::tempdir().unwrap();
        let vault = engine(dir.path());
        vault
            .patch_memory(
                "\"v0\"",
                add_op("/identity/name", json!("Alice")),
                "alice",
                "seed",
                AuthMode::None,
            )
            .unwrap();

        let err = vault
            .patch_memory(
                "\"v0\"",
                add_op("/identity/color", json!("green")),
                "bob",
                "late",
                AuthMode::None,
            )
            .unwrap_err();
        match err {
            VaultError::Conflict { current_etag } => assert_eq!(current_etag, "v1"),
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn malformed_if_match_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let vault = engine(dir.path());
        for raw in ["v0", "\"0\"", "\"v1x\"", "*", ""] {
            let err = vault
                .patch_memory(raw, json!([]), "a", "r", AuthMode::None)
                .unwrap_err();
            assert!(matches!(err, VaultError::BadRequest(_)), "{raw:?}: {err}");
        }
    }

    #[test]
    fn reopen_recovers_state_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let vault = engine(dir.path());
            vault
                .patch_memory(
                    "\"v0\"",
                    add_op("/projects/lmv", json!({"status": "active"})),
                    "alice",
                    "seed",
                    AuthMode::None,
                )
                .unwrap();
        }
        let state = engine(dir.path()).current_state().unwrap();
        assert_eq!(state.memory.version, 1);
        assert_eq!(state.memory.blocks["projects"]["lmv"]["status"], json!("active"));
    }

    #[test]
    fn ledger_pagination_clamps_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let vault = engine(dir.path());
        for i in 0..5 {
            vault
                .patch_memory(
                    &format!("\"v{i}\""),
                    add_op(&format!("/projects/p{i}"), json!(i)),
                    "alice",
                    "fill",
                    AuthMode::None,
                )
                .unwrap();
        }

        let page = vault.get_ledger(0, 2).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.next_cursor, 2);
        assert!(page.has_more);
        assert_eq!(page.ledger_cursor, 5);

        let page = vault.get_ledger(4, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.next_cursor, 5);
        assert!(!page.has_more);

        let empty = vault.get_ledger(9, 10).unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!(empty.next_cursor, 9);

        let negative = vault.get_ledger(-3, 0).unwrap();
        assert_eq!(negative.entries.len(), 1, "limit clamps up to 1");
        assert_eq!(negative.entries[0].cursor, 1);
    }

    #[test]
    fn compaction_is_replay_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let vault = engine(dir.path());
        for i in 0..3 {
            vault
                .patch_memory(
                    &format!("\"v{i}\""),
                    add_op(&format!("/rules/r{i}"), json!("x")),
                    "alice",
                    "fill",
                    AuthMode::None,
                )
                .unwrap();
        }

        let before = vault.current_state().unwrap();
        let outcome = vault.snapshot().unwrap();
        assert_eq!(outcome.snapshot_cursor, 3);
        assert_eq!(outcome.ledger_cursor, 3);
        assert_eq!(outcome.memory_version, 3);

        let after = vault.current_state().unwrap();
        assert_eq!(after.memory, before.memory);
        assert_eq!(after.snapshot_cursor, 3);

        // Idempotent once caught up.
        let again = vault.snapshot().unwrap();
        assert_eq!(again, outcome);
    }

    #[test]
    fn verify_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let vault = engine(dir.path());
        assert_eq!(vault.verify_ledger().unwrap(), 0);
        vault
            .patch_memory(
                "\"v0\"",
                add_op("/identity/a", json!(1)),
                "a",
                "r",
                AuthMode::None,
            )
            .unwrap();
        assert_eq!(vault.verify_ledger().unwrap(), 1);
    }

    #[test]
    fn wrong_passphrase_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _ = engine(dir.path());
        }
        let err = VaultEngine::open(dir.path(), "other-pass")
            .unwrap()
            .current_state()
            .unwrap_err();
        assert!(matches!(err, VaultError::Corruption(_)), "{err}");
    }
}
