//! Passphrase rotation: re-encrypt the snapshot and every journal entry
//! under a new passphrase with an atomic swap and full rollback.
//!
//! The procedure stages a complete rewrite in a fresh directory, verifies
//! it, then swaps the three artifacts into place with rename pairs. Backups
//! are kept until the swapped state has been re-opened and verified, so a
//! failure (or a crash) at any point leaves either the original file set or
//! the new one, never a mix. [`recover_interrupted`] restores the backups
//! left behind by a crashed run and is invoked on every engine open.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use crate::error::VaultError;
use crate::model::now_rfc3339_millis;
use crate::store::{self, VaultStore, LEDGER_FILE, META_FILE, VAULT_FILE};
use crate::vault::VaultEngine;

const ARTIFACTS: [&str; 3] = [VAULT_FILE, LEDGER_FILE, META_FILE];

/// Re-encrypts the vault at `data_dir` from `old` to `new`.
///
/// A no-op when the passphrases are equal. The rewrite holds the engine's
/// serialization lock for its full duration.
///
/// # Errors
///
/// Propagates the first failure after rolling the directory back to its
/// original file set. Verification failures under the old passphrase
/// surface as [`VaultError::Corruption`] before anything is touched.
pub fn rotate_passphrase(data_dir: &Path, old: &str, new: &str) -> Result<(), VaultError> {
    if old == new {
        info!("rotation requested with an unchanged passphrase, nothing to do");
        return Ok(());
    }

    recover_interrupted(data_dir)?;

    let source = VaultEngine::open(data_dir, old)?;
    let guard = source.lock()?;
    let export = source.export()?;
    let expected_memory = {
        let state = source.current_state()?;
        state.memory
    };

    let run_id = fresh_run_id();
    let staging_dir = data_dir.join(format!(".rotate-{run_id}"));

    // Stage the complete rewrite first; nothing in the live directory is
    // touched until the staged state verifies.
    let staged = stage_rewrite(&staging_dir, new, &export).and_then(|()| {
        let staged = VaultEngine::attach(&staging_dir, new);
        staged.verify_ledger()?;
        let state = staged.current_state()?;
        if state.memory != expected_memory {
            return Err(VaultError::corruption(
                "staged rewrite does not reproduce the source memory".to_string(),
            ));
        }
        Ok(())
    });
    if let Err(err) = staged {
        remove_staging(&staging_dir);
        return Err(err);
    }

    let result = swap_into_place(data_dir, &staging_dir, &run_id, new, &expected_memory);
    drop(guard);

    match result {
        Ok(()) => {
            remove_staging(&staging_dir);
            info!(entries = export.entries.len(), "passphrase rotation complete");
            Ok(())
        },
        Err(err) => {
            remove_staging(&staging_dir);
            Err(err)
        },
    }
}

/// Restores backups left by a crashed rotation, if any.
///
/// When a `<file>.bak.<run_id>` sibling exists for any artifact, the main
/// file (which may be a half-swapped replacement) is discarded and the
/// backup renamed into place; leftover staging directories are removed.
/// Returns whether anything was restored.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if a restore rename fails.
pub fn recover_interrupted(data_dir: &Path) -> Result<bool, VaultError> {
    if !data_dir.is_dir() {
        return Ok(false);
    }

    let mut backups: Vec<(String, PathBuf)> = Vec::new();
    let mut staging: Vec<PathBuf> = Vec::new();
    let dir_iter = fs::read_dir(data_dir)
        .map_err(|e| VaultError::Internal(format!("scan data dir: {e}")))?;
    for dir_entry in dir_iter {
        let dir_entry = dir_entry.map_err(|e| VaultError::Internal(format!("scan data dir: {e}")))?;
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if let Some(artifact) = ARTIFACTS
            .iter()
            .find(|artifact| name.starts_with(&format!("{artifact}.bak.")))
        {
            backups.push(((*artifact).to_string(), dir_entry.path()));
        } else if name.starts_with(".rotate-") && dir_entry.path().is_dir() {
            staging.push(dir_entry.path());
        }
    }

    if backups.is_empty() && staging.is_empty() {
        return Ok(false);
    }

    backups.sort();
    let mut restored = false;
    let mut seen: Vec<String> = Vec::new();
    for (artifact, bak_path) in backups {
        if seen.contains(&artifact) {
            // At most one backup per artifact can be restored; extras are
            // leftovers from an earlier crashed run.
            let _ = fs::remove_file(&bak_path);
            continue;
        }
        let main = data_dir.join(&artifact);
        if main.exists() {
            fs::remove_file(&main)
                .map_err(|e| VaultError::Internal(format!("discard half-swapped {artifact}: {e}")))?;
        }
        fs::rename(&bak_path, &main)
            .map_err(|e| VaultError::Internal(format!("restore backup of {artifact}: {e}")))?;
        warn!(artifact = %artifact, "restored backup left by an interrupted rotation");
        seen.push(artifact);
        restored = true;
    }

    for dir in staging {
        let _ = fs::remove_dir_all(&dir);
    }
    if restored {
        store::fsync_dir(data_dir)?;
    }
    Ok(restored)
}

/// Writes the full export into `staging_dir` under the new passphrase, with
/// fresh salts and IVs for every record.
fn stage_rewrite(
    staging_dir: &Path,
    new_passphrase: &str,
    export: &crate::vault::VaultExport,
) -> Result<(), VaultError> {
    let staged_store = VaultStore::new(staging_dir);
    staged_store.ensure_dir()?;

    let staged = VaultEngine::attach(staging_dir, new_passphrase);
    staged.write_snapshot_record(&export.snapshot)?;
    staged_store.truncate_ledger()?;
    for entry in &export.entries {
        staged.append_entry_record(entry)?;
    }

    let mut metadata = export.metadata.clone();
    metadata.updated_at = now_rfc3339_millis();
    staged_store.write_metadata(&metadata)?;
    Ok(())
}

/// Swaps the staged artifacts into the live directory.
///
/// Records every step in an undo list; on failure the placed files are
/// removed and the backups renamed back before the error propagates.
fn swap_into_place(
    data_dir: &Path,
    staging_dir: &Path,
    run_id: &str,
    new_passphrase: &str,
    expected_memory: &crate::model::Memory,
) -> Result<(), VaultError> {
    let mut backed_up: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut placed: Vec<PathBuf> = Vec::new();

    let attempt = (|| -> Result<(), VaultError> {
        for artifact in ARTIFACTS {
            let main = data_dir.join(artifact);
            if main.exists() {
                let bak = data_dir.join(format!("{artifact}.bak.{run_id}"));
                fs::rename(&main, &bak)
                    .map_err(|e| VaultError::Internal(format!("back up {artifact}: {e}")))?;
                backed_up.push((main, bak));
            }
        }

        for artifact in ARTIFACTS {
            let staged_file = staging_dir.join(artifact);
            let main = data_dir.join(artifact);
            fs::rename(&staged_file, &main)
                .map_err(|e| VaultError::Internal(format!("install staged {artifact}: {e}")))?;
            placed.push(main);
        }
        store::fsync_dir(data_dir)?;

        // Final gate: the swapped directory must verify under the new
        // passphrase and still hold the same memory. `attach` avoids the
        // open-time recovery scan, which would see this run's own backups.
        let reopened = VaultEngine::attach(data_dir, new_passphrase);
        reopened.verify_ledger()?;
        let state = reopened.current_state()?;
        if &state.memory != expected_memory {
            return Err(VaultError::corruption(
                "swapped vault does not reproduce the source memory".to_string(),
            ));
        }
        Ok(())
    })();

    match attempt {
        Ok(()) => {
            for (_, bak) in backed_up {
                let _ = fs::remove_file(bak);
            }
            store::fsync_dir(data_dir)?;
            Ok(())
        },
        Err(err) => {
            warn!(%err, "rotation swap failed, rolling back");
            for path in placed {
                let _ = fs::remove_file(path);
            }
            for (main, bak) in backed_up {
                if let Err(restore_err) = fs::rename(&bak, &main) {
                    warn!(
                        file = %main.display(),
                        %restore_err,
                        "failed to restore backup during rollback"
                    );
                }
            }
            let _ = store::fsync_dir(data_dir);
            Err(err)
        },
    }
}

fn fresh_run_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn remove_staging(staging_dir: &Path) {
    if staging_dir.exists() {
        let _ = fs::remove_dir_all(staging_dir);
    }
}
