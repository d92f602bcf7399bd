//! Persisted data model: memory document, snapshot, journal entries, and the
//! plaintext metadata file.
//!
//! All persisted records use `deny_unknown_fields` so that a foreign or
//! tampered artifact fails to parse instead of being silently accepted.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::canonical::{canonical_json, sha256_hex};
use crate::envelope::{AEAD_ALG, HKDF_NAME, KDF_NAME, SCRYPT_KEYLEN, SCRYPT_N, SCRYPT_P, SCRYPT_R};

/// Identifier bound into every snapshot and AAD context.
pub const VAULT_UID: &str = "lmv-v1";

/// On-disk schema version for snapshot and metadata records.
pub const SCHEMA_VERSION: u32 = 1;

/// Top-level keys that must always be present in `memory.blocks`.
pub const RESERVED_BLOCK_KEYS: [&str; 4] = ["identity", "methodology", "projects", "rules"];

/// Returns the current UTC time as an RFC 3339 string with millisecond
/// precision.
///
/// Journal entries store this string verbatim and hash over it; it is never
/// reformatted on read.
#[must_use]
pub fn now_rfc3339_millis() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The memory document shared by cooperating agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Memory {
    /// Monotonically increasing version, starting at 0.
    pub version: u64,

    /// Arbitrary JSON object carrying the four reserved keys plus any
    /// additional top-level keys.
    pub blocks: Value,

    /// RFC 3339 UTC timestamp of the last mutation (or creation).
    pub updated_at: String,
}

impl Memory {
    /// Builds the initial memory: version 0 with empty reserved blocks.
    #[must_use]
    pub fn initial(ts: &str) -> Self {
        let mut blocks = Map::new();
        for key in RESERVED_BLOCK_KEYS {
            blocks.insert(key.to_string(), Value::Object(Map::new()));
        }
        Self {
            version: 0,
            blocks: Value::Object(blocks),
            updated_at: ts.to_string(),
        }
    }

    /// Returns the unquoted entity tag for this version, e.g. `v3`.
    #[must_use]
    pub fn etag(&self) -> String {
        format!("v{}", self.version)
    }
}

/// Parses a client-supplied `If-Match` precondition.
///
/// The only accepted form is the exact quoted tag `"v{n}"` with a decimal
/// version; anything else returns `None`.
#[must_use]
pub fn parse_if_match(raw: &str) -> Option<u64> {
    let inner = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))?;
    let digits = inner.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Encrypted point-in-time materialization of memory.
///
/// `snapshot_cursor` is the journal cursor of the last entry folded into this
/// snapshot; entries with larger cursors are replayed on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Always [`VAULT_UID`].
    pub uid: String,

    /// Always [`SCHEMA_VERSION`].
    pub schema_version: u32,

    /// Memory materialized up to and including `snapshot_cursor`.
    pub memory: Memory,

    /// Journal cursor of the last folded-in entry, 0 for a fresh vault.
    pub snapshot_cursor: u64,

    /// When this snapshot was written.
    pub updated_at: String,
}

impl Snapshot {
    /// Builds the snapshot of a freshly initialized vault.
    #[must_use]
    pub fn initial(ts: &str) -> Self {
        Self {
            uid: VAULT_UID.to_string(),
            schema_version: SCHEMA_VERSION,
            memory: Memory::initial(ts),
            snapshot_cursor: 0,
            updated_at: ts.to_string(),
        }
    }

    /// Checks the fixed identity fields.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatching field.
    pub fn check_identity(&self) -> Result<(), String> {
        if self.uid != VAULT_UID {
            return Err(format!("snapshot uid {:?} is not {VAULT_UID:?}", self.uid));
        }
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "snapshot schema_version {} is not {SCHEMA_VERSION}",
                self.schema_version
            ));
        }
        Ok(())
    }
}

/// How a mutation was authorized at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No write gate was configured.
    None,

    /// The configured bearer token was presented and matched.
    Token,
}

/// One mutation record in the append-only journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JournalEntry {
    /// Position in the journal; dense and strictly increasing from 1.
    pub cursor: u64,

    /// RFC 3339 timestamp captured at admission, stored verbatim.
    pub ts: String,

    /// Caller-supplied actor label.
    pub actor: String,

    /// Memory version the patch was applied against.
    pub base_version: u64,

    /// Always `base_version + 1`.
    pub new_version: u64,

    /// Caller-supplied reason for the mutation.
    pub reason: String,

    /// Authorization mode recorded at admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthMode>,

    /// The admitted JSON-Patch operations, verbatim.
    pub patch: Value,

    /// `entry_hash` of the previous entry; empty string at cursor 1.
    pub prev_hash: String,

    /// SHA-256 over the canonical form of this entry with `entry_hash`
    /// absent.
    pub entry_hash: String,
}

impl JournalEntry {
    /// Returns the canonical hash basis: this entry serialized without its
    /// `entry_hash` field.
    #[must_use]
    pub fn hash_basis(&self) -> Value {
        let mut basis = json!({
            "cursor": self.cursor,
            "ts": self.ts,
            "actor": self.actor,
            "base_version": self.base_version,
            "new_version": self.new_version,
            "reason": self.reason,
            "patch": self.patch,
            "prev_hash": self.prev_hash,
        });
        if let Some(auth) = self.auth {
            if let Value::Object(map) = &mut basis {
                map.insert(
                    "auth".to_string(),
                    match auth {
                        AuthMode::None => Value::String("none".to_string()),
                        AuthMode::Token => Value::String("token".to_string()),
                    },
                );
            }
        }
        basis
    }

    /// Recomputes the entry hash from the stored fields.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        sha256_hex(&canonical_json(&self.hash_basis()))
    }
}

/// Builds the AAD context bound to a snapshot envelope.
#[must_use]
pub fn vault_aad(vault_version: u64) -> Value {
    json!({
        "record_type": "vault",
        "uid": VAULT_UID,
        "schema_version": SCHEMA_VERSION,
        "vault_version": vault_version,
    })
}

/// Builds the AAD context bound to a journal entry envelope.
#[must_use]
pub fn ledger_aad(entry_cursor: u64) -> Value {
    json!({
        "record_type": "ledger_entry",
        "uid": VAULT_UID,
        "schema_version": SCHEMA_VERSION,
        "entry_cursor": entry_cursor,
    })
}

/// Non-secret description of the vault's cryptographic parameters.
///
/// Written as plaintext `meta.json`. Contains no key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultMetadata {
    /// Always [`VAULT_UID`].
    pub uid: String,

    /// Always [`SCHEMA_VERSION`].
    pub schema_version: u32,

    /// Key-derivation parameters.
    pub kdf: MetadataKdf,

    /// Subkey-derivation function name.
    pub hkdf: MetadataHkdf,

    /// AEAD algorithm name.
    pub aead: MetadataAead,

    /// When this metadata file was last written.
    pub updated_at: String,
}

/// KDF section of [`VaultMetadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataKdf {
    /// KDF name, always `scrypt`.
    pub name: String,
    /// scrypt cost parameter.
    #[serde(rename = "N")]
    pub n: u32,
    /// scrypt block size.
    pub r: u32,
    /// scrypt parallelism.
    pub p: u32,
    /// Derived key length in bytes.
    pub keylen: u32,
}

/// HKDF section of [`VaultMetadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataHkdf {
    /// HKDF construction name, always `hkdf-sha256`.
    pub name: String,
}

/// AEAD section of [`VaultMetadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataAead {
    /// AEAD algorithm name, always `aes-256-gcm`.
    pub alg: String,
}

impl VaultMetadata {
    /// Builds the default metadata for a fresh vault.
    #[must_use]
    pub fn new(ts: &str) -> Self {
        Self {
            uid: VAULT_UID.to_string(),
            schema_version: SCHEMA_VERSION,
            kdf: MetadataKdf {
                name: KDF_NAME.to_string(),
                n: SCRYPT_N,
                r: SCRYPT_R,
                p: SCRYPT_P,
                keylen: SCRYPT_KEYLEN,
            },
            hkdf: MetadataHkdf {
                name: HKDF_NAME.to_string(),
            },
            aead: MetadataAead {
                alg: AEAD_ALG.to_string(),
            },
            updated_at: ts.to_string(),
        }
    }

    /// Checks every fixed field against the engine's supported parameters.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatching field.
    pub fn check_supported(&self) -> Result<(), String> {
        if self.uid != VAULT_UID {
            return Err(format!("metadata uid {:?} is not {VAULT_UID:?}", self.uid));
        }
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "metadata schema_version {} is not {SCHEMA_VERSION}",
                self.schema_version
            ));
        }
        if self.kdf.name != KDF_NAME
            || self.kdf.n != SCRYPT_N
            || self.kdf.r != SCRYPT_R
            || self.kdf.p != SCRYPT_P
            || self.kdf.keylen != SCRYPT_KEYLEN
        {
            return Err("metadata kdf parameters are unsupported".to_string());
        }
        if self.hkdf.name != HKDF_NAME {
            return Err(format!("metadata hkdf {:?} is not {HKDF_NAME:?}", self.hkdf.name));
        }
        if self.aead.alg != AEAD_ALG {
            return Err(format!("metadata aead {:?} is not {AEAD_ALG:?}", self.aead.alg));
        }
        Ok(())
    }
}
