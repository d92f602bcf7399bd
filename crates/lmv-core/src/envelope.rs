//! AEAD envelope codec for snapshot and journal records.
//!
//! Every persisted record is one JSON envelope. Key derivation is two-stage:
//! scrypt stretches the passphrase into a 32-byte master key, then
//! HKDF-SHA256 expands the master into a per-domain record key. The domain
//! (`vault` for snapshots, `ledger` for journal entries) is bound via the
//! HKDF `info` string, so a vault key can never decrypt a journal record and
//! vice versa.
//!
//! The AAD context is canonical JSON and is authenticated by AES-256-GCM;
//! callers re-derive the context from the decrypted payload and compare
//! byte-for-byte to rule out cross-record substitution under the same key.

use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::canonical::canonical_json;

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// KDF name recorded in envelopes and metadata.
pub const KDF_NAME: &str = "scrypt";

/// Subkey derivation name recorded in envelopes and metadata.
pub const HKDF_NAME: &str = "hkdf-sha256";

/// AEAD algorithm name recorded in envelopes and metadata.
pub const AEAD_ALG: &str = "aes-256-gcm";

/// scrypt cost parameter N.
pub const SCRYPT_N: u32 = 32768;

/// log2 of [`SCRYPT_N`], the form the scrypt crate takes.
pub const SCRYPT_LOG_N: u8 = 15;

/// scrypt block size r.
pub const SCRYPT_R: u32 = 8;

/// scrypt parallelism p.
pub const SCRYPT_P: u32 = 1;

/// Derived key length in bytes.
pub const SCRYPT_KEYLEN: u32 = 32;

/// Salt length in bytes, fresh per encryption.
pub const SALT_LEN: usize = 16;

/// AES-GCM IV length in bytes, fresh per encryption.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Which record key an envelope was sealed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDomain {
    /// Snapshot records (`vault.enc`).
    Vault,
    /// Journal entry records (`ledger.jsonl.enc`).
    Ledger,
}

impl KeyDomain {
    /// The HKDF `info` string for this domain.
    #[must_use]
    pub const fn info(self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::Ledger => "ledger",
        }
    }

    fn from_info(info: &str) -> Option<Self> {
        match info {
            "vault" => Some(Self::Vault),
            "ledger" => Some(Self::Ledger),
            _ => None,
        }
    }
}

/// Errors from sealing or opening envelopes.
///
/// Everything an attacker can influence (malformed fields, failed
/// authentication, domain confusion) surfaces here and is treated as
/// corruption by the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// Key derivation failed (bad parameters or output length).
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// A base64 field did not decode or had the wrong length.
    #[error("malformed envelope field: {field}")]
    MalformedField {
        /// The offending envelope field.
        field: &'static str,
    },

    /// The envelope records parameters this engine does not support.
    #[error("unsupported envelope parameters: {0}")]
    Unsupported(String),

    /// The envelope was sealed under a different key domain.
    #[error("key domain mismatch: envelope is for {found}, expected {expected}")]
    DomainMismatch {
        /// Domain recorded in the envelope.
        found: String,
        /// Domain the caller required.
        expected: &'static str,
    },

    /// AEAD decryption failed: wrong key, tampered ciphertext, or tampered
    /// AAD.
    #[error("envelope authentication failed")]
    AeadFailure,

    /// The decrypted plaintext is not valid JSON.
    #[error("decrypted payload is not valid JSON: {0}")]
    PlaintextNotJson(#[source] serde_json::Error),

    /// The recorded AAD bytes are not valid JSON.
    #[error("recorded aad is not valid JSON: {0}")]
    AadNotJson(#[source] serde_json::Error),
}

/// One encrypted record as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Format version, always 1.
    pub v: u8,

    /// Passphrase-stretching parameters.
    pub kdf: KdfSection,

    /// Subkey derivation parameters.
    pub hkdf: HkdfSection,

    /// AEAD parameters and authenticated context.
    pub aead: AeadSection,

    /// Base64 ciphertext without the tag.
    pub ciphertext_b64: String,
}

/// KDF section of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KdfSection {
    /// Always `scrypt`.
    pub name: String,
    /// Cost parameter.
    #[serde(rename = "N")]
    pub n: u32,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
    /// Master key length in bytes.
    pub keylen: u32,
    /// Base64 of the 16-byte salt.
    pub salt_b64: String,
}

/// HKDF section of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HkdfSection {
    /// Always `hkdf-sha256`.
    pub name: String,
    /// Domain separation string, `vault` or `ledger`.
    pub info: String,
}

/// AEAD section of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AeadSection {
    /// Always `aes-256-gcm`.
    pub alg: String,
    /// Base64 of the 12-byte IV.
    pub iv_b64: String,
    /// Base64 of the 16-byte tag.
    pub tag_b64: String,
    /// Base64 of the canonical-JSON AAD context bytes.
    pub aad_b64: String,
}

/// Derives the per-domain record key for a given salt.
///
/// # Errors
///
/// Returns [`EnvelopeError::Kdf`] if the scrypt parameters or HKDF expansion
/// are rejected, which does not happen for the constants above.
pub fn derive_record_key(
    passphrase: &str,
    salt: &[u8],
    domain: KeyDomain,
) -> Result<Zeroizing<[u8; 32]>, EnvelopeError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_KEYLEN as usize)
        .map_err(|e| EnvelopeError::Kdf(format!("invalid scrypt parameters: {e}")))?;

    let mut master = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, master.as_mut())
        .map_err(|e| EnvelopeError::Kdf(format!("scrypt failed: {e}")))?;

    let hk = Hkdf::<Sha256>::new(None, master.as_ref());
    let mut record_key = Zeroizing::new([0u8; 32]);
    hk.expand(domain.info().as_bytes(), record_key.as_mut())
        .map_err(|e| EnvelopeError::Kdf(format!("hkdf expand failed: {e}")))?;

    Ok(record_key)
}

/// Encrypts `payload` under `passphrase` for the given domain, binding the
/// canonical form of `aad` as authenticated context.
///
/// Salt and IV are freshly generated for every call.
///
/// # Errors
///
/// Returns [`EnvelopeError`] on key-derivation or encryption failure.
pub fn seal(
    passphrase: &str,
    domain: KeyDomain,
    payload: &Value,
    aad: &Value,
) -> Result<Envelope, EnvelopeError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_record_key(passphrase, &salt, domain)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|_| EnvelopeError::Kdf("invalid AES-256-GCM key length".to_string()))?;

    let aad_bytes = canonical_json(aad).into_bytes();
    let plaintext = canonical_json(payload).into_bytes();

    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &plaintext,
                aad: &aad_bytes,
            },
        )
        .map_err(|_| EnvelopeError::AeadFailure)?;

    // aes-gcm emits ciphertext || tag; the envelope stores them separately.
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(Envelope {
        v: ENVELOPE_VERSION,
        kdf: KdfSection {
            name: KDF_NAME.to_string(),
            n: SCRYPT_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
            keylen: SCRYPT_KEYLEN,
            salt_b64: BASE64.encode(salt),
        },
        hkdf: HkdfSection {
            name: HKDF_NAME.to_string(),
            info: domain.info().to_string(),
        },
        aead: AeadSection {
            alg: AEAD_ALG.to_string(),
            iv_b64: BASE64.encode(iv),
            tag_b64: BASE64.encode(tag),
            aad_b64: BASE64.encode(aad_bytes),
        },
        ciphertext_b64: BASE64.encode(sealed),
    })
}

/// Decrypts an envelope sealed by [`seal`].
///
/// Returns the payload and the AAD context recorded at encryption time, both
/// parsed as JSON. The caller must re-derive the expected AAD from the
/// payload and compare canonical forms.
///
/// # Errors
///
/// Returns [`EnvelopeError`] when the envelope records a different key
/// domain, any field is malformed or unsupported, authentication fails, or
/// either plaintext or AAD is not JSON.
pub fn open(
    passphrase: &str,
    expected: KeyDomain,
    envelope: &Envelope,
) -> Result<(Value, Value), EnvelopeError> {
    check_parameters(envelope)?;

    let found = KeyDomain::from_info(&envelope.hkdf.info).ok_or_else(|| {
        EnvelopeError::Unsupported(format!("unknown hkdf info {:?}", envelope.hkdf.info))
    })?;
    if found != expected {
        return Err(EnvelopeError::DomainMismatch {
            found: envelope.hkdf.info.clone(),
            expected: expected.info(),
        });
    }

    let salt = decode_exact(&envelope.kdf.salt_b64, SALT_LEN, "kdf.salt_b64")?;
    let iv = decode_exact(&envelope.aead.iv_b64, IV_LEN, "aead.iv_b64")?;
    let tag = decode_exact(&envelope.aead.tag_b64, TAG_LEN, "aead.tag_b64")?;
    let aad_bytes = BASE64
        .decode(&envelope.aead.aad_b64)
        .map_err(|_| EnvelopeError::MalformedField {
            field: "aead.aad_b64",
        })?;
    let ciphertext =
        BASE64
            .decode(&envelope.ciphertext_b64)
            .map_err(|_| EnvelopeError::MalformedField {
                field: "ciphertext_b64",
            })?;

    let key = derive_record_key(passphrase, &salt, expected)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|_| EnvelopeError::Kdf("invalid AES-256-GCM key length".to_string()))?;

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: &aad_bytes,
            },
        )
        .map_err(|_| EnvelopeError::AeadFailure)?;

    let payload: Value =
        serde_json::from_slice(&plaintext).map_err(EnvelopeError::PlaintextNotJson)?;
    let aad: Value = serde_json::from_slice(&aad_bytes).map_err(EnvelopeError::AadNotJson)?;

    Ok((payload, aad))
}

/// Rejects envelopes whose recorded parameters differ from the single
/// supported suite.
fn check_parameters(envelope: &Envelope) -> Result<(), EnvelopeError> {
    if envelope.v != ENVELOPE_VERSION {
        return Err(EnvelopeError::Unsupported(format!(
            "envelope version {}",
            envelope.v
        )));
    }
    if envelope.kdf.name != KDF_NAME
        || envelope.kdf.n != SCRYPT_N
        || envelope.kdf.r != SCRYPT_R
        || envelope.kdf.p != SCRYPT_P
        || envelope.kdf.keylen != SCRYPT_KEYLEN
    {
        return Err(EnvelopeError::Unsupported("kdf parameters".to_string()));
    }
    if envelope.hkdf.name != HKDF_NAME {
        return Err(EnvelopeError::Unsupported(format!(
            "hkdf {:?}",
            envelope.hkdf.name
        )));
    }
    if envelope.aead.alg != AEAD_ALG {
        return Err(EnvelopeError::Unsupported(format!(
            "aead {:?}",
            envelope.aead.alg
        )));
    }
    Ok(())
}

fn decode_exact(
    b64: &str,
    expected_len: usize,
    field: &'static str,
) -> Result<Vec<u8>, EnvelopeError> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|_| EnvelopeError::MalformedField { field })?;
    if bytes.len() != expected_len {
        return Err(EnvelopeError::MalformedField { field });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const PASS: &str = "correct horse battery staple";

    fn sample_payload() -> Value {
        json!({"cursor": 1, "actor": "alice", "nested": {"b": 2, "a": 1}})
    }

    fn sample_aad() -> Value {
        json!({"record_type": "ledger_entry", "entry_cursor": 1})
    }

    #[test]
    fn round_trip_both_domains() {
        for domain in [KeyDomain::Vault, KeyDomain::Ledger] {
            let envelope = seal(PASS, domain, &sample_payload(), &sample_aad()).unwrap();
            let (payload, aad) = open(PASS, domain, &envelope).unwrap();
            assert_eq!(payload, sample_payload());
            assert_eq!(aad, sample_aad());
        }
    }

    #[test]
    fn domain_mismatch_is_rejected() {
        let envelope = seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let err = open(PASS, KeyDomain::Ledger, &envelope).unwrap_err();
        assert!(matches!(err, EnvelopeError::DomainMismatch { .. }), "{err}");
    }

    #[test]
    fn wrong_passphrase_fails_authentication() {
        let envelope = seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let err = open("wrong", KeyDomain::Vault, &envelope).unwrap_err();
        assert!(matches!(err, EnvelopeError::AeadFailure), "{err}");
    }

    #[test]
    fn salt_and_iv_are_fresh_per_encryption() {
        let a = seal(PASS, KeyDomain::Ledger, &sample_payload(), &sample_aad()).unwrap();
        let b = seal(PASS, KeyDomain::Ledger, &sample_payload(), &sample_aad()).unwrap();
        assert_ne!(a.kdf.salt_b64, b.kdf.salt_b64);
        assert_ne!(a.aead.iv_b64, b.aead.iv_b64);
        assert_ne!(a.ciphertext_b64, b.ciphertext_b64);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut envelope =
            seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let mut raw = BASE64.decode(&envelope.ciphertext_b64).unwrap();
        raw[0] ^= 0x01;
        envelope.ciphertext_b64 = BASE64.encode(raw);
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &envelope),
            Err(EnvelopeError::AeadFailure)
        ));
    }

    #[test]
    fn tampered_tag_fails() {
        let mut envelope =
            seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let mut raw = BASE64.decode(&envelope.aead.tag_b64).unwrap();
        raw[TAG_LEN - 1] ^= 0x80;
        envelope.aead.tag_b64 = BASE64.encode(raw);
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &envelope),
            Err(EnvelopeError::AeadFailure)
        ));
    }

    #[test]
    fn tampered_iv_fails() {
        let mut envelope =
            seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let mut raw = BASE64.decode(&envelope.aead.iv_b64).unwrap();
        raw[3] ^= 0x10;
        envelope.aead.iv_b64 = BASE64.encode(raw);
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &envelope),
            Err(EnvelopeError::AeadFailure)
        ));
    }

    #[test]
    fn tampered_salt_fails() {
        // Flipping a salt bit derives a different key, so the tag no longer
        // verifies.
        let mut envelope =
            seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let mut raw = BASE64.decode(&envelope.kdf.salt_b64).unwrap();
        raw[0] ^= 0x01;
        envelope.kdf.salt_b64 = BASE64.encode(raw);
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &envelope),
            Err(EnvelopeError::AeadFailure)
        ));
    }

    #[test]
    fn tampered_aad_fails() {
        let mut envelope =
            seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let mut raw = BASE64.decode(&envelope.aead.aad_b64).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        envelope.aead.aad_b64 = BASE64.encode(raw);
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &envelope),
            Err(EnvelopeError::AeadFailure)
        ));
    }

    #[test]
    fn truncated_fields_are_malformed() {
        let envelope = seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();

        let mut short_salt = envelope.clone();
        short_salt.kdf.salt_b64 = BASE64.encode([0u8; 4]);
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &short_salt),
            Err(EnvelopeError::MalformedField { field: "kdf.salt_b64" })
        ));

        let mut bad_b64 = envelope;
        bad_b64.ciphertext_b64 = "not base64!!!".to_string();
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &bad_b64),
            Err(EnvelopeError::MalformedField { field: "ciphertext_b64" })
        ));
    }

    #[test]
    fn unsupported_parameters_are_rejected() {
        let mut envelope =
            seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        envelope.kdf.n = 16384;
        assert!(matches!(
            open(PASS, KeyDomain::Vault, &envelope),
            Err(EnvelopeError::Unsupported(_))
        ));
    }

    #[test]
    fn wire_format_field_names() {
        let envelope = seal(PASS, KeyDomain::Vault, &sample_payload(), &sample_aad()).unwrap();
        let text = serde_json::to_string(&envelope).unwrap();
        for field in [
            r#""v":1"#,
            r#""name":"scrypt""#,
            r#""N":32768"#,
            r#""keylen":32"#,
            r#""salt_b64""#,
            r#""name":"hkdf-sha256""#,
            r#""info":"vault""#,
            r#""alg":"aes-256-gcm""#,
            r#""iv_b64""#,
            r#""tag_b64""#,
            r#""aad_b64""#,
            r#""ciphertext_b64""#,
        ] {
            assert!(text.contains(field), "missing {field} in {text}");
        }
    }

    #[test]
    fn aad_bytes_are_canonical() {
        let envelope = seal(
            PASS,
            KeyDomain::Ledger,
            &sample_payload(),
            &json!({"z": 1, "a": 2}),
        )
        .unwrap();
        let aad_bytes = BASE64.decode(&envelope.aead.aad_b64).unwrap();
        assert_eq!(String::from_utf8(aad_bytes).unwrap(), r#"{"a":2,"z":1}"#);
    }
}
