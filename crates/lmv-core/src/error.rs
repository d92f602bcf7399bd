//! Engine-level error taxonomy.
//!
//! Every operation returns either a success value or a [`VaultError`]; the
//! request surface maps the [`ErrorKind`] onto an HTTP status in one place.
//! Corruption and internal failures carry detail for server-side logging,
//! but that detail is never returned to clients.

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::store::StoreError;

/// Coarse classification used by the boundary mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: bad JSON-Patch, reserved path, bad `If-Match`, bad
    /// query arguments, wrong content type.
    BadRequest,
    /// Write gate configured and the presented token is absent or wrong.
    Unauthorized,
    /// Optimistic-concurrency precondition failed.
    Conflict,
    /// Well-formed patch that cannot be applied or violates the blocks
    /// shape.
    PatchApply,
    /// Persisted state failed verification; not auto-recovered.
    Corruption,
    /// Unexpected failure.
    Internal,
}

/// Typed failure for every vault operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VaultError {
    /// Malformed request input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Write gate rejection.
    #[error("unauthorized")]
    Unauthorized,

    /// The `If-Match` version does not match the current memory version.
    #[error("version conflict: current etag is {current_etag}")]
    Conflict {
        /// Unquoted current entity tag, e.g. `v3`.
        current_etag: String,
    },

    /// The patch is well-formed but cannot be applied.
    #[error("patch cannot be applied: {0}")]
    PatchApply(String),

    /// Envelope, hash-chain, replay, or metadata verification failed.
    #[error("storage corruption: {0}")]
    Corruption(String),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// The boundary classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::PatchApply(_) => ErrorKind::PatchApply,
            Self::Corruption(_) => ErrorKind::Corruption,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand corruption constructor.
    pub fn corruption(detail: impl Into<String>) -> Self {
        Self::Corruption(detail.into())
    }

    /// Shorthand bad-request constructor.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::BadRequest(detail.into())
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match &err {
            // A persisted artifact that fails to parse or blows its size cap
            // is corrupt; plumbing failures are internal.
            StoreError::Serde { .. } | StoreError::FileTooLarge { .. } => {
                Self::Corruption(err.to_string())
            },
            StoreError::NoParentDirectory { .. } | StoreError::Io { .. } => {
                Self::Internal(err.to_string())
            },
        }
    }
}

impl From<EnvelopeError> for VaultError {
    fn from(err: EnvelopeError) -> Self {
        match &err {
            // Key-derivation parameter failures are engine bugs, not
            // artifact damage.
            EnvelopeError::Kdf(_) => Self::Internal(err.to_string()),
            _ => Self::Corruption(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify_variants() {
        assert_eq!(
            VaultError::bad_request("nope").kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(VaultError::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            VaultError::Conflict {
                current_etag: "v1".to_string()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            VaultError::PatchApply("missing path".to_string()).kind(),
            ErrorKind::PatchApply
        );
        assert_eq!(
            VaultError::corruption("chain break").kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            VaultError::Internal("io".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn envelope_failures_map_to_corruption() {
        let err: VaultError = EnvelopeError::AeadFailure.into();
        assert_eq!(err.kind(), ErrorKind::Corruption);

        let err: VaultError = EnvelopeError::Kdf("bad params".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
