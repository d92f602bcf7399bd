//! # lmv-core
//!
//! Storage engine for the Local Memory Vault: a single-host service that
//! safeguards a small structured JSON document shared by cooperating
//! agents.
//!
//! The engine persists three artifacts in one data directory:
//!
//! - an encrypted point-in-time **snapshot** of the memory document
//! - a hash-chained, append-only, encrypted **journal** of mutations
//! - a plaintext, non-secret **metadata** file describing the parameters
//!
//! Mutations are admitted optimistically against a monotonically increasing
//! version, serialized by an engine-level lock, and made durable before
//! being acknowledged. [`rotation::rotate_passphrase`] re-encrypts both
//! encrypted artifacts under a new passphrase with an atomic swap and
//! rollback.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lmv_core::model::AuthMode;
//! use lmv_core::vault::VaultEngine;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), lmv_core::error::VaultError> {
//! let vault = VaultEngine::open("./data".as_ref(), "passphrase")?;
//! let outcome = vault.patch_memory(
//!     "\"v0\"",
//!     json!([{"op": "add", "path": "/identity/name", "value": "Alice"}]),
//!     "agent-1",
//!     "seed identity",
//!     AuthMode::None,
//! )?;
//! assert_eq!(outcome.state.memory.version, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod canonical;
pub mod envelope;
pub mod error;
pub mod model;
pub mod patch;
pub mod rotation;
pub mod store;
pub mod vault;

pub use error::{ErrorKind, VaultError};
pub use vault::VaultEngine;
