//! Process configuration resolved once at startup.
//!
//! CLI flags override environment variables, which override defaults. The
//! passphrase is required and its absence is a fail-fast error; it lives in
//! a zeroizing container and is never logged.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8787;

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default bind address; the vault serves cooperating agents on one host.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Immutable daemon configuration.
pub struct DaemonConfig {
    /// Address the listener binds to.
    pub bind: IpAddr,

    /// Port the listener binds to.
    pub port: u16,

    /// Directory holding the three vault artifacts.
    pub data_dir: PathBuf,

    /// Vault passphrase.
    pub passphrase: Zeroizing<String>,

    /// Optional bearer token gating write endpoints.
    pub write_token: Option<String>,
}

impl DaemonConfig {
    /// Resolves the serve configuration from flags and environment.
    ///
    /// # Errors
    ///
    /// Fails when `LMV_PASSPHRASE` is unset or a numeric value does not
    /// parse.
    pub fn resolve(
        bind_override: Option<String>,
        port_override: Option<u16>,
        data_dir_override: Option<PathBuf>,
    ) -> Result<Self> {
        let passphrase = required_passphrase("LMV_PASSPHRASE")?;
        let write_token = env_non_empty("LMV_WRITE_TOKEN");

        let port = match port_override {
            Some(port) => port,
            None => match env_non_empty("LMV_PORT").or_else(|| env_non_empty("PORT")) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid port {raw:?}"))?,
                None => DEFAULT_PORT,
            },
        };

        let bind_raw = bind_override.unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: IpAddr = bind_raw
            .parse()
            .with_context(|| format!("invalid bind address {bind_raw:?}"))?;

        Ok(Self {
            bind,
            port,
            data_dir: resolve_data_dir(data_dir_override),
            passphrase,
            write_token,
        })
    }
}

/// Resolves the data directory from a flag or the environment.
#[must_use]
pub fn resolve_data_dir(data_dir_override: Option<PathBuf>) -> PathBuf {
    data_dir_override
        .or_else(|| env_non_empty("LMV_DATA_DIR").map(PathBuf::from))
        .or_else(|| env_non_empty("DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Reads the passphrase pair consumed by the rotation tool.
///
/// # Errors
///
/// Fails when either `LMV_PASSPHRASE` or `LMV_NEW_PASSPHRASE` is unset.
pub fn rotation_passphrases() -> Result<(Zeroizing<String>, Zeroizing<String>)> {
    let old = required_passphrase("LMV_PASSPHRASE")?;
    let new = required_passphrase("LMV_NEW_PASSPHRASE")?;
    Ok((old, new))
}

/// Reads a required passphrase variable, failing fast when unset or empty.
///
/// # Errors
///
/// Fails when the variable is unset or empty.
pub fn required_passphrase(var: &str) -> Result<Zeroizing<String>> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Zeroizing::new(value)),
        _ => bail!("{var} must be set"),
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.is_empty())
}
