//! # lmv-daemon
//!
//! HTTP control plane for the Local Memory Vault. The binary wires process
//! configuration, tracing, and graceful shutdown around the request surface
//! in [`http`]; the engine itself lives in `lmv-core`.

#![warn(missing_docs)]

pub mod config;
pub mod http;
