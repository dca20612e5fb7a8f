//! keylink core - device pairing and trust for end-to-end encrypted sync.
//!
//! This crate implements:
//! - The relay-side pairing session record and its transition rules
//! - Issuer and Claimer pairing state machines, plus a polling driver
//! - Device identity and the local trust store
//! - The sync gate that hands derived keys to the data pipeline
//! - The relay and secret store abstractions with in-memory implementations
//! - Failed-claim rate limiting

#![forbid(unsafe_code)]

// Pairing state machines
pub mod session;
pub mod issuer;
pub mod claimer;
pub mod transfer;
pub mod driver;

// Trust and identity
pub mod identity;
pub mod trust;
pub mod gate;

// Infrastructure
pub mod relay;
pub mod memory_relay;
pub mod secret_store;
pub mod rate_limit;
pub mod clock;

// Supporting modules
pub mod client;
pub mod config;
pub mod errors;
pub mod types;
pub mod harness;

// Optional transport implementations
#[cfg(feature = "http-relay")]
pub mod http_relay;

pub use client::KeylinkClient;
pub use errors::{CoreError, CoreResult, ErrorKind, InputError};
pub use types::{
    Device, DeviceInfo, PairingMessage, PairingPhase, PairingPolicy, SessionStatus, SyncStatus,
    TrustState,
};
