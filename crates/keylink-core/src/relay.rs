//! The relay: an untrusted store-and-forward service.
//!
//! The relay sees device records, account sync status, pairing-code hashes,
//! ephemeral public keys and opaque ciphertext. It never sees a pairing code,
//! a shared secret, a session key or the root key.
//!
//! Every call names the calling device; a deployed relay takes it from the
//! authenticated connection.

use async_trait::async_trait;

use crate::errors::CoreResult;
use crate::types::{
    ClaimResponse, CreatedSession, Device, DeviceInfo, OutgoingMessage, PairingMessage,
    PairingPolicy, PollResponse, SessionStatus, SyncStatus,
};

#[async_trait]
pub trait Relay: Send + Sync {
    // Device directory

    /// Register a device. Registering an existing id returns its record.
    async fn register_device(&self, device_id: &str, info: &DeviceInfo) -> CoreResult<Device>;

    async fn get_device(&self, device_id: &str) -> CoreResult<Device>;

    async fn list_devices(&self, caller: &str) -> CoreResult<Vec<Device>>;

    /// Refresh `lastSeenAt` and return the record.
    async fn heartbeat(&self, device_id: &str) -> CoreResult<Device>;

    async fn rename_device(&self, device_id: &str, name: &str) -> CoreResult<Device>;

    async fn revoke_device(&self, caller: &str, target: &str) -> CoreResult<Device>;

    // Account sync status

    async fn sync_status(&self) -> CoreResult<SyncStatus>;

    /// Turn encryption on; the caller becomes trusted at version 1.
    async fn enable_encryption(&self, caller: &str) -> CoreResult<SyncStatus>;

    /// Bump the key version and stamp `resetAt`; the caller becomes trusted
    /// at the new version.
    async fn reset_sync(&self, caller: &str) -> CoreResult<SyncStatus>;

    async fn set_pairing_policy(
        &self,
        caller: &str,
        policy: &PairingPolicy,
    ) -> CoreResult<SyncStatus>;

    // Pairing sessions

    async fn create_session(
        &self,
        caller: &str,
        code_hash: &str,
        issuer_public_key: &str,
    ) -> CoreResult<CreatedSession>;

    async fn claim_session(
        &self,
        caller: &str,
        code_hash: &str,
        claimer_public_key: &str,
    ) -> CoreResult<ClaimResponse>;

    async fn begin_verification(&self, caller: &str, session_id: &str)
        -> CoreResult<SessionStatus>;

    async fn approve_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus>;

    async fn cancel_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus>;

    async fn send_message(
        &self,
        caller: &str,
        session_id: &str,
        message: &OutgoingMessage,
    ) -> CoreResult<PairingMessage>;

    async fn poll_session(
        &self,
        caller: &str,
        session_id: &str,
        cursor: u64,
    ) -> CoreResult<PollResponse>;

    /// Claimer confirms receipt of the key at `version`; completes the session
    /// and marks the caller trusted.
    async fn mark_trusted(
        &self,
        caller: &str,
        session_id: &str,
        version: u32,
    ) -> CoreResult<Device>;
}
