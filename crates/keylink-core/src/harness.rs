//! Test harness for keylink core.
//!
//! Shared fixtures for unit and integration tests: an account backed by a
//! [`MemoryRelay`] and a [`ManualClock`], a scripted two-device pairing, and
//! a relay decorator that injects faults.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use async_trait::async_trait;

use keylink_crypto::encoding::{b64_decode, b64_encode};

use crate::client::KeylinkClient;
use crate::clock::ManualClock;
use crate::config::ClientConfig;
use crate::errors::{CoreError, CoreResult};
use crate::memory_relay::{AccountPolicy, MemoryRelay};
use crate::relay::Relay;
use crate::secret_store::MemorySecretStore;
use crate::types::{
    ClaimResponse, CreatedSession, Device, DeviceInfo, OutgoingMessage, PairingMessage,
    PairingPhase, PairingPolicy, PollResponse, SessionStatus, SyncStatus,
};

/// Client settings with short intervals for tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        poll_interval_ms: 5,
        retry_base_ms: 5,
        retry_max_ms: 50,
        ..ClientConfig::default()
    }
}

pub fn device_info(name: &str) -> DeviceInfo {
    DeviceInfo {
        name: name.to_string(),
        platform: "test".to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        os_version: None,
    }
}

/// One account on an in-memory relay.
pub struct TestAccount {
    pub relay: Arc<MemoryRelay>,
    pub clock: Arc<ManualClock>,
}

impl TestAccount {
    pub fn new(policy: AccountPolicy) -> Self {
        let clock = Arc::new(ManualClock::default());
        let relay = Arc::new(MemoryRelay::new(policy, clock.clone()));
        Self { relay, clock }
    }

    /// Register a fresh device with its own secret store.
    pub async fn add_device(&self, name: &str) -> CoreResult<KeylinkClient> {
        self.add_device_via(name, self.relay.clone()).await
    }

    /// Register a device that reaches the relay through `relay`.
    pub async fn add_device_via(
        &self,
        name: &str,
        relay: Arc<dyn Relay>,
    ) -> CoreResult<KeylinkClient> {
        KeylinkClient::connect(
            relay,
            Arc::new(MemorySecretStore::new()),
            self.clock.clone(),
            test_config(),
            &device_info(name),
        )
        .await
    }

    /// Register a device and enable encryption from it.
    pub async fn owner(&self, name: &str) -> CoreResult<KeylinkClient> {
        let client = self.add_device(name).await?;
        client.enable_encryption().await?;
        Ok(client)
    }
}

/// Pair `claimer` with `issuer` by stepping both state machines.
///
/// Fails if the two sides disagree on the verification code. Returns the
/// key version the claimer received.
pub async fn run_pairing_flow(issuer: &KeylinkClient, claimer: &KeylinkClient) -> CoreResult<u32> {
    let (invite, mut issuer_session) = issuer.start_pairing_as_issuer().await?;
    let mut claimer_session = claimer.claim(invite.pairing_code.as_str()).await?;

    issuer_session.poll().await?;
    if issuer_session.verification_code() != claimer_session.verification_code() {
        issuer_session.cancel().await?;
        return Err(CoreError::Internal("verification codes differ".into()));
    }
    issuer_session.approve().await?;

    match claimer_session.poll().await? {
        PairingPhase::Completed => {}
        other => {
            return Err(CoreError::Internal(format!(
                "claimer ended in {other:?}"
            )))
        }
    }
    issuer_session.poll().await?;
    claimer_session
        .received_version()
        .ok_or_else(|| CoreError::Internal("no key version received".into()))
}

/// Relay decorator that injects faults. Starts with every fault off.
///
/// While tampering, one bit is flipped in every polled message payload.
/// A configured confirmation error is returned from `mark_trusted`
/// without reaching the inner relay.
pub struct FaultyRelay {
    inner: Arc<dyn Relay>,
    tampering: AtomicBool,
    confirm_error: Mutex<Option<CoreError>>,
}

impl FaultyRelay {
    pub fn new(inner: Arc<dyn Relay>) -> Self {
        Self {
            inner,
            tampering: AtomicBool::new(false),
            confirm_error: Mutex::new(None),
        }
    }

    pub fn set_tampering(&self, on: bool) {
        self.tampering.store(on, Ordering::SeqCst);
    }

    pub async fn set_confirm_error(&self, err: Option<CoreError>) {
        *self.confirm_error.lock().await = err;
    }
}

fn flip_bit(payload: &str) -> String {
    let Ok(mut bytes) = b64_decode(payload) else {
        return payload.to_string();
    };
    if let Some(last) = bytes.last_mut() {
        *last ^= 0x01;
    }
    b64_encode(&bytes)
}

#[async_trait]
impl Relay for FaultyRelay {
    async fn register_device(&self, device_id: &str, info: &DeviceInfo) -> CoreResult<Device> {
        self.inner.register_device(device_id, info).await
    }

    async fn get_device(&self, device_id: &str) -> CoreResult<Device> {
        self.inner.get_device(device_id).await
    }

    async fn list_devices(&self, caller: &str) -> CoreResult<Vec<Device>> {
        self.inner.list_devices(caller).await
    }

    async fn heartbeat(&self, device_id: &str) -> CoreResult<Device> {
        self.inner.heartbeat(device_id).await
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> CoreResult<Device> {
        self.inner.rename_device(device_id, name).await
    }

    async fn revoke_device(&self, caller: &str, target: &str) -> CoreResult<Device> {
        self.inner.revoke_device(caller, target).await
    }

    async fn sync_status(&self) -> CoreResult<SyncStatus> {
        self.inner.sync_status().await
    }

    async fn enable_encryption(&self, caller: &str) -> CoreResult<SyncStatus> {
        self.inner.enable_encryption(caller).await
    }

    async fn reset_sync(&self, caller: &str) -> CoreResult<SyncStatus> {
        self.inner.reset_sync(caller).await
    }

    async fn set_pairing_policy(
        &self,
        caller: &str,
        policy: &PairingPolicy,
    ) -> CoreResult<SyncStatus> {
        self.inner.set_pairing_policy(caller, policy).await
    }

    async fn create_session(
        &self,
        caller: &str,
        code_hash: &str,
        issuer_public_key: &str,
    ) -> CoreResult<CreatedSession> {
        self.inner
            .create_session(caller, code_hash, issuer_public_key)
            .await
    }

    async fn claim_session(
        &self,
        caller: &str,
        code_hash: &str,
        claimer_public_key: &str,
    ) -> CoreResult<ClaimResponse> {
        self.inner
            .claim_session(caller, code_hash, claimer_public_key)
            .await
    }

    async fn begin_verification(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        self.inner.begin_verification(caller, session_id).await
    }

    async fn approve_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        self.inner.approve_session(caller, session_id).await
    }

    async fn cancel_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        self.inner.cancel_session(caller, session_id).await
    }

    async fn send_message(
        &self,
        caller: &str,
        session_id: &str,
        message: &OutgoingMessage,
    ) -> CoreResult<PairingMessage> {
        self.inner.send_message(caller, session_id, message).await
    }

    async fn poll_session(
        &self,
        caller: &str,
        session_id: &str,
        cursor: u64,
    ) -> CoreResult<PollResponse> {
        let mut resp = self.inner.poll_session(caller, session_id, cursor).await?;
        if self.tampering.load(Ordering::SeqCst) {
            for message in &mut resp.messages {
                message.payload = flip_bit(&message.payload);
            }
        }
        Ok(resp)
    }

    async fn mark_trusted(&self, caller: &str, session_id: &str, version: u32) -> CoreResult<Device> {
        if let Some(err) = self.confirm_error.lock().await.clone() {
            return Err(err);
        }
        self.inner.mark_trusted(caller, session_id, version).await
    }
}
