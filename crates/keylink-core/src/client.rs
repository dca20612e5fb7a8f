//! Application-facing facade.
//!
//! [`KeylinkClient`] ties together the relay, the secret store, this
//! device's identity and its trust store.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use keylink_crypto::generate_root_key;

use crate::claimer::ClaimerSession;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::driver::{spawn_claimer, ClaimerHandle, DriverConfig};
use crate::errors::{CoreError, CoreResult};
use crate::gate::SyncGate;
use crate::identity::DeviceIdentity;
use crate::issuer::{IssuerSession, PairingInvite};
use crate::relay::Relay;
use crate::secret_store::{current_key_version, store_root_key, SecretStore};
use crate::trust::{TrustSnapshot, TrustStore};
use crate::types::{Device, DeviceInfo, PairingPolicy, SyncStatus, TrustState};

pub struct KeylinkClient {
    relay: Arc<dyn Relay>,
    secrets: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
    device_id: String,
    identity: Mutex<DeviceIdentity>,
    trust: Arc<TrustStore>,
}

impl KeylinkClient {
    /// Load or register this device and build its trust state.
    pub async fn connect(
        relay: Arc<dyn Relay>,
        secrets: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
        info: &DeviceInfo,
    ) -> CoreResult<Self> {
        let identity = DeviceIdentity::load_or_register(&*relay, &*secrets, info).await?;
        let status = relay.sync_status().await?;
        let held = current_key_version(&*secrets).await?;
        let trust = TrustStore::new(identity.record(), status, held);
        info!(
            device_id = %identity.device_id(),
            trust_state = %trust.state(),
            "client connected"
        );
        Ok(Self {
            relay,
            secrets,
            clock,
            config,
            device_id: identity.device_id().to_string(),
            identity: Mutex::new(identity),
            trust: Arc::new(trust),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------

    /// Open a session as the trusted side.
    pub async fn start_pairing_as_issuer(&self) -> CoreResult<(PairingInvite, IssuerSession)> {
        self.trust.snapshot().require_current()?;
        IssuerSession::create(
            self.relay.clone(),
            self.secrets.clone(),
            self.device_id.clone(),
        )
        .await
    }

    /// Claim a session for manual stepping.
    pub async fn claim(&self, code: &str) -> CoreResult<ClaimerSession> {
        if self.trust.snapshot().can_sync() {
            return Err(CoreError::invalid_state("device is already trusted"));
        }
        ClaimerSession::claim(
            self.relay.clone(),
            self.secrets.clone(),
            self.trust.clone(),
            self.device_id.clone(),
            code,
            &self.config.retry_policy(),
        )
        .await
    }

    /// Claim and poll in the background.
    pub async fn start_pairing_as_claimer(&self, code: &str) -> CoreResult<ClaimerHandle> {
        let session = self.claim(code).await?;
        Ok(spawn_claimer(
            session,
            self.clock.clone(),
            DriverConfig::from(&self.config),
        ))
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    pub async fn sync_status(&self) -> CoreResult<SyncStatus> {
        Ok(self.refresh().await?.status)
    }

    pub async fn current_device(&self) -> Device {
        self.identity.lock().await.record().clone()
    }

    pub async fn devices(&self) -> CoreResult<Vec<Device>> {
        self.relay.list_devices(&self.device_id).await
    }

    pub fn subscribe_trust(&self) -> watch::Receiver<TrustSnapshot> {
        self.trust.subscribe()
    }

    pub fn trust_snapshot(&self) -> TrustSnapshot {
        self.trust.snapshot()
    }

    pub fn sync_gate(&self) -> SyncGate {
        SyncGate::new(self.trust.subscribe(), self.secrets.clone())
    }

    // ------------------------------------------------------------------
    // Account operations
    // ------------------------------------------------------------------

    /// Heartbeat and reconcile trust with the relay.
    pub async fn refresh(&self) -> CoreResult<TrustSnapshot> {
        let device = self.identity.lock().await.heartbeat(&*self.relay).await?;
        let status = self.relay.sync_status().await?;
        let state = self.trust.observe(&device, status);
        debug!(device_id = %self.device_id, trust_state = %state, "refreshed");
        Ok(self.trust.snapshot())
    }

    /// First-time setup: create the account root key on this device.
    pub async fn enable_encryption(&self) -> CoreResult<SyncStatus> {
        let root = generate_root_key()?;
        let status = self.relay.enable_encryption(&self.device_id).await?;
        self.install_root(root, status.clone()).await?;
        info!(device_id = %self.device_id, "encryption enabled on this device");
        Ok(status)
    }

    /// Replace the account root key. Every other device must pair again.
    pub async fn reset_sync(&self) -> CoreResult<SyncStatus> {
        let snapshot = self.trust.snapshot();
        match snapshot.trust_state {
            TrustState::Recovery => {
                warn!(device_id = %self.device_id, "reset refused while in recovery");
                return Err(snapshot.needs_repairing());
            }
            TrustState::Trusted if !snapshot.can_sync() => {
                warn!(device_id = %self.device_id, "reset refused with a stale key");
                return Err(snapshot.needs_repairing());
            }
            TrustState::Trusted => {}
            other => {
                warn!(device_id = %self.device_id, trust_state = %other, "reset refused");
                return Err(CoreError::Denied(
                    "only a device trusted at the current key version can reset".into(),
                ));
            }
        }
        let root = generate_root_key()?;
        let status = self.relay.reset_sync(&self.device_id).await?;
        self.install_root(root, status.clone()).await?;
        info!(
            device_id = %self.device_id,
            version = status.current_key_version,
            "sync reset on this device"
        );
        Ok(status)
    }

    async fn install_root(
        &self,
        root: keylink_crypto::RootKey,
        status: SyncStatus,
    ) -> CoreResult<()> {
        let version = status.current_key_version;
        store_root_key(&*self.secrets, &root, version).await?;
        let record = self.relay.get_device(&self.device_id).await?;
        let seen_at = match status.reset_at {
            Some(reset_at) => reset_at.max(record.last_seen_at),
            None => record.last_seen_at,
        };
        self.identity.lock().await.update(record);
        self.trust.update_status(status);
        self.trust.mark_trusted(version, seen_at)
    }

    pub async fn revoke(&self, device_id: &str) -> CoreResult<Device> {
        if device_id == self.device_id {
            return Err(CoreError::invalid_state("a device cannot revoke itself"));
        }
        self.relay.revoke_device(&self.device_id, device_id).await
    }

    pub async fn rename(&self, name: &str) -> CoreResult<Device> {
        self.identity.lock().await.rename(&*self.relay, name).await
    }

    pub async fn set_pairing_policy(&self, policy: &PairingPolicy) -> CoreResult<SyncStatus> {
        let status = self
            .relay
            .set_pairing_policy(&self.device_id, policy)
            .await?;
        self.trust.update_status(status.clone());
        Ok(status)
    }
}
