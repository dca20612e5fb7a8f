//! In-process relay for tests and the demo.
//!
//! One [`MemoryRelay`] models one account. All state sits behind a single
//! `RwLock`, so every relay call is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use keylink_crypto::hash::log_prefix;

use crate::clock::Clock;
use crate::errors::{CoreError, CoreResult, InputError};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::relay::Relay;
use crate::session::{ClaimOutcome, SessionRecord};
use crate::types::{
    ClaimResponse, CreatedSession, Device, DeviceInfo, OutgoingMessage, PairingMessage,
    PairingPolicy, PollResponse, SessionStatus, SyncStatus, TrustState,
};

/// Largest accepted message payload (base64 text).
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

const MAX_PAIRING_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Account-level pairing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountPolicy {
    pub pairing_ttl_seconds: u64,
    pub require_verification: bool,
    pub failed_claims_per_minute: u32,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            pairing_ttl_seconds: 300,
            require_verification: true,
            failed_claims_per_minute: 5,
        }
    }
}

impl AccountPolicy {
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            failed_claims_per_window: self.failed_claims_per_minute,
            window_secs: 60,
            ..Default::default()
        }
    }
}

fn validate_ttl(ttl: u64) -> CoreResult<()> {
    if ttl == 0 || ttl > MAX_PAIRING_TTL_SECONDS {
        return Err(CoreError::invalid_state(format!(
            "pairing ttl must be between 1 and {MAX_PAIRING_TTL_SECONDS} seconds"
        )));
    }
    Ok(())
}

struct RelayState {
    devices: HashMap<String, Device>,
    status: SyncStatus,
    sessions: HashMap<String, SessionRecord>,
}

impl RelayState {
    fn device(&mut self, id: &str) -> CoreResult<&mut Device> {
        self.devices
            .get_mut(id)
            .ok_or(CoreError::Input(InputError::UnknownDevice))
    }

    /// A registered, non-revoked device.
    fn active_device(&mut self, id: &str) -> CoreResult<&mut Device> {
        let device = self.device(id)?;
        if device.trust_state == TrustState::Revoked {
            return Err(CoreError::Denied("device has been revoked".into()));
        }
        Ok(device)
    }

    fn session(&mut self, id: &str) -> CoreResult<&mut SessionRecord> {
        self.sessions
            .get_mut(id)
            .ok_or(CoreError::Input(InputError::UnknownSession))
    }

    /// Cancel every live session in which `device_id` plays a part,
    /// except `keep`.
    fn cancel_sessions_of(&mut self, device_id: &str, now: DateTime<Utc>, keep: Option<&str>) {
        for record in self.sessions.values_mut() {
            if Some(record.id.as_str()) == keep {
                continue;
            }
            if record.role_of(device_id).is_some() && !record.refresh(now).is_terminal() {
                let _ = record.cancel(now, device_id);
            }
        }
    }

    fn cancel_all_sessions(&mut self, now: DateTime<Utc>) {
        for record in self.sessions.values_mut() {
            if !record.refresh(now).is_terminal() {
                let issuer = record.issuer_device_id.clone();
                let _ = record.cancel(now, &issuer);
            }
        }
    }
}

pub struct MemoryRelay {
    user_id: String,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    state: RwLock<RelayState>,
}

impl MemoryRelay {
    pub fn new(policy: AccountPolicy, clock: Arc<dyn Clock>) -> Self {
        Self::with_user_id(uuid::Uuid::new_v4().to_string(), policy, clock)
    }

    pub fn with_user_id(user_id: String, policy: AccountPolicy, clock: Arc<dyn Clock>) -> Self {
        let status = SyncStatus {
            encryption_enabled: false,
            current_key_version: 0,
            require_verification: policy.require_verification,
            pairing_ttl_seconds: policy.pairing_ttl_seconds,
            reset_at: None,
        };
        Self {
            user_id,
            clock,
            limiter: RateLimiter::new(policy.rate_limit_config()),
            state: RwLock::new(RelayState {
                devices: HashMap::new(),
                status,
                sessions: HashMap::new(),
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current status of a session, applying lazy expiry.
    pub async fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.sessions.get_mut(session_id).map(|s| s.refresh(now))
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn register_device(&self, device_id: &str, info: &DeviceInfo) -> CoreResult<Device> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(existing) = state.devices.get(device_id) {
            return Ok(existing.clone());
        }

        let trust_state = if state.status.encryption_enabled {
            TrustState::Pending
        } else {
            TrustState::Untrusted
        };
        let device = Device {
            id: device_id.to_string(),
            user_id: self.user_id.clone(),
            name: info.name.clone(),
            platform: info.platform.clone(),
            app_version: info.app_version.clone(),
            os_version: info.os_version.clone(),
            trust_state,
            trusted_key_version: None,
            last_seen_at: now,
            created_at: now,
        };
        state.devices.insert(device_id.to_string(), device.clone());
        info!(device_id = %device_id, trust_state = %trust_state, "device registered");
        Ok(device)
    }

    async fn get_device(&self, device_id: &str) -> CoreResult<Device> {
        let state = self.state.read().await;
        state
            .devices
            .get(device_id)
            .cloned()
            .ok_or(CoreError::Input(InputError::UnknownDevice))
    }

    async fn list_devices(&self, caller: &str) -> CoreResult<Vec<Device>> {
        let state = self.state.read().await;
        if !state.devices.contains_key(caller) {
            return Err(InputError::UnknownDevice.into());
        }
        let mut devices: Vec<Device> = state.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(devices)
    }

    async fn heartbeat(&self, device_id: &str) -> CoreResult<Device> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let device = state.device(device_id)?;
        device.last_seen_at = now;
        Ok(device.clone())
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> CoreResult<Device> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::invalid_state("device name must not be empty"));
        }
        let mut state = self.state.write().await;
        let device = state.active_device(device_id)?;
        device.name = name.to_string();
        Ok(device.clone())
    }

    async fn revoke_device(&self, caller: &str, target: &str) -> CoreResult<Device> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.active_device(caller)?;
        let device = state.device(target)?;
        device.trust_state = TrustState::Revoked;
        device.trusted_key_version = None;
        let revoked = device.clone();
        state.cancel_sessions_of(target, now, None);
        info!(device_id = %target, by = %caller, "device revoked");
        Ok(revoked)
    }

    async fn sync_status(&self) -> CoreResult<SyncStatus> {
        Ok(self.state.read().await.status.clone())
    }

    async fn enable_encryption(&self, caller: &str) -> CoreResult<SyncStatus> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.active_device(caller)?;
        if state.status.encryption_enabled {
            return Err(CoreError::invalid_state("encryption already enabled"));
        }

        state.status.encryption_enabled = true;
        state.status.current_key_version = 1;
        for device in state.devices.values_mut() {
            if device.id == caller {
                device.trust_state = TrustState::Trusted;
                device.trusted_key_version = Some(1);
                device.last_seen_at = now;
            } else if device.trust_state == TrustState::Untrusted {
                device.trust_state = TrustState::Pending;
            }
        }
        info!(by = %caller, "encryption enabled");
        Ok(state.status.clone())
    }

    async fn reset_sync(&self, caller: &str) -> CoreResult<SyncStatus> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if !state.status.encryption_enabled {
            return Err(CoreError::invalid_state("encryption is not enabled"));
        }
        let current = state.status.current_key_version;
        let device = state.active_device(caller)?;
        match (device.trust_state, device.trusted_key_version) {
            (TrustState::Trusted, Some(v)) if v == current => {}
            (trust @ (TrustState::Trusted | TrustState::Recovery), trusted_version) => {
                warn!(device_id = %caller, trust_state = %trust, "reset refused, device must pair again");
                return Err(CoreError::NeedsRepairing {
                    state: trust,
                    trusted_version,
                    current_version: current,
                });
            }
            _ => {
                warn!(device_id = %caller, "reset refused, device holds no root key");
                return Err(CoreError::Denied(
                    "only a device trusted at the current key version can reset".into(),
                ));
            }
        }

        let version = state.status.current_key_version + 1;
        state.status.current_key_version = version;
        state.status.reset_at = Some(now);
        for device in state.devices.values_mut() {
            if device.id == caller {
                device.trust_state = TrustState::Trusted;
                device.trusted_key_version = Some(version);
                device.last_seen_at = now;
            } else if device.trust_state == TrustState::Trusted {
                device.trust_state = TrustState::Recovery;
            }
        }
        state.cancel_all_sessions(now);
        info!(by = %caller, version, "sync reset");
        Ok(state.status.clone())
    }

    async fn set_pairing_policy(
        &self,
        caller: &str,
        policy: &PairingPolicy,
    ) -> CoreResult<SyncStatus> {
        let mut state = self.state.write().await;
        state.active_device(caller)?;
        if let Some(ttl) = policy.pairing_ttl_seconds {
            validate_ttl(ttl)?;
            state.status.pairing_ttl_seconds = ttl;
        }
        if let Some(require) = policy.require_verification {
            state.status.require_verification = require;
        }
        debug!(by = %caller, ?policy, "pairing policy updated");
        Ok(state.status.clone())
    }

    async fn create_session(
        &self,
        caller: &str,
        code_hash: &str,
        issuer_public_key: &str,
    ) -> CoreResult<CreatedSession> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if !state.status.encryption_enabled {
            return Err(CoreError::Denied("encryption is not enabled".into()));
        }
        let current = state.status.current_key_version;
        let issuer = state.active_device(caller)?;
        if issuer.trust_state != TrustState::Trusted
            || issuer.trusted_key_version != Some(current)
        {
            return Err(CoreError::Denied(
                "issuer is not trusted at the current key version".into(),
            ));
        }

        let in_use = state
            .sessions
            .values_mut()
            .any(|s| s.matches_code(code_hash) && !s.refresh(now).is_terminal());
        if in_use {
            return Err(InputError::CodeInUse.into());
        }

        state.cancel_sessions_of(caller, now, None);

        let ttl = state.status.pairing_ttl_seconds;
        validate_ttl(ttl)?;
        let record = SessionRecord::new(
            uuid::Uuid::new_v4().to_string(),
            code_hash.to_string(),
            caller.to_string(),
            issuer_public_key.to_string(),
            state.status.require_verification,
            now,
            Duration::seconds(ttl as i64),
        );
        let created = CreatedSession {
            session_id: record.id.clone(),
            expires_at: record.expires_at,
            requires_verification: record.requires_verification,
        };
        info!(
            session_id = %record.id,
            issuer = %caller,
            code_hash = %log_prefix(code_hash),
            ttl_secs = ttl,
            "pairing session created"
        );
        state.sessions.insert(record.id.clone(), record);
        Ok(created)
    }

    async fn claim_session(
        &self,
        caller: &str,
        code_hash: &str,
        claimer_public_key: &str,
    ) -> CoreResult<ClaimResponse> {
        let now = self.clock.now();
        self.limiter.check(caller, now).await?;

        let mut state = self.state.write().await;
        state.device(caller)?;

        // Every session is compared so the scan does not stop early on a match.
        let mut candidates: Vec<(u8, DateTime<Utc>, String)> = Vec::new();
        for record in state.sessions.values_mut() {
            if !record.matches_code(code_hash) {
                continue;
            }
            let rank = match record.refresh(now) {
                SessionStatus::Created => 0,
                _ if record.claimer_device_id.as_deref() == Some(caller) => 1,
                _ => 2,
            };
            candidates.push((rank, record.created_at, record.id.clone()));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let Some((_, _, session_id)) = candidates.into_iter().next() else {
            drop(state);
            self.limiter.record_failure(caller, now).await;
            warn!(
                claimer = %caller,
                code_hash = %log_prefix(code_hash),
                "claim with unknown pairing code"
            );
            return Err(InputError::InvalidPairingCode.into());
        };

        let outcome = state
            .session(&session_id)?
            .claim(now, caller, claimer_public_key)?;
        if let ClaimOutcome::Claimed(_) = &outcome {
            state.cancel_sessions_of(caller, now, Some(&session_id));
            info!(session_id = %session_id, claimer = %caller, "pairing session claimed");
        }
        drop(state);
        self.limiter.record_success(caller).await;
        Ok(outcome.into_response())
    }

    async fn begin_verification(
        &self,
        caller: &str,
        session_id: &str,
    ) -> CoreResult<SessionStatus> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.session(session_id)?.begin_verification(now, caller)
    }

    async fn approve_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let status = state.session(session_id)?.approve(now, caller)?;
        info!(session_id = %session_id, "pairing session approved");
        Ok(status)
    }

    async fn cancel_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.session(session_id)?.cancel(now, caller)
    }

    async fn send_message(
        &self,
        caller: &str,
        session_id: &str,
        message: &OutgoingMessage,
    ) -> CoreResult<PairingMessage> {
        if message.payload.len() > MAX_PAYLOAD_LEN {
            return Err(CoreError::invalid_state("message payload too large"));
        }
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let stored = state
            .session(session_id)?
            .append(now, caller, message.clone())?;
        debug!(
            session_id = %session_id,
            sequence = stored.sequence,
            payload_type = %stored.payload_type,
            "message queued"
        );
        Ok(stored)
    }

    async fn poll_session(
        &self,
        caller: &str,
        session_id: &str,
        cursor: u64,
    ) -> CoreResult<PollResponse> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.session(session_id)?.poll(now, caller, cursor)
    }

    async fn mark_trusted(
        &self,
        caller: &str,
        session_id: &str,
        version: u32,
    ) -> CoreResult<Device> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let current = state.status.current_key_version;
        if version != current {
            return Err(CoreError::Denied(format!(
                "key version {version} is not the current version {current}"
            )));
        }
        state.session(session_id)?.complete(now, caller)?;

        let device = state.device(caller)?;
        device.trust_state = TrustState::Trusted;
        device.trusted_key_version = Some(version);
        device.last_seen_at = now;
        info!(device_id = %caller, version, "device trusted");
        Ok(device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn info(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            platform: "test".into(),
            app_version: "0.1.0".into(),
            os_version: None,
        }
    }

    async fn account(policy: AccountPolicy) -> (MemoryRelay, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let relay = MemoryRelay::new(policy, clock.clone());
        relay.register_device("owner", &info("owner")).await.unwrap();
        relay.enable_encryption("owner").await.unwrap();
        relay.register_device("new", &info("new")).await.unwrap();
        (relay, clock)
    }

    #[tokio::test]
    async fn test_registration_state_follows_encryption() {
        let clock = Arc::new(ManualClock::default());
        let relay = MemoryRelay::new(AccountPolicy::default(), clock);
        let first = relay.register_device("a", &info("a")).await.unwrap();
        assert_eq!(first.trust_state, TrustState::Untrusted);
        relay.register_device("b", &info("b")).await.unwrap();
        relay.enable_encryption("a").await.unwrap();
        assert_eq!(
            relay.get_device("a").await.unwrap().trust_state,
            TrustState::Trusted
        );
        assert_eq!(
            relay.get_device("b").await.unwrap().trust_state,
            TrustState::Pending
        );
        let late = relay.register_device("c", &info("c")).await.unwrap();
        assert_eq!(late.trust_state, TrustState::Pending);
    }

    #[tokio::test]
    async fn test_only_trusted_devices_create_sessions() {
        let (relay, _) = account(AccountPolicy::default()).await;
        assert!(matches!(
            relay.create_session("new", "h", "pk").await,
            Err(CoreError::Denied(_))
        ));
        relay.create_session("owner", "h", "pk").await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_code_leaves_session_claimable() {
        let (relay, _) = account(AccountPolicy::default()).await;
        let created = relay.create_session("owner", "right", "ipk").await.unwrap();
        assert_eq!(
            relay.claim_session("new", "wrong", "cpk").await.unwrap_err(),
            CoreError::Input(InputError::InvalidPairingCode)
        );
        assert_eq!(
            relay.session_status(&created.session_id).await,
            Some(SessionStatus::Created)
        );
        let resp = relay.claim_session("new", "right", "cpk").await.unwrap();
        assert_eq!(resp.session_id, created.session_id);
        assert_eq!(resp.issuer_public_key, "ipk");
    }

    #[tokio::test]
    async fn test_failed_claims_are_throttled() {
        let (relay, _) = account(AccountPolicy {
            failed_claims_per_minute: 2,
            ..Default::default()
        })
        .await;
        relay.create_session("owner", "right", "ipk").await.unwrap();
        for _ in 0..2 {
            assert!(relay.claim_session("new", "wrong", "cpk").await.is_err());
        }
        assert!(matches!(
            relay.claim_session("new", "right", "cpk").await,
            Err(CoreError::Input(InputError::RateLimited { .. }))
        ));
    }

    #[tokio::test]
    async fn test_throttle_lifts_and_session_survives() {
        let (relay, clock) = account(AccountPolicy {
            failed_claims_per_minute: 1,
            ..Default::default()
        })
        .await;
        let created = relay.create_session("owner", "right", "ipk").await.unwrap();
        assert!(relay.claim_session("new", "wrong", "cpk").await.is_err());
        assert!(relay.claim_session("new", "right", "cpk").await.is_err());
        clock.advance_secs(31);
        let resp = relay.claim_session("new", "right", "cpk").await.unwrap();
        assert_eq!(resp.session_id, created.session_id);
    }

    #[tokio::test]
    async fn test_claim_of_expired_session_reports_expired() {
        let (relay, clock) = account(AccountPolicy {
            pairing_ttl_seconds: 60,
            ..Default::default()
        })
        .await;
        relay.create_session("owner", "right", "ipk").await.unwrap();
        clock.advance_secs(61);
        assert_eq!(
            relay.claim_session("new", "right", "cpk").await.unwrap_err(),
            CoreError::Input(InputError::Expired)
        );
    }

    #[tokio::test]
    async fn test_live_code_cannot_be_reused() {
        let (relay, clock) = account(AccountPolicy {
            pairing_ttl_seconds: 60,
            ..Default::default()
        })
        .await;
        relay.create_session("owner", "same", "ipk").await.unwrap();
        clock.advance_secs(61);
        // Expired sessions release their code.
        relay.create_session("owner", "same", "ipk2").await.unwrap();
        assert_eq!(
            relay.create_session("owner", "same", "ipk3").await.unwrap_err(),
            CoreError::Input(InputError::CodeInUse)
        );
    }

    #[tokio::test]
    async fn test_new_session_cancels_previous_one() {
        let (relay, _) = account(AccountPolicy::default()).await;
        let first = relay.create_session("owner", "one", "ipk").await.unwrap();
        let second = relay.create_session("owner", "two", "ipk").await.unwrap();
        assert_eq!(
            relay.session_status(&first.session_id).await,
            Some(SessionStatus::Cancelled)
        );
        assert_eq!(
            relay.session_status(&second.session_id).await,
            Some(SessionStatus::Created)
        );
    }

    #[tokio::test]
    async fn test_mark_trusted_requires_current_version() {
        let (relay, _) = account(AccountPolicy {
            require_verification: false,
            ..Default::default()
        })
        .await;
        let created = relay.create_session("owner", "c", "ipk").await.unwrap();
        relay.claim_session("new", "c", "cpk").await.unwrap();
        relay.approve_session("owner", &created.session_id).await.unwrap();
        assert!(relay.mark_trusted("new", &created.session_id, 7).await.is_err());
        assert!(relay.mark_trusted("owner", &created.session_id, 1).await.is_err());
        let device = relay.mark_trusted("new", &created.session_id, 1).await.unwrap();
        assert_eq!(device.trust_state, TrustState::Trusted);
        assert_eq!(device.trusted_key_version, Some(1));
        assert_eq!(
            relay.session_status(&created.session_id).await,
            Some(SessionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_reset_pushes_trusted_devices_to_recovery() {
        let (relay, _) = account(AccountPolicy {
            require_verification: false,
            ..Default::default()
        })
        .await;
        let created = relay.create_session("owner", "c", "ipk").await.unwrap();
        relay.claim_session("new", "c", "cpk").await.unwrap();
        relay.approve_session("owner", &created.session_id).await.unwrap();
        relay.mark_trusted("new", &created.session_id, 1).await.unwrap();

        let status = relay.reset_sync("owner").await.unwrap();
        assert_eq!(status.current_key_version, 2);
        assert!(status.reset_at.is_some());
        assert_eq!(
            relay.get_device("new").await.unwrap().trust_state,
            TrustState::Recovery
        );
        let owner = relay.get_device("owner").await.unwrap();
        assert_eq!(owner.trusted_key_version, Some(2));
    }

    #[tokio::test]
    async fn test_pending_device_cannot_reset() {
        let (relay, _) = account(AccountPolicy::default()).await;
        assert!(matches!(
            relay.reset_sync("new").await,
            Err(CoreError::Denied(_))
        ));
        assert_eq!(relay.sync_status().await.unwrap().current_key_version, 1);
        assert_eq!(
            relay.get_device("owner").await.unwrap().trust_state,
            TrustState::Trusted
        );
        assert_eq!(
            relay.get_device("new").await.unwrap().trust_state,
            TrustState::Pending
        );
    }

    #[tokio::test]
    async fn test_recovering_device_cannot_reset_its_way_back() {
        let (relay, _) = account(AccountPolicy {
            require_verification: false,
            ..Default::default()
        })
        .await;
        let created = relay.create_session("owner", "c", "ipk").await.unwrap();
        relay.claim_session("new", "c", "cpk").await.unwrap();
        relay.approve_session("owner", &created.session_id).await.unwrap();
        relay.mark_trusted("new", &created.session_id, 1).await.unwrap();
        relay.reset_sync("owner").await.unwrap();

        assert_eq!(
            relay.reset_sync("new").await.unwrap_err(),
            CoreError::NeedsRepairing {
                state: TrustState::Recovery,
                trusted_version: Some(1),
                current_version: 2,
            }
        );
        assert_eq!(relay.sync_status().await.unwrap().current_key_version, 2);
        assert_eq!(
            relay.get_device("new").await.unwrap().trust_state,
            TrustState::Recovery
        );
    }

    #[tokio::test]
    async fn test_revoked_device_loses_owner_rights() {
        let (relay, _) = account(AccountPolicy::default()).await;
        relay.revoke_device("owner", "new").await.unwrap();
        assert!(matches!(
            relay.reset_sync("new").await,
            Err(CoreError::Denied(_))
        ));
        assert!(matches!(
            relay.rename_device("new", "x").await,
            Err(CoreError::Denied(_))
        ));
        let devices = relay.list_devices("owner").await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_policy_update_validates_ttl() {
        let (relay, _) = account(AccountPolicy::default()).await;
        let policy = PairingPolicy {
            pairing_ttl_seconds: Some(0),
            ..Default::default()
        };
        assert!(relay.set_pairing_policy("owner", &policy).await.is_err());
        let policy = PairingPolicy {
            pairing_ttl_seconds: Some(120),
            require_verification: Some(false),
        };
        let status = relay.set_pairing_policy("owner", &policy).await.unwrap();
        assert_eq!(status.pairing_ttl_seconds, 120);
        assert!(!status.require_verification);
    }

    #[tokio::test]
    async fn test_payload_size_limit() {
        let (relay, _) = account(AccountPolicy {
            require_verification: false,
            ..Default::default()
        })
        .await;
        let created = relay.create_session("owner", "c", "ipk").await.unwrap();
        relay.claim_session("new", "c", "cpk").await.unwrap();
        let msg = OutgoingMessage {
            id: "m".into(),
            to_device_id: "new".into(),
            payload_type: "key-transfer".into(),
            payload: "A".repeat(MAX_PAYLOAD_LEN + 1),
        };
        assert!(relay
            .send_message("owner", &created.session_id, &msg)
            .await
            .is_err());
    }
}
