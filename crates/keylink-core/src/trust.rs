//! Local trust state of this device.
//!
//! The [`TrustStore`] is the single writer of a `tokio::sync::watch` channel.
//! Every mutation publishes a whole [`TrustSnapshot`], so readers such as the
//! sync gate never observe a half-applied transition.
//!
//! `recovery` is sticky: once entered, only [`TrustStore::complete_repairing`]
//! leaves it.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::{CoreError, CoreResult};
use crate::types::{Device, SyncStatus, TrustState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSnapshot {
    pub device_id: String,
    pub trust_state: TrustState,
    pub trusted_key_version: Option<u32>,
    /// Time of the last successful contact with the relay.
    pub last_seen_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
}

impl TrustSnapshot {
    pub fn can_sync(&self) -> bool {
        self.trust_state == TrustState::Trusted
            && self.status.encryption_enabled
            && self.trusted_key_version == Some(self.status.current_key_version)
    }

    /// The key version sync may use, or `NeedsRepairing`.
    pub fn require_current(&self) -> CoreResult<u32> {
        if self.can_sync() {
            Ok(self.status.current_key_version)
        } else {
            Err(self.needs_repairing())
        }
    }

    pub fn needs_repairing(&self) -> CoreError {
        CoreError::NeedsRepairing {
            state: self.trust_state,
            trusted_version: self.trusted_key_version,
            current_version: self.status.current_key_version,
        }
    }
}

fn reconcile(snap: &TrustSnapshot, device: &Device, status: &SyncStatus) -> TrustState {
    use TrustState::*;

    match snap.trust_state {
        Recovery => Recovery,
        _ if device.trust_state == Revoked => Recovery,
        Trusted => {
            let reset_since_last_contact = match (status.reset_at, snap.last_seen_at) {
                (Some(reset_at), Some(seen)) => reset_at > seen,
                _ => false,
            };
            let stale = snap.trusted_key_version != Some(status.current_key_version);
            if reset_since_last_contact || stale || device.trust_state == Recovery {
                Recovery
            } else {
                Trusted
            }
        }
        Untrusted if status.encryption_enabled => Pending,
        other => other,
    }
}

pub struct TrustStore {
    tx: watch::Sender<TrustSnapshot>,
}

impl TrustStore {
    /// Build the local state from the relay record.
    ///
    /// `held_key_version` is the root key version present in the secret
    /// store. A device the relay lists as trusted but that holds no key for
    /// that version starts in `recovery`.
    pub fn new(device: &Device, status: SyncStatus, held_key_version: Option<u32>) -> Self {
        let trust_state = match device.trust_state {
            TrustState::Trusted
                if device.trusted_key_version.is_some()
                    && held_key_version == device.trusted_key_version =>
            {
                TrustState::Trusted
            }
            TrustState::Trusted | TrustState::Revoked | TrustState::Recovery => {
                TrustState::Recovery
            }
            TrustState::Untrusted if status.encryption_enabled => TrustState::Pending,
            other => other,
        };
        let snapshot = TrustSnapshot {
            device_id: device.id.clone(),
            trust_state,
            trusted_key_version: device.trusted_key_version,
            last_seen_at: Some(device.last_seen_at),
            status: status.clone(),
        };
        let (tx, _rx) = watch::channel(snapshot);
        let store = Self { tx };
        store.observe(device, status);
        store
    }

    pub fn snapshot(&self) -> TrustSnapshot {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> TrustState {
        self.tx.borrow().trust_state
    }

    pub fn subscribe(&self) -> watch::Receiver<TrustSnapshot> {
        self.tx.subscribe()
    }

    /// Reconcile with what the relay reports on a contact.
    pub fn observe(&self, device: &Device, status: SyncStatus) -> TrustState {
        let mut next_state = TrustState::Untrusted;
        self.tx.send_modify(|snap| {
            let next = reconcile(snap, device, &status);
            if next != snap.trust_state {
                if next == TrustState::Recovery {
                    warn!(
                        device_id = %snap.device_id,
                        from = %snap.trust_state,
                        trusted_version = ?snap.trusted_key_version,
                        current_version = status.current_key_version,
                        "device entered recovery"
                    );
                } else {
                    info!(device_id = %snap.device_id, from = %snap.trust_state, to = %next, "trust state changed");
                }
            }
            snap.trust_state = next;
            snap.last_seen_at = match snap.last_seen_at {
                Some(prev) if prev > device.last_seen_at => Some(prev),
                _ => Some(device.last_seen_at),
            };
            snap.status = status;
            next_state = next;
        });
        next_state
    }

    /// Replace the cached account status without reconciling.
    pub fn update_status(&self, status: SyncStatus) {
        self.tx.send_modify(|snap| snap.status = status);
    }

    /// Account-owner bootstrap: this device created the key at `version`.
    ///
    /// Refused while in recovery.
    pub fn mark_trusted(&self, version: u32, seen_at: DateTime<Utc>) -> CoreResult<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|snap| {
            if snap.trust_state == TrustState::Recovery {
                result = Err(snap.needs_repairing());
                return false;
            }
            snap.trust_state = TrustState::Trusted;
            snap.trusted_key_version = Some(version);
            snap.last_seen_at = Some(seen_at);
            info!(device_id = %snap.device_id, version, "device trusted");
            true
        });
        result
    }

    /// Successful pairing as Claimer: the only exit from recovery.
    pub fn complete_repairing(&self, version: u32, seen_at: DateTime<Utc>) {
        self.tx.send_modify(|snap| {
            debug!(device_id = %snap.device_id, from = %snap.trust_state, "pairing completed");
            snap.trust_state = TrustState::Trusted;
            snap.trusted_key_version = Some(version);
            snap.last_seen_at = Some(seen_at);
            if snap.status.current_key_version < version {
                snap.status.current_key_version = version;
            }
            info!(device_id = %snap.device_id, version, "device trusted after pairing");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn status(version: u32, reset_at: Option<DateTime<Utc>>) -> SyncStatus {
        SyncStatus {
            encryption_enabled: version > 0,
            current_key_version: version,
            require_verification: true,
            pairing_ttl_seconds: 300,
            reset_at,
        }
    }

    fn device(state: TrustState, version: Option<u32>, seen: DateTime<Utc>) -> Device {
        Device {
            id: "dev".into(),
            user_id: "user".into(),
            name: "Laptop".into(),
            platform: "linux".into(),
            app_version: "1.0".into(),
            os_version: None,
            trust_state: state,
            trusted_key_version: version,
            last_seen_at: seen,
            created_at: seen,
        }
    }

    #[test]
    fn test_registration_states() {
        let now = Utc::now();
        let store = TrustStore::new(&device(TrustState::Untrusted, None, now), status(0, None), None);
        assert_eq!(store.state(), TrustState::Untrusted);

        let store = TrustStore::new(&device(TrustState::Untrusted, None, now), status(1, None), None);
        assert_eq!(store.state(), TrustState::Pending);
    }

    #[test]
    fn test_trusted_without_key_starts_in_recovery() {
        let now = Utc::now();
        let d = device(TrustState::Trusted, Some(1), now);
        assert_eq!(TrustStore::new(&d, status(1, None), None).state(), TrustState::Recovery);
        assert_eq!(TrustStore::new(&d, status(1, None), Some(1)).state(), TrustState::Trusted);
    }

    #[test]
    fn test_reset_moves_trusted_device_to_recovery_and_sticks() {
        let t0 = Utc::now();
        let d = device(TrustState::Trusted, Some(1), t0);
        let store = TrustStore::new(&d, status(1, None), Some(1));
        assert!(store.snapshot().can_sync());

        let reset_at = t0 + Duration::seconds(10);
        let later = device(TrustState::Trusted, Some(1), t0 + Duration::seconds(20));
        assert_eq!(store.observe(&later, status(2, Some(reset_at))), TrustState::Recovery);

        let err = store.snapshot().require_current().unwrap_err();
        assert_eq!(
            err,
            CoreError::NeedsRepairing {
                state: TrustState::Recovery,
                trusted_version: Some(1),
                current_version: 2,
            }
        );

        // Nothing the relay says brings it back.
        let trusted_again = device(TrustState::Trusted, Some(2), t0 + Duration::seconds(30));
        assert_eq!(store.observe(&trusted_again, status(2, Some(reset_at))), TrustState::Recovery);
        assert!(store.mark_trusted(2, t0).is_err());

        store.complete_repairing(2, t0 + Duration::seconds(40));
        assert!(store.snapshot().can_sync());
    }

    #[test]
    fn test_reset_detected_by_timestamp_alone() {
        let t0 = Utc::now();
        let store = TrustStore::new(&device(TrustState::Trusted, Some(1), t0), status(1, None), Some(1));
        let reset_at = t0 + Duration::seconds(5);
        let d = device(TrustState::Trusted, Some(1), t0 + Duration::seconds(6));
        assert_eq!(store.observe(&d, status(1, Some(reset_at))), TrustState::Recovery);
    }

    #[test]
    fn test_own_reset_does_not_trigger_recovery() {
        let t0 = Utc::now();
        let store = TrustStore::new(&device(TrustState::Trusted, Some(1), t0), status(1, None), Some(1));
        let reset_at = t0 + Duration::seconds(5);
        store.update_status(status(2, Some(reset_at)));
        store.mark_trusted(2, reset_at).unwrap();
        let d = device(TrustState::Trusted, Some(2), t0 + Duration::seconds(9));
        assert_eq!(store.observe(&d, status(2, Some(reset_at))), TrustState::Trusted);
        assert!(store.snapshot().can_sync());
    }

    #[test]
    fn test_revocation_observed_on_contact() {
        let t0 = Utc::now();
        let store = TrustStore::new(&device(TrustState::Trusted, Some(1), t0), status(1, None), Some(1));
        let revoked = device(TrustState::Revoked, None, t0);
        assert_eq!(store.observe(&revoked, status(1, None)), TrustState::Recovery);
    }

    #[tokio::test]
    async fn test_subscribers_see_whole_snapshots() {
        let t0 = Utc::now();
        let store = TrustStore::new(&device(TrustState::Pending, None, t0), status(1, None), None);
        let mut rx = store.subscribe();
        store.complete_repairing(1, t0);
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.trust_state, TrustState::Trusted);
        assert_eq!(snap.trusted_key_version, Some(1));
        assert!(snap.can_sync());
    }
}
