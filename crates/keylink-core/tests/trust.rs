//! Trust state monotonicity.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use keylink_core::trust::TrustStore;
use keylink_core::{Device, SyncStatus, TrustState};

#[derive(Debug, Clone)]
struct Contact {
    remote: TrustState,
    version: u32,
    reset_offset: Option<i64>,
    advance: i64,
}

fn remote_state() -> impl Strategy<Value = TrustState> {
    prop_oneof![
        Just(TrustState::Trusted),
        Just(TrustState::Pending),
        Just(TrustState::Revoked),
        Just(TrustState::Recovery),
    ]
}

fn contact() -> impl Strategy<Value = Contact> {
    (
        remote_state(),
        1u32..4,
        proptest::option::of(-30i64..30),
        0i64..60,
    )
        .prop_map(|(remote, version, reset_offset, advance)| Contact {
            remote,
            version,
            reset_offset,
            advance,
        })
}

fn device(state: TrustState, version: Option<u32>, seen: chrono::DateTime<Utc>) -> Device {
    Device {
        id: "phone".into(),
        user_id: "user".into(),
        name: "phone".into(),
        platform: "test".into(),
        app_version: "0.1.0".into(),
        os_version: None,
        trust_state: state,
        trusted_key_version: version,
        last_seen_at: seen,
        created_at: seen,
    }
}

fn status(version: u32, reset_at: Option<chrono::DateTime<Utc>>) -> SyncStatus {
    SyncStatus {
        encryption_enabled: true,
        current_key_version: version,
        require_verification: true,
        pairing_ttl_seconds: 300,
        reset_at,
    }
}

proptest! {
    #[test]
    fn recovery_is_only_left_by_pairing(contacts in proptest::collection::vec(contact(), 1..24)) {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let store = TrustStore::new(
            &device(TrustState::Trusted, Some(1), start),
            status(1, None),
            Some(1),
        );
        prop_assert_eq!(store.state(), TrustState::Trusted);

        let mut now = start;
        let mut in_recovery = false;
        for c in contacts {
            now += Duration::seconds(c.advance);
            let reset_at = c.reset_offset.map(|o| now + Duration::seconds(o));
            let state = store.observe(
                &device(c.remote, Some(c.version), now),
                status(c.version, reset_at),
            );
            if in_recovery {
                prop_assert_eq!(state, TrustState::Recovery);
            }
            in_recovery = state == TrustState::Recovery;

            let snap = store.snapshot();
            if snap.can_sync() {
                prop_assert_eq!(snap.trust_state, TrustState::Trusted);
                prop_assert_eq!(snap.trusted_key_version, Some(snap.status.current_key_version));
            }
        }

        store.complete_repairing(3, now);
        prop_assert_eq!(store.state(), TrustState::Trusted);
    }

    #[test]
    fn owner_bootstrap_is_refused_in_recovery(version in 1u32..10) {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let store = TrustStore::new(
            &device(TrustState::Recovery, Some(1), start),
            status(version, None),
            None,
        );
        prop_assert_eq!(store.state(), TrustState::Recovery);
        prop_assert!(store.mark_trusted(version, start).is_err());
        prop_assert_eq!(store.state(), TrustState::Recovery);
    }
}
