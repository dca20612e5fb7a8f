//! Claimer side of pairing.
//!
//! The new (or recovering) device enters the pairing code, claims the
//! session, shows the SAS, and waits for the sealed root key. On success it
//! confirms with the relay, stores the key and becomes trusted. The key is
//! only written to the secret store once the relay has accepted it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use keylink_crypto::{
    compute_sas, compute_shared_secret, derive_session_key, generate_ephemeral_keypair,
    hash_pairing_code, keys::PAIRING_SESSION_CONTEXT, normalize_pairing_code, PublicKey,
    RootKey, SessionKey,
};

use crate::config::RetryPolicy;
use crate::errors::{CoreError, CoreResult, InputError};
use crate::relay::Relay;
use crate::secret_store::{store_root_key, SecretStore};
use crate::transfer::open_key_transfer;
use crate::trust::TrustStore;
use crate::types::{ClaimResponse, PairingMessage, PairingPhase, SessionStatus, KEY_TRANSFER};

enum ClaimerState {
    AwaitingApproval {
        session_key: SessionKey,
        sas: Option<String>,
    },
    /// Key opened, relay confirmation not yet delivered.
    Confirming {
        root: RootKey,
        version: u32,
    },
    Completed {
        version: u32,
    },
    Cancelled,
    Expired,
    Failed,
}

pub struct ClaimerSession {
    relay: Arc<dyn Relay>,
    secrets: Arc<dyn SecretStore>,
    trust: Arc<TrustStore>,
    device_id: String,
    session_id: String,
    issuer_device_id: String,
    expires_at: DateTime<Utc>,
    /// Highest message sequence fully handled.
    cursor: u64,
    state: ClaimerState,
}

async fn claim_with_retry(
    relay: &dyn Relay,
    device_id: &str,
    code_hash: &str,
    public_key: &str,
    retry: &RetryPolicy,
) -> CoreResult<ClaimResponse> {
    let mut failures = 0;
    loop {
        match relay.claim_session(device_id, code_hash, public_key).await {
            Err(e) if e.is_transport() && failures + 1 < retry.attempts => {
                failures += 1;
                let delay = retry.delay_for(failures);
                debug!(error = %e, ?delay, "claim not delivered, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

impl ClaimerSession {
    /// Claim the session behind `code`.
    ///
    /// Transport failures are retried with the same ephemeral key, which the
    /// relay treats as the same claim.
    pub async fn claim(
        relay: Arc<dyn Relay>,
        secrets: Arc<dyn SecretStore>,
        trust: Arc<TrustStore>,
        device_id: String,
        code: &str,
        retry: &RetryPolicy,
    ) -> CoreResult<Self> {
        let code = normalize_pairing_code(code).map_err(|_| InputError::InvalidPairingCode)?;
        let code_hash = hash_pairing_code(&code)?;
        drop(code);

        let keypair = generate_ephemeral_keypair()?;
        let public_key = keypair.public().to_base64();
        let resp = claim_with_retry(&*relay, &device_id, &code_hash, &public_key, retry).await?;

        let agreed = PublicKey::from_base64(&resp.issuer_public_key)
            .and_then(|issuer| compute_shared_secret(keypair, &issuer))
            .and_then(|shared| {
                let session_key = derive_session_key(&shared, PAIRING_SESSION_CONTEXT)?;
                Ok((session_key, compute_sas(&shared)))
            });
        let (session_key, sas) = match agreed {
            Ok(v) => v,
            Err(e) => {
                warn!(session_id = %resp.session_id, error = %e, "issuer key rejected, cancelling");
                if let Err(cancel_err) = relay.cancel_session(&device_id, &resp.session_id).await {
                    debug!(error = %cancel_err, "cancel after failure not delivered");
                }
                return Err(e.into());
            }
        };

        info!(
            session_id = %resp.session_id,
            issuer = %resp.issuer_device_id,
            verification = resp.requires_verification,
            "pairing session claimed"
        );
        Ok(Self {
            relay,
            secrets,
            trust,
            device_id,
            session_id: resp.session_id,
            issuer_device_id: resp.issuer_device_id,
            expires_at: resp.expires_at,
            cursor: 0,
            state: ClaimerState::AwaitingApproval {
                session_key,
                sas: resp.requires_verification.then_some(sas),
            },
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn issuer_device_id(&self) -> &str {
        &self.issuer_device_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn phase(&self) -> PairingPhase {
        match self.state {
            ClaimerState::AwaitingApproval { .. } | ClaimerState::Confirming { .. } => {
                PairingPhase::AwaitingApproval
            }
            ClaimerState::Completed { .. } => PairingPhase::Completed,
            ClaimerState::Cancelled => PairingPhase::Cancelled,
            ClaimerState::Expired => PairingPhase::Expired,
            ClaimerState::Failed => PairingPhase::Failed,
        }
    }

    /// SAS to compare with the issuer's screen, when verification is on.
    pub fn verification_code(&self) -> Option<&str> {
        match &self.state {
            ClaimerState::AwaitingApproval { sas, .. } => sas.as_deref(),
            _ => None,
        }
    }

    /// Key version received, once completed.
    pub fn received_version(&self) -> Option<u32> {
        match self.state {
            ClaimerState::Completed { version } => Some(version),
            _ => None,
        }
    }

    pub async fn poll(&mut self) -> CoreResult<PairingPhase> {
        if self.phase().is_terminal() {
            return Ok(self.phase());
        }
        if matches!(self.state, ClaimerState::Confirming { .. }) {
            self.confirm().await?;
            return Ok(self.phase());
        }
        let mut resp = self
            .relay
            .poll_session(&self.device_id, &self.session_id, self.cursor)
            .await?;
        resp.messages.sort_by_key(|m| m.sequence);

        for message in &resp.messages {
            if message.sequence <= self.cursor {
                continue;
            }
            self.handle_message(message).await?;
            self.cursor = message.sequence;
            if self.phase().is_terminal() {
                return Ok(self.phase());
            }
        }

        match resp.status {
            SessionStatus::Expired => self.state = ClaimerState::Expired,
            SessionStatus::Cancelled => self.state = ClaimerState::Cancelled,
            _ => {}
        }
        Ok(self.phase())
    }

    async fn handle_message(&mut self, message: &PairingMessage) -> CoreResult<()> {
        if message.payload_type != KEY_TRANSFER || message.from_device_id != self.issuer_device_id
        {
            debug!(
                session_id = %self.session_id,
                sequence = message.sequence,
                payload_type = %message.payload_type,
                "ignoring message"
            );
            return Ok(());
        }
        let ClaimerState::AwaitingApproval { session_key, .. } = &self.state else {
            return Ok(());
        };
        let opened = open_key_transfer(session_key, &self.session_id, &message.payload);
        let (root, version) = match opened {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e).await),
        };
        self.state = ClaimerState::Confirming { root, version };
        self.confirm().await
    }

    /// Confirm with the relay, then store the key. Transport failures leave
    /// the opened key in place for the next poll.
    async fn confirm(&mut self) -> CoreResult<()> {
        let ClaimerState::Confirming { version, .. } = &self.state else {
            return Ok(());
        };
        let version = *version;
        let device = match self
            .relay
            .mark_trusted(&self.device_id, &self.session_id, version)
            .await
        {
            Ok(device) => device,
            Err(e) if e.is_transport() => {
                debug!(session_id = %self.session_id, error = %e, "confirmation not delivered");
                return Err(e);
            }
            Err(e) => return Err(self.fail(e).await),
        };
        let ClaimerState::Confirming { root, .. } = &self.state else {
            return Ok(());
        };
        store_root_key(&*self.secrets, root, version).await?;
        self.trust.complete_repairing(version, device.last_seen_at);
        self.state = ClaimerState::Completed { version };
        info!(session_id = %self.session_id, version, "root key received, device trusted");
        Ok(())
    }

    /// Cancel and drop the session key. Idempotent.
    pub async fn cancel(&mut self) -> CoreResult<()> {
        if matches!(
            self.phase(),
            PairingPhase::Completed | PairingPhase::Expired | PairingPhase::Failed
        ) {
            return Ok(());
        }
        self.state = ClaimerState::Cancelled;
        match self
            .relay
            .cancel_session(&self.device_id, &self.session_id)
            .await
        {
            Ok(SessionStatus::Expired) => {
                self.state = ClaimerState::Expired;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Local expiry once the deadline has passed without relay contact.
    pub(crate) fn expire(&mut self) {
        if !self.phase().is_terminal() {
            self.state = ClaimerState::Expired;
        }
    }

    async fn fail(&mut self, err: CoreError) -> CoreError {
        warn!(session_id = %self.session_id, error = %err, "pairing failed, cancelling session");
        self.state = ClaimerState::Failed;
        if let Err(e) = self
            .relay
            .cancel_session(&self.device_id, &self.session_id)
            .await
        {
            debug!(error = %e, "cancel after failure not delivered");
        }
        err
    }
}

impl fmt::Debug for ClaimerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimerSession")
            .field("session_id", &self.session_id)
            .field("issuer", &self.issuer_device_id)
            .field("phase", &self.phase())
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::harness::FaultyRelay;
    use crate::issuer::IssuerSession;
    use crate::memory_relay::{AccountPolicy, MemoryRelay};
    use crate::secret_store::{current_key_version, load_current_root_key, MemorySecretStore};
    use crate::types::{DeviceInfo, TrustState};
    use keylink_crypto::generate_root_key;
    use std::time::Duration;

    struct Fixture {
        relay: Arc<MemoryRelay>,
        clock: Arc<ManualClock>,
        owner_secrets: Arc<MemorySecretStore>,
        new_secrets: Arc<MemorySecretStore>,
        new_trust: Arc<TrustStore>,
    }

    fn info(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            platform: "test".into(),
            app_version: "0.1.0".into(),
            os_version: None,
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(4),
            attempts: 3,
        }
    }

    async fn fixture(policy: AccountPolicy) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let relay = Arc::new(MemoryRelay::new(policy, clock.clone()));
        relay.register_device("owner", &info("owner")).await.unwrap();
        let status = relay.enable_encryption("owner").await.unwrap();
        let owner_secrets = Arc::new(MemorySecretStore::new());
        store_root_key(&*owner_secrets, &generate_root_key().unwrap(), 1)
            .await
            .unwrap();
        let device = relay.register_device("new", &info("new")).await.unwrap();
        Fixture {
            relay,
            clock,
            owner_secrets,
            new_secrets: Arc::new(MemorySecretStore::new()),
            new_trust: Arc::new(TrustStore::new(&device, status, None)),
        }
    }

    async fn claim(f: &Fixture, code: &str) -> CoreResult<ClaimerSession> {
        ClaimerSession::claim(
            f.relay.clone(),
            f.new_secrets.clone(),
            f.new_trust.clone(),
            "new".into(),
            code,
            &retry(),
        )
        .await
    }

    #[tokio::test]
    async fn test_full_exchange_without_verification() {
        let f = fixture(AccountPolicy {
            require_verification: false,
            ..Default::default()
        })
        .await;
        let (invite, mut issuer) =
            IssuerSession::create(f.relay.clone(), f.owner_secrets.clone(), "owner".into())
                .await
                .unwrap();

        let mut claimer = claim(&f, &invite.pairing_code.as_str().to_lowercase())
            .await
            .unwrap();
        assert_eq!(claimer.verification_code(), None);
        assert_eq!(f.new_trust.state(), TrustState::Pending);

        assert_eq!(issuer.poll().await.unwrap(), PairingPhase::ReadyToApprove);
        issuer.approve().await.unwrap();

        assert_eq!(claimer.poll().await.unwrap(), PairingPhase::Completed);
        assert_eq!(claimer.received_version(), Some(1));
        assert_eq!(f.new_trust.state(), TrustState::Trusted);
        assert_eq!(issuer.poll().await.unwrap(), PairingPhase::Completed);

        let (ours, _) = load_current_root_key(&*f.new_secrets).await.unwrap().unwrap();
        let (theirs, _) = load_current_root_key(&*f.owner_secrets).await.unwrap().unwrap();
        assert_eq!(ours, theirs);
    }

    #[tokio::test]
    async fn test_both_sides_show_the_same_code() {
        let f = fixture(AccountPolicy::default()).await;
        let (invite, mut issuer) =
            IssuerSession::create(f.relay.clone(), f.owner_secrets.clone(), "owner".into())
                .await
                .unwrap();
        let mut claimer = claim(&f, invite.pairing_code.as_str()).await.unwrap();
        issuer.poll().await.unwrap();
        assert_eq!(claimer.verification_code(), issuer.verification_code());
        assert!(claimer.verification_code().is_some());
        assert_eq!(claimer.poll().await.unwrap(), PairingPhase::AwaitingApproval);
    }

    #[tokio::test]
    async fn test_malformed_code_rejected_locally() {
        let f = fixture(AccountPolicy::default()).await;
        assert_eq!(
            claim(&f, "AB-01").await.unwrap_err(),
            CoreError::Input(InputError::InvalidPairingCode)
        );
        assert_eq!(f.relay.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_issuer_cancel_is_seen_by_claimer() {
        let f = fixture(AccountPolicy::default()).await;
        let (invite, mut issuer) =
            IssuerSession::create(f.relay.clone(), f.owner_secrets.clone(), "owner".into())
                .await
                .unwrap();
        let mut claimer = claim(&f, invite.pairing_code.as_str()).await.unwrap();
        issuer.cancel().await.unwrap();
        assert_eq!(claimer.poll().await.unwrap(), PairingPhase::Cancelled);
        assert_eq!(claimer.verification_code(), None);
        assert_eq!(f.new_trust.state(), TrustState::Pending);
    }

    #[tokio::test]
    async fn test_expiry_is_terminal() {
        let f = fixture(AccountPolicy::default()).await;
        let (invite, _issuer) =
            IssuerSession::create(f.relay.clone(), f.owner_secrets.clone(), "owner".into())
                .await
                .unwrap();
        let mut claimer = claim(&f, invite.pairing_code.as_str()).await.unwrap();
        f.clock.advance_secs(301);
        assert_eq!(claimer.poll().await.unwrap(), PairingPhase::Expired);
        claimer.cancel().await.unwrap();
        assert_eq!(claimer.phase(), PairingPhase::Expired);
    }

    async fn approved_claim_via(f: &Fixture, relay: Arc<FaultyRelay>) -> ClaimerSession {
        let (invite, mut issuer) =
            IssuerSession::create(f.relay.clone(), f.owner_secrets.clone(), "owner".into())
                .await
                .unwrap();
        let claimer = ClaimerSession::claim(
            relay,
            f.new_secrets.clone(),
            f.new_trust.clone(),
            "new".into(),
            invite.pairing_code.as_str(),
            &retry(),
        )
        .await
        .unwrap();
        issuer.poll().await.unwrap();
        issuer.approve().await.unwrap();
        claimer
    }

    #[tokio::test]
    async fn test_rejected_confirmation_stores_nothing() {
        let f = fixture(AccountPolicy::default()).await;
        let faulty = Arc::new(FaultyRelay::new(f.relay.clone()));
        faulty
            .set_confirm_error(Some(CoreError::Denied("reset in progress".into())))
            .await;
        let mut claimer = approved_claim_via(&f, faulty).await;

        assert!(matches!(claimer.poll().await, Err(CoreError::Denied(_))));
        assert_eq!(claimer.phase(), PairingPhase::Failed);
        assert_eq!(current_key_version(&*f.new_secrets).await.unwrap(), None);
        assert!(load_current_root_key(&*f.new_secrets).await.unwrap().is_none());
        assert_eq!(f.new_trust.state(), TrustState::Pending);
        assert_eq!(
            f.relay.session_status(claimer.session_id()).await,
            Some(SessionStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_undelivered_confirmation_is_retried() {
        let f = fixture(AccountPolicy::default()).await;
        let faulty = Arc::new(FaultyRelay::new(f.relay.clone()));
        faulty
            .set_confirm_error(Some(CoreError::Transport("connection reset".into())))
            .await;
        let mut claimer = approved_claim_via(&f, faulty.clone()).await;

        assert!(claimer.poll().await.unwrap_err().is_transport());
        assert_eq!(claimer.phase(), PairingPhase::AwaitingApproval);
        assert_eq!(current_key_version(&*f.new_secrets).await.unwrap(), None);

        faulty.set_confirm_error(None).await;
        assert_eq!(claimer.poll().await.unwrap(), PairingPhase::Completed);
        assert_eq!(current_key_version(&*f.new_secrets).await.unwrap(), Some(1));
        assert_eq!(f.new_trust.state(), TrustState::Trusted);
    }
}
