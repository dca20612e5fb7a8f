//! Issuer side of pairing.
//!
//! A trusted device that holds the account root key creates a session,
//! shows the pairing code, waits for a claim, shows the SAS and, once the
//! user approves, sends the root key sealed under the session key.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use keylink_crypto::{
    compute_sas, compute_shared_secret, derive_session_key, generate_ephemeral_keypair,
    generate_pairing_code, hash_pairing_code, keys::PAIRING_SESSION_CONTEXT, EphemeralKeyPair,
    PairingCode, PublicKey, SessionKey,
};

use crate::errors::{CoreError, CoreResult, InputError};
use crate::relay::Relay;
use crate::secret_store::{load_current_root_key, SecretStore};
use crate::transfer::seal_key_transfer;
use crate::types::{OutgoingMessage, PairingPhase, PollResponse, SessionStatus, KEY_TRANSFER};

/// Attempts at finding a pairing code not already live on the relay.
const CODE_ATTEMPTS: usize = 4;

// ============================================================================
// State
// ============================================================================

/// What the user shares with the new device.
#[derive(Debug, Clone)]
pub struct PairingInvite {
    pub pairing_code: PairingCode,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

enum IssuerState {
    AwaitingClaim { keypair: EphemeralKeyPair },
    Verifying { session_key: SessionKey, sas: String },
    ReadyToApprove { session_key: SessionKey },
    KeySent,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

impl IssuerState {
    fn phase(&self) -> PairingPhase {
        match self {
            IssuerState::AwaitingClaim { .. } => PairingPhase::AwaitingClaim,
            IssuerState::Verifying { .. } => PairingPhase::Verifying,
            IssuerState::ReadyToApprove { .. } => PairingPhase::ReadyToApprove,
            IssuerState::KeySent => PairingPhase::KeySent,
            IssuerState::Completed => PairingPhase::Completed,
            IssuerState::Cancelled => PairingPhase::Cancelled,
            IssuerState::Expired => PairingPhase::Expired,
            IssuerState::Failed => PairingPhase::Failed,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct IssuerSession {
    relay: Arc<dyn Relay>,
    secrets: Arc<dyn SecretStore>,
    device_id: String,
    session_id: String,
    expires_at: DateTime<Utc>,
    claimer_device_id: Option<String>,
    /// Built once so a retried send reuses the same message id.
    pending_transfer: Option<OutgoingMessage>,
    state: IssuerState,
}

impl IssuerSession {
    /// Open a session on the relay and return the invite to display.
    pub async fn create(
        relay: Arc<dyn Relay>,
        secrets: Arc<dyn SecretStore>,
        device_id: String,
    ) -> CoreResult<(PairingInvite, Self)> {
        if load_current_root_key(&*secrets).await?.is_none() {
            return Err(CoreError::Denied(
                "this device holds no root key to share".into(),
            ));
        }
        let keypair = generate_ephemeral_keypair()?;
        let public_key = keypair.public().to_base64();

        for attempt in 1..=CODE_ATTEMPTS {
            let pairing_code = generate_pairing_code()?;
            let code_hash = hash_pairing_code(&pairing_code)?;
            match relay.create_session(&device_id, &code_hash, &public_key).await {
                Ok(created) => {
                    info!(
                        session_id = %created.session_id,
                        expires_at = %created.expires_at,
                        verification = created.requires_verification,
                        "pairing session created"
                    );
                    let invite = PairingInvite {
                        pairing_code,
                        session_id: created.session_id.clone(),
                        expires_at: created.expires_at,
                    };
                    let session = Self {
                        relay,
                        secrets,
                        device_id,
                        session_id: created.session_id,
                        expires_at: created.expires_at,
                        claimer_device_id: None,
                        pending_transfer: None,
                        state: IssuerState::AwaitingClaim { keypair },
                    };
                    return Ok((invite, session));
                }
                Err(CoreError::Input(InputError::CodeInUse)) => {
                    debug!(attempt, "pairing code collision, drawing another");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::Internal(
            "could not allocate an unused pairing code".into(),
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn phase(&self) -> PairingPhase {
        self.state.phase()
    }

    pub fn claimer_device_id(&self) -> Option<&str> {
        self.claimer_device_id.as_deref()
    }

    /// SAS to show while verifying.
    pub fn verification_code(&self) -> Option<&str> {
        match &self.state {
            IssuerState::Verifying { sas, .. } => Some(sas),
            _ => None,
        }
    }

    /// Fetch the session from the relay and advance.
    pub async fn poll(&mut self) -> CoreResult<PairingPhase> {
        if self.phase().is_terminal() {
            return Ok(self.phase());
        }
        let resp = self
            .relay
            .poll_session(&self.device_id, &self.session_id, 0)
            .await?;

        match resp.status {
            SessionStatus::Expired => self.finish(IssuerState::Expired),
            SessionStatus::Cancelled => self.finish(IssuerState::Cancelled),
            SessionStatus::Completed => self.finish(IssuerState::Completed),
            _ => {
                if matches!(self.state, IssuerState::AwaitingClaim { .. }) {
                    self.on_claimed(&resp).await?;
                }
                if resp.status == SessionStatus::Claimed
                    && matches!(self.state, IssuerState::Verifying { .. })
                {
                    self.relay
                        .begin_verification(&self.device_id, &self.session_id)
                        .await?;
                }
            }
        }
        Ok(self.phase())
    }

    async fn on_claimed(&mut self, resp: &PollResponse) -> CoreResult<()> {
        let (Some(peer_id), Some(peer_key)) = (&resp.peer_device_id, &resp.peer_public_key)
        else {
            return Ok(());
        };
        let keypair = match std::mem::replace(&mut self.state, IssuerState::Failed) {
            IssuerState::AwaitingClaim { keypair } => keypair,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let agreed = PublicKey::from_base64(peer_key)
            .and_then(|peer| compute_shared_secret(keypair, &peer))
            .and_then(|shared| {
                let session_key = derive_session_key(&shared, PAIRING_SESSION_CONTEXT)?;
                Ok((session_key, compute_sas(&shared)))
            });
        let (session_key, sas) = match agreed {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e.into()).await),
        };

        info!(session_id = %self.session_id, claimer = %peer_id, "session claimed");
        self.claimer_device_id = Some(peer_id.clone());
        self.state = if resp.requires_verification {
            IssuerState::Verifying { session_key, sas }
        } else {
            IssuerState::ReadyToApprove { session_key }
        };
        Ok(())
    }

    /// User confirmed the SAS. Seals and sends the root key.
    ///
    /// Safe to call again after a transport error.
    pub async fn approve(&mut self) -> CoreResult<()> {
        let session_key = match &self.state {
            IssuerState::Verifying { session_key, .. }
            | IssuerState::ReadyToApprove { session_key } => session_key,
            IssuerState::KeySent => return Ok(()),
            other => {
                return Err(CoreError::invalid_state(format!(
                    "cannot approve while {:?}",
                    other.phase()
                )))
            }
        };
        let claimer = self
            .claimer_device_id
            .clone()
            .ok_or_else(|| CoreError::Internal("claimed session without claimer".into()))?;

        if self.pending_transfer.is_none() {
            let (root, version) = load_current_root_key(&*self.secrets)
                .await?
                .ok_or_else(|| CoreError::Denied("root key no longer present".into()))?;
            let payload = seal_key_transfer(session_key, &self.session_id, &root, version)?;
            self.pending_transfer = Some(OutgoingMessage {
                id: uuid::Uuid::new_v4().to_string(),
                to_device_id: claimer,
                payload_type: KEY_TRANSFER.to_string(),
                payload,
            });
            debug!(session_id = %self.session_id, version, "key transfer sealed");
        }

        self.relay
            .approve_session(&self.device_id, &self.session_id)
            .await?;
        if let Some(message) = &self.pending_transfer {
            self.relay
                .send_message(&self.device_id, &self.session_id, message)
                .await?;
        }
        self.pending_transfer = None;
        self.state = IssuerState::KeySent;
        info!(session_id = %self.session_id, "root key sent");
        Ok(())
    }

    /// Cancel and drop all session secrets. Idempotent.
    pub async fn cancel(&mut self) -> CoreResult<()> {
        match self.phase() {
            PairingPhase::Completed | PairingPhase::Expired | PairingPhase::Failed => {
                return Ok(())
            }
            _ => {}
        }
        self.finish(IssuerState::Cancelled);
        match self
            .relay
            .cancel_session(&self.device_id, &self.session_id)
            .await
        {
            Ok(SessionStatus::Expired) => {
                self.state = IssuerState::Expired;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn finish(&mut self, state: IssuerState) {
        if self.state.phase() != state.phase() {
            debug!(session_id = %self.session_id, phase = ?state.phase(), "issuer session finished");
        }
        self.pending_transfer = None;
        self.state = state;
    }

    async fn fail(&mut self, err: CoreError) -> CoreError {
        warn!(session_id = %self.session_id, error = %err, "pairing failed, cancelling session");
        self.finish(IssuerState::Failed);
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

impl fmt::Debug for IssuerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerSession")
            .field("session_id", &self.session_id)
            .field("phase", &self.phase())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
