//! Relay-side pairing session record.
//!
//! `Created -> Claimed -> [SasPending] -> Approved -> Completed`, with
//! `Cancelled` and `Expired` reachable from every non-terminal state.
//! Expiry is lazy: every access first calls [`SessionRecord::refresh`], and an
//! expired session refuses all transitions.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use keylink_crypto::utils::constant_time_eq_str;

use crate::errors::{CoreError, CoreResult, InputError};
use crate::types::{
    ClaimResponse, OutgoingMessage, PairingMessage, PollResponse, Role, SessionStatus,
};

/// Result of a claim attempt that matched this session's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(ClaimResponse),
    /// Same device, same key: a transport retry of an accepted claim.
    Repeated(ClaimResponse),
}

impl ClaimOutcome {
    pub fn into_response(self) -> ClaimResponse {
        match self {
            ClaimOutcome::Claimed(r) | ClaimOutcome::Repeated(r) => r,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    code_hash: String,
    pub issuer_device_id: String,
    pub issuer_public_key: String,
    pub claimer_device_id: Option<String>,
    pub claimer_public_key: Option<String>,
    pub requires_verification: bool,
    status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    messages: Vec<PairingMessage>,
    next_sequence: u64,
}

impl SessionRecord {
    pub fn new(
        id: String,
        code_hash: String,
        issuer_device_id: String,
        issuer_public_key: String,
        requires_verification: bool,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            code_hash,
            issuer_device_id,
            issuer_public_key,
            claimer_device_id: None,
            claimer_public_key: None,
            requires_verification,
            status: SessionStatus::Created,
            created_at: now,
            expires_at: now + ttl,
            messages: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Status as of `now`, applying lazy expiry.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> SessionStatus {
        if !self.status.is_terminal() && now >= self.expires_at {
            debug!(session_id = %self.id, from = ?self.status, "pairing session expired");
            self.status = SessionStatus::Expired;
            self.messages.clear();
        }
        self.status
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn matches_code(&self, code_hash: &str) -> bool {
        constant_time_eq_str(&self.code_hash, code_hash)
    }

    pub fn role_of(&self, device_id: &str) -> Option<Role> {
        if self.issuer_device_id == device_id {
            Some(Role::Issuer)
        } else if self.claimer_device_id.as_deref() == Some(device_id) {
            Some(Role::Claimer)
        } else {
            None
        }
    }

    fn peer_of(&self, role: Role) -> (Option<String>, Option<String>) {
        match role {
            Role::Issuer => (
                self.claimer_device_id.clone(),
                self.claimer_public_key.clone(),
            ),
            Role::Claimer => (
                Some(self.issuer_device_id.clone()),
                Some(self.issuer_public_key.clone()),
            ),
        }
    }

    fn require_role(&self, device_id: &str) -> CoreResult<Role> {
        self.role_of(device_id)
            .ok_or(CoreError::Input(InputError::NotParticipant))
    }

    /// Fail unless the session is live at `now`.
    fn ensure_live(&mut self, now: DateTime<Utc>) -> CoreResult<SessionStatus> {
        match self.refresh(now) {
            SessionStatus::Expired => Err(InputError::Expired.into()),
            s if s.is_terminal() => Err(CoreError::invalid_state(format!(
                "session is {s:?}"
            ))),
            s => Ok(s),
        }
    }

    fn claim_response(&self) -> ClaimResponse {
        ClaimResponse {
            session_id: self.id.clone(),
            issuer_device_id: self.issuer_device_id.clone(),
            issuer_public_key: self.issuer_public_key.clone(),
            requires_verification: self.requires_verification,
            expires_at: self.expires_at,
        }
    }

    /// Claim with an already-verified code hash.
    pub fn claim(
        &mut self,
        now: DateTime<Utc>,
        claimer_device_id: &str,
        claimer_public_key: &str,
    ) -> CoreResult<ClaimOutcome> {
        let status = self.ensure_live(now)?;

        if status != SessionStatus::Created {
            let same_device = self.claimer_device_id.as_deref() == Some(claimer_device_id);
            let same_key = self
                .claimer_public_key
                .as_deref()
                .is_some_and(|k| constant_time_eq_str(k, claimer_public_key));
            if same_device && same_key {
                return Ok(ClaimOutcome::Repeated(self.claim_response()));
            }
            return Err(InputError::AlreadyClaimed.into());
        }

        if claimer_device_id == self.issuer_device_id {
            return Err(CoreError::invalid_state("issuer cannot claim its own session"));
        }

        self.claimer_device_id = Some(claimer_device_id.to_string());
        self.claimer_public_key = Some(claimer_public_key.to_string());
        self.status = SessionStatus::Claimed;
        debug!(session_id = %self.id, claimer = %claimer_device_id, "session claimed");
        Ok(ClaimOutcome::Claimed(self.claim_response()))
    }

    /// Issuer signals the verification code is on screen.
    pub fn begin_verification(
        &mut self,
        now: DateTime<Utc>,
        caller: &str,
    ) -> CoreResult<SessionStatus> {
        let status = self.ensure_live(now)?;
        if self.require_role(caller)? != Role::Issuer {
            return Err(InputError::NotParticipant.into());
        }
        match status {
            SessionStatus::SasPending => Ok(status),
            SessionStatus::Claimed if self.requires_verification => {
                self.status = SessionStatus::SasPending;
                debug!(session_id = %self.id, "verification pending");
                Ok(self.status)
            }
            SessionStatus::Claimed => Err(CoreError::invalid_state(
                "verification is not required for this session",
            )),
            other => Err(CoreError::invalid_state(format!(
                "cannot begin verification from {other:?}"
            ))),
        }
    }

    pub fn approve(&mut self, now: DateTime<Utc>, caller: &str) -> CoreResult<SessionStatus> {
        let status = self.ensure_live(now)?;
        if self.require_role(caller)? != Role::Issuer {
            return Err(CoreError::Denied("only the issuer can approve".into()));
        }
        match status {
            SessionStatus::Approved => Ok(status),
            SessionStatus::SasPending => {
                self.status = SessionStatus::Approved;
                Ok(self.status)
            }
            SessionStatus::Claimed if !self.requires_verification => {
                self.status = SessionStatus::Approved;
                Ok(self.status)
            }
            SessionStatus::Claimed => Err(CoreError::invalid_state(
                "verification must be shown before approval",
            )),
            other => Err(CoreError::invalid_state(format!(
                "cannot approve from {other:?}"
            ))),
        }
    }

    /// Cancel from any non-terminal state. Cancelling a cancelled or expired
    /// session is a no-op that reports its final status.
    pub fn cancel(&mut self, now: DateTime<Utc>, caller: &str) -> CoreResult<SessionStatus> {
        self.require_role(caller)?;
        match self.refresh(now) {
            SessionStatus::Cancelled => Ok(SessionStatus::Cancelled),
            SessionStatus::Expired => Ok(SessionStatus::Expired),
            SessionStatus::Completed => {
                Err(CoreError::invalid_state("session already completed"))
            }
            _ => {
                self.status = SessionStatus::Cancelled;
                self.messages.clear();
                debug!(session_id = %self.id, by = %caller, "session cancelled");
                Ok(self.status)
            }
        }
    }

    /// Append a message between the two participants.
    pub fn append(
        &mut self,
        now: DateTime<Utc>,
        caller: &str,
        msg: OutgoingMessage,
    ) -> CoreResult<PairingMessage> {
        let status = self.ensure_live(now)?;
        let role = self.require_role(caller)?;
        if !matches!(status, SessionStatus::Claimed | SessionStatus::Approved) {
            return Err(CoreError::invalid_state(format!(
                "cannot send messages while {status:?}"
            )));
        }
        let (peer, _) = self.peer_of(role);
        if peer.as_deref() != Some(msg.to_device_id.as_str()) {
            return Err(InputError::NotParticipant.into());
        }

        if let Some(existing) = self.messages.iter().find(|m| m.id == msg.id) {
            if existing.from_device_id == caller {
                return Ok(existing.clone());
            }
            return Err(CoreError::invalid_state("duplicate message id"));
        }

        let message = PairingMessage {
            id: msg.id,
            sequence: self.next_sequence,
            from_device_id: caller.to_string(),
            to_device_id: msg.to_device_id,
            payload_type: msg.payload_type,
            payload: msg.payload,
            created_at: now,
        };
        self.next_sequence += 1;
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Status, peer key and every message to `caller` after `cursor`.
    pub fn poll(
        &mut self,
        now: DateTime<Utc>,
        caller: &str,
        cursor: u64,
    ) -> CoreResult<PollResponse> {
        let status = self.refresh(now);
        let role = self.require_role(caller)?;
        let (peer_device_id, peer_public_key) = self.peer_of(role);
        let messages = self
            .messages
            .iter()
            .filter(|m| m.to_device_id == caller && m.sequence > cursor)
            .cloned()
            .collect();
        Ok(PollResponse {
            status,
            expires_at: self.expires_at,
            requires_verification: self.requires_verification,
            peer_device_id,
            peer_public_key,
            messages,
        })
    }

    /// Claimer confirms the key transfer. Completing twice is a no-op.
    pub fn complete(&mut self, now: DateTime<Utc>, caller: &str) -> CoreResult<SessionStatus> {
        if self.require_role(caller)? != Role::Claimer {
            return Err(CoreError::Denied("only the claimer can complete".into()));
        }
        if self.status == SessionStatus::Completed {
            return Ok(self.status);
        }
        match self.ensure_live(now)? {
            SessionStatus::Approved => {
                self.status = SessionStatus::Completed;
                debug!(session_id = %self.id, "session completed");
                Ok(self.status)
            }
            other => Err(CoreError::invalid_state(format!(
                "cannot complete from {other:?}"
            ))),
        }
    }
}
