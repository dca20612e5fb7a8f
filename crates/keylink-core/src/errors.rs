//! Error types for keylink core.
//!
//! Typed input errors are grouped under [`CoreError`], which also carries
//! crypto, trust, transport and storage failures. Errors crossing the relay
//! boundary travel as [`WireError`] and never expose internal details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keylink_crypto::CryptoError;

use crate::types::TrustState;

/// Recoverable user-input errors: malformed codes, unknown or expired
/// sessions, protocol misuse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid pairing code")]
    InvalidPairingCode,

    #[error("unknown pairing session")]
    UnknownSession,

    #[error("unknown device")]
    UnknownDevice,

    #[error("pairing session expired")]
    Expired,

    #[error("pairing session already claimed")]
    AlreadyClaimed,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("too many failed attempts, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("device is not a participant of this session")]
    NotParticipant,

    #[error("pairing code already in use")]
    CodeInUse,
}

/// Unified error type for keylink core operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Sync refused: the device must pair again.
    #[error(
        "re-pairing required (state {state}, trusted version {trusted_version:?}, current version {current_version})"
    )]
    NeedsRepairing {
        state: TrustState,
        trusted_version: Option<u32>,
        current_version: u32,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("denied: {0}")]
    Denied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification used to decide how a caller reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Surface to the user and let them try again.
    Input,
    /// Fatal to the current pairing session only.
    Crypto,
    /// Blocking until the device pairs again.
    Trust,
    /// Retry with backoff.
    Transport,
    /// No safe recovery.
    Fatal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Input(_) => ErrorKind::Input,
            CoreError::Crypto(CryptoError::EntropyUnavailable) => ErrorKind::Fatal,
            CoreError::Crypto(_) => ErrorKind::Crypto,
            CoreError::NeedsRepairing { .. } | CoreError::Denied(_) => ErrorKind::Trust,
            CoreError::Transport(_) => ErrorKind::Transport,
            CoreError::Store(_) | CoreError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Input | ErrorKind::Transport)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        CoreError::Input(InputError::InvalidState(msg.into()))
    }

    /// Stable wire code for this error.
    pub fn wire_code(&self) -> &'static str {
        match self {
            CoreError::Input(e) => match e {
                InputError::InvalidPairingCode => "invalid_pairing_code",
                InputError::UnknownSession => "unknown_session",
                InputError::UnknownDevice => "unknown_device",
                InputError::Expired => "session_expired",
                InputError::AlreadyClaimed => "already_claimed",
                InputError::InvalidState(_) => "invalid_state",
                InputError::RateLimited { .. } => "rate_limited",
                InputError::NotParticipant => "not_participant",
                InputError::CodeInUse => "code_in_use",
            },
            CoreError::Crypto(CryptoError::InvalidKey) => "invalid_key",
            CoreError::Crypto(CryptoError::AuthenticationFailed) => "authentication_failed",
            CoreError::Crypto(CryptoError::InvalidPairingCode) => "invalid_pairing_code",
            CoreError::Crypto(_) => "crypto_error",
            CoreError::NeedsRepairing { .. } => "needs_repairing",
            CoreError::Transport(_) => "transport",
            CoreError::Denied(_) => "denied",
            CoreError::Store(_) | CoreError::Internal(_) => "internal",
        }
    }

    /// Map to a wire-safe error body. Store and internal details stay local.
    pub fn to_wire(&self) -> WireError {
        let message = match self {
            CoreError::Store(_) | CoreError::Internal(_) => "internal error".to_string(),
            CoreError::Crypto(_) => "cryptographic operation failed".to_string(),
            other => other.to_string(),
        };
        let retry_after_secs = match self {
            CoreError::Input(InputError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            _ => None,
        };
        let repair = match self {
            CoreError::NeedsRepairing {
                state,
                trusted_version,
                current_version,
            } => Some(RepairDetail {
                state: *state,
                trusted_version: *trusted_version,
                current_version: *current_version,
            }),
            _ => None,
        };
        WireError {
            code: self.wire_code().to_string(),
            message,
            retry_after_secs,
            repair,
        }
    }

    /// Rebuild an error received from the relay.
    pub fn from_wire(err: &WireError) -> Self {
        match err.code.as_str() {
            "invalid_pairing_code" => InputError::InvalidPairingCode.into(),
            "unknown_session" => InputError::UnknownSession.into(),
            "unknown_device" => InputError::UnknownDevice.into(),
            "session_expired" => InputError::Expired.into(),
            "already_claimed" => InputError::AlreadyClaimed.into(),
            "invalid_state" => InputError::InvalidState(err.message.clone()).into(),
            "rate_limited" => InputError::RateLimited {
                retry_after_secs: err.retry_after_secs.unwrap_or(60),
            }
            .into(),
            "not_participant" => InputError::NotParticipant.into(),
            "code_in_use" => InputError::CodeInUse.into(),
            "invalid_key" => CryptoError::InvalidKey.into(),
            "authentication_failed" => CryptoError::AuthenticationFailed.into(),
            "needs_repairing" => match &err.repair {
                Some(detail) => CoreError::NeedsRepairing {
                    state: detail.state,
                    trusted_version: detail.trusted_version,
                    current_version: detail.current_version,
                },
                None => CoreError::Denied(err.message.clone()),
            },
            "denied" => CoreError::Denied(err.message.clone()),
            "transport" => CoreError::Transport(err.message.clone()),
            _ => CoreError::Internal(format!("{}: {}", err.code, err.message)),
        }
    }
}

/// Error body returned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairDetail>,
}

/// Trust details of a `needs_repairing` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairDetail {
    pub state: TrustState,
    pub trusted_version: Option<u32>,
    pub current_version: u32,
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization: {e}"))
    }
}
