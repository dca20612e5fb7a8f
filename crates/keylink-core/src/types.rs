//! Wire shapes shared by the client and the relay.
//!
//! JSON field names are camelCase; key material is always base64 text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload type of the message carrying the account root key.
pub const KEY_TRANSFER: &str = "key-transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustState {
    Untrusted,
    Pending,
    Trusted,
    Revoked,
    Recovery,
}

impl std::fmt::Display for TrustState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrustState::Untrusted => "untrusted",
            TrustState::Pending => "pending",
            TrustState::Trusted => "trusted",
            TrustState::Revoked => "revoked",
            TrustState::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub platform: String,
    pub app_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub platform: String,
    pub app_version: String,
    pub os_version: Option<String>,
    pub trust_state: TrustState,
    pub trusted_key_version: Option<u32>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Account-level encryption state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub encryption_enabled: bool,
    pub current_key_version: u32,
    pub require_verification: bool,
    pub pairing_ttl_seconds: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Partial update of the account pairing policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_verification: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Claimed,
    SasPending,
    Approved,
    Completed,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Issuer,
    Claimer,
}

/// A relayed, opaque pairing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingMessage {
    pub id: String,
    pub sequence: u64,
    pub from_device_id: String,
    pub to_device_id: String,
    pub payload_type: String,
    /// Base64 ciphertext.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// A message as submitted by a participant. The id is chosen by the sender
/// so a resubmission after a transport failure is recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub id: String,
    pub to_device_id: String,
    pub payload_type: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub requires_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub session_id: String,
    pub issuer_device_id: String,
    pub issuer_public_key: String,
    pub requires_verification: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    pub requires_verification: bool,
    pub peer_device_id: Option<String>,
    pub peer_public_key: Option<String>,
    pub messages: Vec<PairingMessage>,
}

/// Client-side progress of a pairing attempt, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingPhase {
    AwaitingClaim,
    Verifying,
    ReadyToApprove,
    KeySent,
    AwaitingApproval,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

impl PairingPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairingPhase::Completed
                | PairingPhase::Cancelled
                | PairingPhase::Expired
                | PairingPhase::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_json_is_camel_case() {
        let now = Utc::now();
        let device = Device {
            id: "d1".into(),
            user_id: "u1".into(),
            name: "Laptop".into(),
            platform: "linux".into(),
            app_version: "1.0.0".into(),
            os_version: None,
            trust_state: TrustState::Pending,
            trusted_key_version: None,
            last_seen_at: now,
            created_at: now,
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["trustState"], "pending");
        assert!(json.get("appVersion").is_some());
        assert!(json.get("trustedKeyVersion").is_some());
        let back: Device = serde_json::from_value(json).unwrap();
        assert_eq!(back, device);
    }

    #[test]
    fn test_session_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::SasPending).unwrap(),
            "\"SAS_PENDING\""
        );
        assert!(SessionStatus::Expired.is_terminal());
        assert!(!SessionStatus::Approved.is_terminal());
    }
}
