//! The `key-transfer` payload: the account root key and its version, sealed
//! under the pairing session key.
//!
//! Plaintext is JSON `{"rootKey": <base64>, "version": n}`. Associated data
//! binds the ciphertext to its session and payload type, so a message cannot
//! be replayed into another session.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use keylink_crypto::encoding::{b64_decode, b64_encode};
use keylink_crypto::transcript::message_aad;
use keylink_crypto::{CryptoError, RootKey, SessionKey};

use crate::errors::{CoreError, CoreResult};
use crate::types::KEY_TRANSFER;

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct KeyTransfer {
    root_key: String,
    version: u32,
}

/// Seal the root key for the claimer. Returns base64 ciphertext.
pub fn seal_key_transfer(
    session_key: &SessionKey,
    session_id: &str,
    root: &RootKey,
    version: u32,
) -> CoreResult<String> {
    let body = KeyTransfer {
        root_key: root.to_base64(),
        version,
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&body)?);
    let sealed = session_key.seal(&plaintext, &message_aad(session_id, KEY_TRANSFER))?;
    Ok(b64_encode(&sealed))
}

/// Open a key-transfer payload.
///
/// Any decoding or authentication failure is reported as
/// `AuthenticationFailed`; nothing from an unauthenticated payload is returned.
pub fn open_key_transfer(
    session_key: &SessionKey,
    session_id: &str,
    payload: &str,
) -> CoreResult<(RootKey, u32)> {
    let sealed = b64_decode(payload).map_err(|_| CryptoError::AuthenticationFailed)?;
    let plaintext = Zeroizing::new(session_key.open(&sealed, &message_aad(session_id, KEY_TRANSFER))?);
    let body: KeyTransfer = serde_json::from_slice(&plaintext)
        .map_err(|e| CoreError::Internal(format!("malformed key transfer: {e}")))?;
    let root = RootKey::from_base64(&body.root_key)?;
    Ok((root, body.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylink_crypto::{
        compute_shared_secret, derive_session_key, generate_ephemeral_keypair, generate_root_key,
        keys::PAIRING_SESSION_CONTEXT,
    };

    fn session_keys() -> (SessionKey, SessionKey) {
        let a = generate_ephemeral_keypair().unwrap();
        let b = generate_ephemeral_keypair().unwrap();
        let (pa, pb) = (*a.public(), *b.public());
        let sa = compute_shared_secret(a, &pb).unwrap();
        let sb = compute_shared_secret(b, &pa).unwrap();
        (
            derive_session_key(&sa, PAIRING_SESSION_CONTEXT).unwrap(),
            derive_session_key(&sb, PAIRING_SESSION_CONTEXT).unwrap(),
        )
    }

    #[test]
    fn test_transfer_round_trip() {
        let (issuer, claimer) = session_keys();
        let root = generate_root_key().unwrap();
        let payload = seal_key_transfer(&issuer, "s1", &root, 3).unwrap();
        let (got, version) = open_key_transfer(&claimer, "s1", &payload).unwrap();
        assert_eq!(got, root);
        assert_eq!(version, 3);
    }

    #[test]
    fn test_flipped_bit_fails_authentication() {
        let (issuer, claimer) = session_keys();
        let root = generate_root_key().unwrap();
        let payload = seal_key_transfer(&issuer, "s1", &root, 1).unwrap();
        let mut raw = b64_decode(&payload).unwrap();
        let last = raw.len() - 1;
        raw[last / 2] ^= 0x01;
        let tampered = b64_encode(&raw);
        assert_eq!(
            open_key_transfer(&claimer, "s1", &tampered).unwrap_err(),
            CoreError::Crypto(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_payload_bound_to_session() {
        let (issuer, claimer) = session_keys();
        let root = generate_root_key().unwrap();
        let payload = seal_key_transfer(&issuer, "s1", &root, 1).unwrap();
        assert!(open_key_transfer(&claimer, "s2", &payload).is_err());
        assert!(open_key_transfer(&claimer, "s1", "!!not base64!!").is_err());
    }
}
