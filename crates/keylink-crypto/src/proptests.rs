use proptest::prelude::*;

use crate::aead::{decrypt, encrypt, open, seal};
use crate::exchange::{compute_shared_secret, generate_ephemeral_keypair, SharedSecret};
use crate::keys::{derive_key, derive_session_key, RootKey, KEY_LEN};
use crate::pairing_code::{generate_pairing_code, normalize_pairing_code, PAIRING_CODE_ALPHABET};
use crate::sas::compute_sas;
use crate::transcript::Transcript;
use crate::CryptoError;

fn code_char() -> impl Strategy<Value = char> {
    prop::sample::select(PAIRING_CODE_ALPHABET.to_vec()).prop_map(|b| b as char)
}

proptest! {
    #[test]
    fn test_transcript_determinism(
        tag1 in any::<u32>(),
        data1 in any::<Vec<u8>>(),
        tag2 in any::<u32>(),
        data2 in any::<Vec<u8>>()
    ) {
        let mut t1 = Transcript::new("test");
        t1.append_bytes(tag1, &data1).append_bytes(tag2, &data2);
        let mut t2 = Transcript::new("test");
        t2.append_bytes(tag1, &data1).append_bytes(tag2, &data2);
        prop_assert_eq!(t1.digest(), t2.digest());
    }

    #[test]
    fn test_derive_key_determinism(root in any::<[u8; 32]>(), version in any::<u32>()) {
        let root = RootKey::from_bytes(root);
        let a = derive_key(&root, version).unwrap();
        let b = derive_key(&root, version).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.version(), version);
        if version < u32::MAX {
            let next = derive_key(&root, version + 1).unwrap();
            prop_assert_ne!(a.as_bytes(), next.as_bytes());
        }
    }

    #[test]
    fn test_session_key_determinism(shared in any::<[u8; 32]>(), ctx in any::<Vec<u8>>()) {
        let a = derive_session_key(&SharedSecret::from_bytes(shared), &ctx).unwrap();
        let b = derive_session_key(&SharedSecret::from_bytes(shared), &ctx).unwrap();
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_aead_round_trip(
        key in any::<[u8; KEY_LEN]>(),
        plaintext in any::<Vec<u8>>(),
        aad in any::<Vec<u8>>()
    ) {
        let blob = seal(&key, &plaintext, &aad).unwrap();
        prop_assert_eq!(open(&key, &blob, &aad).unwrap(), plaintext);
    }

    #[test]
    fn test_aead_tamper_rejected(
        key in any::<[u8; KEY_LEN]>(),
        plaintext in any::<Vec<u8>>(),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8
    ) {
        let mut blob = encrypt(&key, &plaintext).unwrap();
        let i = index.index(blob.len());
        blob[i] ^= 1 << bit;
        prop_assert_eq!(decrypt(&key, &blob).unwrap_err(), CryptoError::AuthenticationFailed);
    }

    #[test]
    fn test_sas_agrees_on_equal_secrets(shared in any::<[u8; 32]>()) {
        let a = compute_sas(&SharedSecret::from_bytes(shared));
        let b = compute_sas(&SharedSecret::from_bytes(shared));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_pairing_code_normalization(
        chars in prop::collection::vec(code_char(), 6),
        lower in prop::collection::vec(any::<bool>(), 6),
        pad_left in "[ \t]{0,3}",
        pad_right in "[ \t]{0,3}",
        dash in any::<bool>()
    ) {
        let canonical: String = chars.iter().collect();
        let mut input = pad_left.clone();
        for (i, (c, low)) in chars.iter().zip(lower.iter()).enumerate() {
            if dash && i == 3 {
                input.push('-');
            }
            input.push(if *low { c.to_ascii_lowercase() } else { *c });
        }
        input.push_str(&pad_right);

        let code = normalize_pairing_code(&input).unwrap();
        prop_assert_eq!(code.as_str(), canonical.as_str());
    }
}

#[test]
fn test_agreement_symmetry_many() {
    for _ in 0..32 {
        let a = generate_ephemeral_keypair().unwrap();
        let b = generate_ephemeral_keypair().unwrap();
        let (pa, pb) = (*a.public(), *b.public());
        let sa = compute_shared_secret(a, &pb).unwrap();
        let sb = compute_shared_secret(b, &pa).unwrap();
        assert_eq!(sa.as_bytes(), sb.as_bytes());
        assert_eq!(compute_sas(&sa), compute_sas(&sb));
    }
}

#[test]
fn test_generated_codes_use_alphabet() {
    for _ in 0..500 {
        let code = generate_pairing_code().unwrap();
        assert!(code.as_str().bytes().all(|b| PAIRING_CODE_ALPHABET.contains(&b)));
    }
}
