//! Deterministic tagged transcripts.
//!
//! Fields are appended as `(tag, len, bytes)` so the same logical input hashes
//! identically on every device. Used for the SAS input and for AEAD
//! associated data.

use bytes::{BufMut, BytesMut};

use crate::hash::sha256;

/// Tag constants. Values MUST NOT change once released.
pub mod tags {
    pub const DOMAIN: u32 = 0;
    pub const KEY: u32 = 1;
    pub const SESSION_ID: u32 = 2;
    pub const PAYLOAD_TYPE: u32 = 3;
}

#[derive(Clone, Debug, Default)]
pub struct Transcript {
    buf: BytesMut,
}

impl Transcript {
    /// Create a new transcript with the given domain separator.
    pub fn new(domain: &'static str) -> Self {
        let mut t = Self {
            buf: BytesMut::with_capacity(128),
        };
        t.append_str(tags::DOMAIN, domain);
        t
    }

    pub fn append_bytes(&mut self, tag: u32, data: &[u8]) -> &mut Self {
        self.buf.put_u32(tag);
        self.buf.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn append_str(&mut self, tag: u32, s: &str) -> &mut Self {
        self.append_bytes(tag, s.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// SHA-256 of the transcript contents.
    pub fn digest(&self) -> [u8; 32] {
        sha256(&self.buf)
    }
}

/// Associated data binding a relayed payload to its session and payload type.
pub fn message_aad(session_id: &str, payload_type: &str) -> Vec<u8> {
    let mut t = Transcript::new("keylink_msg_aad_v1");
    t.append_str(tags::SESSION_ID, session_id);
    t.append_str(tags::PAYLOAD_TYPE, payload_type);
    t.as_bytes().to_vec()
}
