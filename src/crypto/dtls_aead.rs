//! DTLS AEAD record formatting types and constants.
//!
//! Kept apart from the pluggable provider: these describe how a DTLS 1.2
//! record feeds an AEAD, not how the AEAD works.

use std::ops::Deref;

use arrayvec::ArrayVec;

use crate::message::{ContentType, Sequence};

/// Explicit nonce length for DTLS AEAD records.
///
/// The explicit nonce is transmitted with each record.
pub(crate) const DTLS_EXPLICIT_NONCE_LEN: usize = 8;

/// GCM authentication tag length.
pub(crate) const GCM_TAG_LEN: usize = 16;

/// Overhead per AEAD record (explicit nonce + tag).
pub(crate) const DTLS_AEAD_OVERHEAD: usize = DTLS_EXPLICIT_NONCE_LEN + GCM_TAG_LEN;

/// Fixed IV portion for DTLS AEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Iv(pub [u8; 4]);

impl Iv {
    pub(crate) fn new(iv: &[u8]) -> Option<Self> {
        iv.try_into().ok().map(Self)
    }
}

/// Full AEAD nonce (fixed IV + explicit nonce).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 12]);

impl Nonce {
    pub(crate) fn new(iv: Iv, explicit_nonce: &[u8; DTLS_EXPLICIT_NONCE_LEN]) -> Self {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&iv.0);
        nonce[4..].copy_from_slice(explicit_nonce);
        Self(nonce)
    }
}

impl Deref for Nonce {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Additional Authenticated Data for a DTLS 1.2 record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(pub ArrayVec<u8, 13>);

impl Aad {
    /// seq_num(8, epoch in the top 2 bytes) + type + version + plaintext length.
    pub(crate) fn new(content_type: ContentType, sequence: Sequence, length: u16) -> Self {
        let mut aad = ArrayVec::new();

        let mut seq_bytes = sequence.sequence_number.to_be_bytes();
        seq_bytes[..2].copy_from_slice(&sequence.epoch.to_be_bytes());
        aad.extend(seq_bytes);

        aad.push(content_type.as_u8());
        aad.push(0xfe);
        aad.push(0xfd);
        aad.extend(length.to_be_bytes());

        Aad(aad)
    }
}

impl Deref for Aad {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
