//! Cryptographic interfaces, the default RustCrypto backend, and the
//! TLS 1.2 key schedule with its SRTP exporter.

mod dtls_aead;
mod keying;
pub mod provider;
pub mod rust_crypto;
mod schedule;

pub use keying::{ExportedKeys, SrtpProfile};

pub use dtls_aead::{Aad, Nonce};

pub(crate) use dtls_aead::{Iv, DTLS_AEAD_OVERHEAD, DTLS_EXPLICIT_NONCE_LEN};

pub(crate) use schedule::KeySchedule;

pub use provider::{
    ActiveKeyExchange, Cipher, CryptoProvider, CryptoSafe, HashContext, HashProvider,
};
pub use provider::{KeyProvider, PrfProvider, SecureRandom, SignatureVerifier, SigningKey};
pub use provider::{SupportedDtls12CipherSuite, SupportedKxGroup};

// Shared types for provider implementations.
pub use crate::buffer::Buf;
pub use crate::message::{CipherSuite, HashAlgorithm, NamedGroup, SignatureAlgorithm};
