//! Hash implementations using RustCrypto.

use sha2::{Digest, Sha256, Sha384};

use crate::buffer::Buf;
use crate::crypto::provider::{HashContext, HashProvider};
use crate::message::HashAlgorithm;

/// Hash context implementation using RustCrypto.
#[derive(Debug)]
enum RustCryptoHashContext {
    Sha256(Sha256),
    Sha384(Sha384),
}

impl HashContext for RustCryptoHashContext {
    fn update(&mut self, data: &[u8]) {
        match self {
            RustCryptoHashContext::Sha256(ctx) => ctx.update(data),
            RustCryptoHashContext::Sha384(ctx) => ctx.update(data),
        }
    }

    fn clone_and_finalize(&self, out: &mut Buf) {
        out.clear();
        match self {
            RustCryptoHashContext::Sha256(ctx) => out.extend_from_slice(&ctx.clone().finalize()),
            RustCryptoHashContext::Sha384(ctx) => out.extend_from_slice(&ctx.clone().finalize()),
        }
    }
}

/// Hash provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoHashProvider;

impl HashProvider for RustCryptoHashProvider {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn HashContext>, String> {
        match algorithm {
            HashAlgorithm::SHA256 => Ok(Box::new(RustCryptoHashContext::Sha256(Sha256::new()))),
            HashAlgorithm::SHA384 => Ok(Box::new(RustCryptoHashContext::Sha384(Sha384::new()))),
            _ => Err(format!("Unsupported hash algorithm: {:?}", algorithm)),
        }
    }
}

/// Static instance of the hash provider.
pub(super) static HASH_PROVIDER: RustCryptoHashProvider = RustCryptoHashProvider;
