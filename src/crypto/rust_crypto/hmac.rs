//! TLS 1.2 P_hash using RustCrypto HMAC.

use hmac::digest::core_api::BlockSizeUser;
use hmac::digest::Digest;
use hmac::{Mac, SimpleHmac};
use sha2::{Sha256, Sha384};

use crate::buffer::Buf;
use crate::message::HashAlgorithm;

/// P_hash from RFC 5246 section 5, writing `output_len` bytes to `out`.
pub(super) fn p_hash(
    hash_alg: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    out: &mut Buf,
    output_len: usize,
) -> Result<(), String> {
    match hash_alg {
        HashAlgorithm::SHA256 => p_hash_with::<Sha256>(secret, full_seed, out, output_len),
        HashAlgorithm::SHA384 => p_hash_with::<Sha384>(secret, full_seed, out, output_len),
        _ => Err(format!("Unsupported HMAC hash algorithm: {:?}", hash_alg)),
    }
}

fn p_hash_with<D>(secret: &[u8], seed: &[u8], out: &mut Buf, output_len: usize) -> Result<(), String>
where
    D: Digest + BlockSizeUser,
{
    let new_mac = || {
        <SimpleHmac<D> as Mac>::new_from_slice(secret)
            .map_err(|_| "Invalid HMAC key length".to_string())
    };

    out.clear();

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a_mac = new_mac()?;
    a_mac.update(seed);
    let mut a = a_mac.finalize().into_bytes();

    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut ctx = new_mac()?;
        ctx.update(&a);
        ctx.update(seed);
        let output = ctx.finalize().into_bytes();

        let to_copy = (output_len - out.len()).min(output.len());
        out.extend_from_slice(&output[..to_copy]);

        // A(i+1) = HMAC_hash(secret, A(i))
        let mut next_a = new_mac()?;
        next_a.update(&a);
        a = next_a.finalize().into_bytes();
    }

    Ok(())
}
