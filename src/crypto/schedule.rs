//! TLS 1.2 key schedule and the DTLS-SRTP exporter.
//!
//! Every derivation runs through the provider's PRF (RFC 5246 section 5):
//!
//! ```text
//! master_secret = PRF(pre_master_secret, "master secret", client_random + server_random)[..48]
//!               | PRF(pre_master_secret, "extended master secret", session_hash)[..48]
//! key_block     = PRF(master_secret, "key expansion", server_random + client_random)
//! verify_data   = PRF(master_secret, finished_label, handshake_hash)[..12]
//! srtp_block    = PRF(master_secret, "EXTRACTOR-dtls_srtp", client_random + server_random)
//! ```

use zeroize::{Zeroize, Zeroizing};

use super::provider::PrfProvider;
use super::{ExportedKeys, Iv, SrtpProfile};
use crate::buffer::Buf;
use crate::message::HashAlgorithm;
use crate::Error;

const MASTER_SECRET_LEN: usize = 48;

const LABEL_MASTER_SECRET: &str = "master secret";
const LABEL_EXTENDED_MASTER_SECRET: &str = "extended master secret";
const LABEL_KEY_EXPANSION: &str = "key expansion";
const LABEL_SRTP_EXPORTER: &str = "EXTRACTOR-dtls_srtp";

/// Record protection keys for both directions.
pub(crate) struct KeyBlock {
    pub client_write_key: Zeroizing<Vec<u8>>,
    pub server_write_key: Zeroizing<Vec<u8>>,
    pub client_write_iv: Iv,
    pub server_write_iv: Iv,
}

pub(crate) struct KeySchedule {
    prf: &'static dyn PrfProvider,
    hash: HashAlgorithm,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    exported: bool,
    scratch: Buf,
}

impl KeySchedule {
    pub fn new(prf: &'static dyn PrfProvider, hash: HashAlgorithm) -> Self {
        KeySchedule {
            prf,
            hash,
            master_secret: None,
            exported: false,
            scratch: Buf::new(),
        }
    }

    fn prf(&mut self, secret: &[u8], label: &str, seed: &[u8], len: usize) -> Result<Buf, Error> {
        let mut out = Buf::new();
        self.prf
            .prf_tls12(secret, label, seed, &mut out, len, &mut self.scratch, self.hash)
            .map_err(Error::Crypto)?;
        if out.len() != len {
            return Err(Error::Crypto(format!(
                "PRF produced {} bytes, wanted {}",
                out.len(),
                len
            )));
        }
        Ok(out)
    }

    fn master_secret(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        self.master_secret
            .clone()
            .ok_or_else(|| Error::Crypto("no master secret".into()))
    }

    /// RFC 5246 8.1 master secret.
    pub fn derive_master_secret(
        &mut self,
        pre_master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<(), Error> {
        let mut seed = Buf::new();
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        let out = self.prf(pre_master_secret, LABEL_MASTER_SECRET, &seed, MASTER_SECRET_LEN)?;
        self.master_secret = Some(Zeroizing::new(out.into_vec()));
        Ok(())
    }

    /// RFC 7627 extended master secret, seeded by the session hash instead of
    /// the hello randoms.
    pub fn derive_extended_master_secret(
        &mut self,
        pre_master_secret: &[u8],
        session_hash: &[u8],
    ) -> Result<(), Error> {
        let out = self.prf(
            pre_master_secret,
            LABEL_EXTENDED_MASTER_SECRET,
            session_hash,
            MASTER_SECRET_LEN,
        )?;
        self.master_secret = Some(Zeroizing::new(out.into_vec()));
        Ok(())
    }

    /// Expand the master secret into AEAD keys and fixed IVs.
    ///
    /// AES-GCM suites have no MAC keys, so the block is
    /// `client_key | server_key | client_iv | server_iv`.
    pub fn key_block(
        &mut self,
        client_random: &[u8],
        server_random: &[u8],
        key_len: usize,
        iv_len: usize,
    ) -> Result<KeyBlock, Error> {
        let master = self.master_secret()?;
        let mut seed = Buf::new();
        seed.extend_from_slice(server_random);
        seed.extend_from_slice(client_random);
        let mut block = self.prf(&master, LABEL_KEY_EXPANSION, &seed, 2 * key_len + 2 * iv_len)?;

        let iv = |at: usize| {
            Iv::new(&block[at..at + iv_len])
                .ok_or_else(|| Error::Crypto(format!("unsupported fixed IV length {}", iv_len)))
        };
        let client_write_iv = iv(2 * key_len)?;
        let server_write_iv = iv(2 * key_len + iv_len)?;

        let keys = KeyBlock {
            client_write_key: Zeroizing::new(block[..key_len].to_vec()),
            server_write_key: Zeroizing::new(block[key_len..2 * key_len].to_vec()),
            client_write_iv,
            server_write_iv,
        };
        block.zeroize();
        Ok(keys)
    }

    /// `Finished.verify_data` for `label` ("client finished"/"server finished").
    pub fn verify_data(
        &mut self,
        label: &str,
        handshake_hash: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, Error> {
        let master = self.master_secret()?;
        Ok(self.prf(&master, label, handshake_hash, len)?.into_vec())
    }

    /// RFC 5764 4.2 keying material. Runs once per handshake, after which
    /// the master secret is wiped.
    pub fn export_keys(
        &mut self,
        profile: SrtpProfile,
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<ExportedKeys, Error> {
        if self.exported {
            return Err(Error::Crypto("SRTP keys already exported".into()));
        }
        let master = self.master_secret()?;

        let mut seed = Buf::new();
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        let mut block = self.prf(
            &master,
            LABEL_SRTP_EXPORTER,
            &seed,
            profile.keying_material_len(),
        )?;

        let keys = ExportedKeys::from_block(profile, &block);
        block.zeroize();

        self.exported = true;
        self.master_secret = None;
        keys
    }
}
