//! SRTP keying material types and profiles used by DTLS-SRTP.

use std::fmt;
use std::str::FromStr;

use zeroize::Zeroize;

use crate::Error;

/// Supported SRTP protection profiles (RFC 5764, RFC 7714).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SrtpProfile {
    /// SRTP_AES128_CM_HMAC_SHA1_80 (RFC 5764)
    Aes128CmSha1_80,
    /// AEAD_AES_128_GCM (RFC 7714)
    AeadAes128Gcm,
    /// AEAD_AES_256_GCM (RFC 7714)
    AeadAes256Gcm,
}

impl SrtpProfile {
    /// All supported profiles ordered by preference.
    pub const ALL: &'static [SrtpProfile] = &[
        SrtpProfile::AeadAes256Gcm,
        SrtpProfile::AeadAes128Gcm,
        SrtpProfile::Aes128CmSha1_80,
    ];

    /// Master key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            SrtpProfile::Aes128CmSha1_80 => 16,
            SrtpProfile::AeadAes128Gcm => 16,
            SrtpProfile::AeadAes256Gcm => 32,
        }
    }

    /// Master salt length in bytes.
    pub fn salt_len(&self) -> usize {
        match self {
            SrtpProfile::Aes128CmSha1_80 => 14,
            SrtpProfile::AeadAes128Gcm => 12,
            SrtpProfile::AeadAes256Gcm => 12,
        }
    }

    /// The length of keying material to extract from the DTLS session in bytes.
    pub fn keying_material_len(&self) -> usize {
        2 * (self.key_len() + self.salt_len())
    }

    /// Parse an OpenSSL style colon separated profile list.
    ///
    /// ```
    /// use dtls_srtp::SrtpProfile;
    ///
    /// let list = SrtpProfile::parse_list("SRTP_AEAD_AES_128_GCM:SRTP_AES128_CM_SHA1_80").unwrap();
    /// assert_eq!(list, vec![SrtpProfile::AeadAes128Gcm, SrtpProfile::Aes128CmSha1_80]);
    /// ```
    pub fn parse_list(s: &str) -> Result<Vec<SrtpProfile>, Error> {
        let mut list = Vec::new();
        for name in s.split(':').map(str::trim).filter(|n| !n.is_empty()) {
            let profile: SrtpProfile = name.parse()?;
            if !list.contains(&profile) {
                list.push(profile);
            }
        }
        Ok(list)
    }
}

impl fmt::Display for SrtpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrtpProfile::Aes128CmSha1_80 => write!(f, "SRTP_AES128_CM_SHA1_80"),
            SrtpProfile::AeadAes128Gcm => write!(f, "SRTP_AEAD_AES_128_GCM"),
            SrtpProfile::AeadAes256Gcm => write!(f, "SRTP_AEAD_AES_256_GCM"),
        }
    }
}

impl FromStr for SrtpProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SRTP_AES128_CM_SHA1_80" => Ok(SrtpProfile::Aes128CmSha1_80),
            "SRTP_AEAD_AES_128_GCM" => Ok(SrtpProfile::AeadAes128Gcm),
            "SRTP_AEAD_AES_256_GCM" => Ok(SrtpProfile::AeadAes256Gcm),
            _ => Err(Error::Config(format!("unknown SRTP profile: {}", s))),
        }
    }
}

/// SRTP master keys and salts for both directions.
///
/// Produced once per established handshake. The bytes are wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportedKeys {
    pub profile: SrtpProfile,
    pub client_write_key: Vec<u8>,
    pub client_write_salt: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub server_write_salt: Vec<u8>,
}

impl ExportedKeys {
    /// Split an exporter block laid out as
    /// `client_key | server_key | client_salt | server_salt` (RFC 5764 4.2).
    pub(crate) fn from_block(profile: SrtpProfile, block: &[u8]) -> Result<Self, Error> {
        let k = profile.key_len();
        let s = profile.salt_len();
        if block.len() != profile.keying_material_len() {
            return Err(Error::Crypto(format!(
                "keying material is {} bytes, {} needs {}",
                block.len(),
                profile,
                profile.keying_material_len()
            )));
        }

        Ok(ExportedKeys {
            profile,
            client_write_key: block[..k].to_vec(),
            server_write_key: block[k..2 * k].to_vec(),
            client_write_salt: block[2 * k..2 * k + s].to_vec(),
            server_write_salt: block[2 * k + s..].to_vec(),
        })
    }
}

impl Drop for ExportedKeys {
    fn drop(&mut self) {
        self.client_write_key.zeroize();
        self.client_write_salt.zeroize();
        self.server_write_key.zeroize();
        self.server_write_salt.zeroize();
    }
}

impl fmt::Debug for ExportedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedKeys")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}
