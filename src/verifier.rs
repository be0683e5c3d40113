//! Peer identity verification by certificate fingerprint.
//!
//! Real-time media peers present self-signed certificates. Instead of a chain
//! of trust, the peer is identified by the SHA-256 fingerprint it announced
//! out-of-band (the `a=fingerprint` line of an SDP offer/answer).
//!
//! ```
//! use dtls_srtp::verifier::{CertificateVerifier, Fingerprint};
//!
//! let fp: Fingerprint = "sha-256 AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:\
//!                        AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89"
//!     .parse()
//!     .unwrap();
//! let verifier = CertificateVerifier::fingerprint(fp);
//! assert!(verifier.is_authenticated());
//! ```

use std::fmt;
use std::str::FromStr;

use der::Decode;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x509_cert::Certificate as X509Certificate;

use crate::Error;

/// SHA-256 certificate fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a DER encoded certificate.
    pub fn of(cert_der: &[u8]) -> Self {
        Fingerprint(Sha256::digest(cert_der).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(value: [u8; 32]) -> Self {
        Fingerprint(value)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    /// Accepts `sha-256 AB:CD:..` as found in SDP, or bare hex pairs with or
    /// without colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let hex = match s.split_once(char::is_whitespace) {
            Some((alg, rest)) => {
                if !alg.eq_ignore_ascii_case("sha-256") {
                    return Err(Error::Config(format!("unsupported fingerprint hash: {alg}")));
                }
                rest.trim()
            }
            None => s,
        };

        let digits: Vec<u8> = hex.bytes().filter(|b| *b != b':').collect();
        if digits.len() != 64 {
            return Err(Error::Config(format!(
                "fingerprint must be 32 bytes, got {} hex digits",
                digits.len()
            )));
        }

        let mut out = [0u8; 32];
        for (i, pair) in digits.chunks(2).enumerate() {
            let pair = Some(pair)
                .filter(|p| p.iter().all(u8::is_ascii_hexdigit))
                .and_then(|p| std::str::from_utf8(p).ok())
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .ok_or_else(|| Error::Config(format!("invalid hex in fingerprint: {hex}")))?;
            out[i] = pair;
        }
        Ok(Fingerprint(out))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Outcome of [`CertificateVerifier::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Fingerprint),
    Rejected(String),
}

/// Decides whether the peer's leaf certificate is acceptable.
#[derive(Debug, Clone)]
pub struct CertificateVerifier {
    expected: Option<Fingerprint>,
}

impl CertificateVerifier {
    /// Accept only a certificate with this fingerprint.
    pub fn fingerprint(expected: Fingerprint) -> Self {
        CertificateVerifier {
            expected: Some(expected),
        }
    }

    /// Accept any well-formed certificate.
    ///
    /// The connection is then encrypted but the peer is not authenticated.
    /// Anyone on the path can complete the handshake in its place.
    pub fn unauthenticated() -> Self {
        CertificateVerifier { expected: None }
    }

    pub fn is_authenticated(&self) -> bool {
        self.expected.is_some()
    }

    pub fn verify(&self, cert_der: &[u8]) -> Verdict {
        if let Err(e) = X509Certificate::from_der(cert_der) {
            return Verdict::Rejected(format!("malformed certificate: {e}"));
        }

        let actual = Fingerprint::of(cert_der);

        let Some(expected) = &self.expected else {
            warn!("Accepting peer certificate {} without fingerprint check", actual);
            return Verdict::Accepted(actual);
        };

        if bool::from(expected.0.ct_eq(&actual.0)) {
            Verdict::Accepted(actual)
        } else {
            Verdict::Rejected(format!(
                "fingerprint mismatch: expected {}, got {}",
                expected, actual
            ))
        }
    }
}
