//! Certificate generation and inspection helpers.
//!
//! The handshake only needs an ephemeral self-signed identity: peers
//! authenticate each other by fingerprint, never by chain.

use std::fmt;

use der::Decode;
use x509_cert::Certificate as X509Certificate;

use crate::verifier::Fingerprint;
use crate::Error;

/// Certificate and private key pair
#[derive(Clone)]
pub struct DtlsCertificate {
    /// Certificate in DER format
    pub certificate: Vec<u8>,
    /// Private key in PKCS#8 DER format
    pub private_key: Vec<u8>,
}

/// Key algorithm of a generated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

/// Parameters for [`generate_certificate`].
#[derive(Debug, Clone)]
pub struct CertificateOptions {
    pub common_name: String,
    pub key_algorithm: KeyAlgorithm,
    pub validity: time::Duration,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        CertificateOptions {
            common_name: "DTLS Peer".to_string(),
            key_algorithm: KeyAlgorithm::EcdsaP256,
            validity: time::Duration::days(30),
        }
    }
}

/// Generate a self-signed P-256 certificate, valid from now for 30 days.
#[cfg(feature = "rcgen")]
pub fn generate_self_signed_certificate() -> Result<DtlsCertificate, Error> {
    generate_certificate(&CertificateOptions::default())
}

/// Generate a self-signed certificate.
#[cfg(feature = "rcgen")]
pub fn generate_certificate(options: &CertificateOptions) -> Result<DtlsCertificate, Error> {
    use rcgen::{
        Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa,
        KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
    };

    let alg = match options.key_algorithm {
        KeyAlgorithm::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
        KeyAlgorithm::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
    };
    let failed = |e: rcgen::RcgenError| Error::Crypto(format!("certificate generation: {e}"));

    let key_pair = KeyPair::generate(alg).map_err(failed)?;

    let mut params = CertificateParams::new(vec![options.common_name.clone()]);
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, options.common_name.clone());
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::NoCa;
    params.alg = alg;
    params.key_pair = Some(key_pair);

    // Back-date a little for peers with skewed clocks.
    let not_before = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
    params.not_before = not_before;
    params.not_after = not_before + options.validity;

    let cert = RcgenCertificate::from_params(params).map_err(failed)?;
    let certificate = cert.serialize_der().map_err(failed)?;
    let private_key = cert.serialize_private_key_der();

    Ok(DtlsCertificate {
        certificate,
        private_key,
    })
}

/// Subject of a DER certificate in RFC 4514 form, e.g. `CN=DTLS Peer`.
pub fn subject(cert_der: &[u8]) -> Result<String, Error> {
    let cert = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::Decode(format!("certificate: {e}")))?;
    Ok(cert.tbs_certificate.subject.to_string())
}

impl DtlsCertificate {
    /// SHA-256 fingerprint of the certificate.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.certificate)
    }
}

impl fmt::Debug for DtlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsCertificate")
            .field("certificate", &self.certificate.len())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
