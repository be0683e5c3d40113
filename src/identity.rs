//! Local endpoint identity.
//!
//! The engine asks an [`IdentityProvider`] for its certificate and key once
//! per connection attempt. Production code generates a fresh self-signed
//! identity; tests hand in a fixed [`DtlsCertificate`].

use std::sync::Arc;

use crate::certificate::DtlsCertificate;
use crate::Error;

/// Source of the local certificate and private key.
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> Result<DtlsCertificate, Error>;
}

/// A fixed identity, reused for every attempt.
impl IdentityProvider for DtlsCertificate {
    fn identity(&self) -> Result<DtlsCertificate, Error> {
        Ok(self.clone())
    }
}

impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    fn identity(&self) -> Result<DtlsCertificate, Error> {
        (**self).identity()
    }
}

/// Generates a new ephemeral self-signed identity on every call.
#[cfg(feature = "rcgen")]
#[derive(Debug, Clone, Default)]
pub struct SelfSignedIdentity {
    options: crate::certificate::CertificateOptions,
}

#[cfg(feature = "rcgen")]
impl SelfSignedIdentity {
    pub fn new(options: crate::certificate::CertificateOptions) -> Self {
        SelfSignedIdentity { options }
    }
}

#[cfg(feature = "rcgen")]
impl IdentityProvider for SelfSignedIdentity {
    fn identity(&self) -> Result<DtlsCertificate, Error> {
        crate::certificate::generate_certificate(&self.options)
    }
}
