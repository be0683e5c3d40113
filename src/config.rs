use std::time::Duration;

use crate::crypto::{rust_crypto, CryptoProvider, SrtpProfile};
use crate::message::CipherSuite;
use crate::Error;

/// Handshake configuration
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    flight_jitter: bool,
    handshake_timeout: Duration,
    srtp_profiles: Vec<SrtpProfile>,
    extended_master_secret: bool,
    require_client_certificate: bool,
    hello_verify_request: bool,
    rng_seed: Option<u64>,
    crypto_provider: CryptoProvider,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 30,
            max_queue_tx: 10,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 4,
            flight_jitter: true,
            handshake_timeout: Duration::from_secs(40),
            srtp_profiles: SrtpProfile::ALL.to_vec(),
            extended_master_secret: true,
            require_client_certificate: true,
            hello_verify_request: true,
            rng_seed: None,
            crypto_provider: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest size UDP packets we will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max amount of buffered incoming records awaiting handling.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of outgoing datagrams to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Time of first retransmission.
    ///
    /// Every flight restarts with this value. Doubled for every retry.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Upper bound of the doubling retransmission timeout.
    #[inline(always)]
    pub fn flight_max_rto(&self) -> Duration {
        self.flight_max_rto
    }

    /// Max number of retransmissions per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Whether retransmission timeouts get ±0.25s of jitter.
    #[inline(always)]
    pub fn flight_jitter(&self) -> bool {
        self.flight_jitter
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// SRTP protection profiles, most preferred first.
    #[inline(always)]
    pub fn srtp_profiles(&self) -> &[SrtpProfile] {
        &self.srtp_profiles
    }

    /// Whether to offer Extended Master Secret (RFC 7627).
    #[inline(always)]
    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    /// For a server, send a CertificateRequest and fail without a client certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// For a server, challenge the first ClientHello with a HelloVerifyRequest.
    #[inline(always)]
    pub fn hello_verify_request(&self) -> bool {
        self.hello_verify_request
    }

    /// Seed for the non-secret randomness (hello randoms, nonces, jitter).
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// Cryptographic provider.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    flight_jitter: bool,
    handshake_timeout: Duration,
    srtp_profiles: Vec<SrtpProfile>,
    extended_master_secret: bool,
    require_client_certificate: bool,
    hello_verify_request: bool,
    rng_seed: Option<u64>,
    crypto_provider: Option<CryptoProvider>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Defaults to 10.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set the time of first retransmission.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Defaults to 60 seconds.
    pub fn flight_max_rto(mut self, rto: Duration) -> Self {
        self.flight_max_rto = rto;
        self
    }

    /// Set the max number of retransmissions per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Defaults to true. Turn off for exact timing in tests.
    pub fn flight_jitter(mut self, jitter: bool) -> Self {
        self.flight_jitter = jitter;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the offered SRTP profiles, most preferred first.
    ///
    /// An empty list disables the use_srtp extension.
    pub fn srtp_profiles(mut self, profiles: &[SrtpProfile]) -> Self {
        self.srtp_profiles = profiles.to_vec();
        self
    }

    /// Set the offered SRTP profiles from an OpenSSL style list, e.g.
    /// `"SRTP_AEAD_AES_128_GCM:SRTP_AES128_CM_SHA1_80"`.
    pub fn srtp_profile_list(mut self, list: &str) -> Result<Self, Error> {
        self.srtp_profiles = SrtpProfile::parse_list(list)?;
        Ok(self)
    }

    /// Defaults to true.
    pub fn extended_master_secret(mut self, enabled: bool) -> Self {
        self.extended_master_secret = enabled;
        self
    }

    /// Defaults to true.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Defaults to true.
    pub fn hello_verify_request(mut self, enabled: bool) -> Self {
        self.hello_verify_request = enabled;
        self
    }

    /// Make hello randoms, cookies, explicit nonces and jitter deterministic.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Set a custom crypto provider.
    ///
    /// If not set, the provider installed with [`CryptoProvider::install_default`]
    /// is used, and failing that the RustCrypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < 256 {
            return Err(Error::Config(format!("MTU {} is below 256", self.mtu)));
        }
        if self.max_queue_rx == 0 || self.max_queue_tx == 0 {
            return Err(Error::Config("queue sizes must be non-zero".into()));
        }
        if self.flight_start_rto > self.flight_max_rto {
            return Err(Error::Config(format!(
                "flight start RTO {:?} exceeds max RTO {:?}",
                self.flight_start_rto, self.flight_max_rto
            )));
        }

        let crypto_provider = self
            .crypto_provider
            .or_else(|| CryptoProvider::get_default().cloned())
            .unwrap_or_else(rust_crypto::default_provider);

        let known_suite = crypto_provider.cipher_suites.iter().any(|s| {
            matches!(
                s.suite(),
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 | CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
            )
        });
        if !known_suite {
            return Err(Error::Config(
                "crypto provider offers no ECDHE_ECDSA AES-GCM cipher suite".into(),
            ));
        }
        if crypto_provider.kx_groups.is_empty() {
            return Err(Error::Config(
                "crypto provider offers no key exchange group".into(),
            ));
        }

        Ok(Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            flight_start_rto: self.flight_start_rto,
            flight_max_rto: self.flight_max_rto,
            flight_retries: self.flight_retries,
            flight_jitter: self.flight_jitter,
            handshake_timeout: self.handshake_timeout,
            srtp_profiles: self.srtp_profiles,
            extended_master_secret: self.extended_master_secret,
            require_client_certificate: self.require_client_certificate,
            hello_verify_request: self.hello_verify_request,
            rng_seed: self.rng_seed,
            crypto_provider,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mtu: 1150,
            max_queue_rx: 30,
            max_queue_tx: 10,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 4,
            flight_jitter: true,
            handshake_timeout: Duration::from_secs(40),
            srtp_profiles: SrtpProfile::ALL.to_vec(),
            extended_master_secret: true,
            require_client_certificate: true,
            hello_verify_request: true,
            rng_seed: None,
            crypto_provider: CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(rust_crypto::default_provider),
        }
    }
}
