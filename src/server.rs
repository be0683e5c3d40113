// DTLS Server Handshake Flow:
//
// 1. Client sends ClientHello (maybe without cookie)
// 2. If cookie missing/invalid, Server sends HelloVerifyRequest (stateless cookie)
//    - Client resends ClientHello with cookie
// 3. Server sends ServerHello, Certificate, ServerKeyExchange,
//    [CertificateRequest], ServerHelloDone
// 4. Client sends [Certificate], ClientKeyExchange, [CertificateVerify],
//    ChangeCipherSpec, Finished
// 5. Server verifies Finished, then sends ChangeCipherSpec, Finished
//
// The server exists so the client can be exercised against a peer in the
// same process. It negotiates exactly what the client offers.

use std::sync::Arc;
use std::time::Instant;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::certificate::DtlsCertificate;
use crate::crypto::{
    ActiveKeyExchange, KeySchedule, SigningKey, SrtpProfile, SupportedDtls12CipherSuite,
};
use crate::engine::Engine;
use crate::message::{
    Alert, Certificate, CertificateRequest, CertificateVerify, CipherSuite, ClientCertificateType,
    ClientHello, ClientKeyExchange, CompressionMethod, Cookie, DigitallySigned, Finished, Header,
    HelloVerifyRequest, MessageType, NamedGroup, ProtocolVersion, Random, ServerHello,
    ServerKeyExchange, SessionId, SignatureAndHashAlgorithm, UseSrtpExtension,
};
use crate::verifier::{CertificateVerifier, Fingerprint, Verdict};
use crate::{Config, Error, Output};

type HmacSha256 = Hmac<Sha256>;

/// DTLS 1.2 server
pub struct Server {
    /// Engine in common between server and client.
    engine: Engine,

    state: ServerState,

    /// Random unique data. Used for signature checks.
    random: Random,

    /// Client random. Set by ClientHello.
    client_random: Option<Random>,

    /// Cookie secret for HMAC, generated per server instance.
    cookie_secret: [u8; 32],

    certificate: DtlsCertificate,
    signing_key: Box<dyn SigningKey>,
    verifier: CertificateVerifier,

    cipher_suite: Option<&'static dyn SupportedDtls12CipherSuite>,
    named_group: Option<NamedGroup>,
    srtp_profile: Option<SrtpProfile>,
    extended_master_secret: bool,

    /// Our half of the ECDHE exchange, until the ClientKeyExchange.
    key_exchange: Option<Box<dyn ActiveKeyExchange>>,

    /// Leaf certificate of the client, if it sent one.
    client_certificate: Option<Vec<u8>>,
    client_fingerprint: Option<Fingerprint>,

    schedule: Option<KeySchedule>,
}

/// Current state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Await a ClientHello (with or without cookie)
    AwaitClientHello,

    /// Send the ServerHello flight (ServerHello..ServerHelloDone)
    SendServerHelloFlight,

    /// Await the client's Certificate, when one was requested.
    AwaitCertificate,

    AwaitClientKeyExchange,

    /// Await CertificateVerify for the client certificate.
    AwaitCertificateVerify,

    AwaitFinished,

    /// Handshake done. Repeats of the client's last flight are answered.
    Established,

    Failed,
}

impl Server {
    /// Create a new DTLS server
    pub fn new(
        now: Instant,
        config: Arc<Config>,
        certificate: DtlsCertificate,
        verifier: CertificateVerifier,
    ) -> Result<Server, Error> {
        let signing_key = config
            .crypto_provider()
            .key_provider
            .load_private_key(&certificate.private_key)
            .map_err(|e| Error::Config(format!("private key: {}", e)))?;

        let mut engine = Engine::new(config, now);
        let random = Random::new(&mut engine.rng);
        let mut cookie_secret = [0u8; 32];
        engine.rng.fill(&mut cookie_secret);

        Ok(Server {
            engine,
            state: ServerState::AwaitClientHello,
            random,
            client_random: None,
            cookie_secret,
            certificate,
            signing_key,
            verifier,
            cipher_suite: None,
            named_group: None,
            srtp_profile: None,
            extended_master_secret: false,
            key_exchange: None,
            client_certificate: None,
            client_fingerprint: None,
            schedule: None,
        })
    }

    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == ServerState::Failed {
            return Ok(());
        }
        let result = self.engine.handle_datagram(packet);
        let result = result.and_then(|_| self.process_input());
        self.check(result)
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.state == ServerState::Failed {
            return Ok(());
        }
        let result = self.engine.handle_timeout(now);
        self.check(result)
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        self.engine.poll_output(buf)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite.map(|s| s.suite())
    }

    pub fn srtp_profile(&self) -> Option<SrtpProfile> {
        self.srtp_profile
    }

    pub fn client_fingerprint(&self) -> Option<Fingerprint> {
        self.client_fingerprint
    }

    fn check(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        let Err(error) = result else {
            return Ok(());
        };
        debug!("Server failed in {:?}: {}", self.state, error);

        self.engine.abort();
        if let Some(description) = error.alert_description() {
            if let Err(e) = self.engine.send_alert(Alert::fatal(description)) {
                debug!("Could not queue alert: {}", e);
            }
        }
        self.state = ServerState::Failed;
        Err(error)
    }

    fn process_input(&mut self) -> Result<(), Error> {
        loop {
            let prev_state = self.state;
            let consumed = self.do_process_input()?;
            if prev_state == self.state && !consumed {
                break;
            }
        }
        Ok(())
    }

    fn do_process_input(&mut self) -> Result<bool, Error> {
        match self.state {
            ServerState::SendServerHelloFlight => {
                self.send_server_hello_flight()?;
                Ok(false)
            }
            ServerState::Established | ServerState::Failed => {
                while let Some((header, _)) = self.engine.next_message() {
                    debug!("Ignore {:?} after handshake", header.msg_type);
                }
                Ok(false)
            }
            _ => {
                let Some((header, body)) = self.engine.next_message() else {
                    return Ok(false);
                };
                self.handle_message(&header, &body)?;
                Ok(true)
            }
        }
    }

    fn handle_message(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        match (self.state, header.msg_type) {
            (ServerState::AwaitClientHello, MessageType::ClientHello) => {
                self.handle_client_hello(header, body)
            }
            (ServerState::AwaitCertificate, MessageType::Certificate) => {
                self.handle_certificate(header, body)
            }
            (ServerState::AwaitClientKeyExchange, MessageType::ClientKeyExchange) => {
                self.handle_client_key_exchange(header, body)
            }
            (ServerState::AwaitCertificateVerify, MessageType::CertificateVerify) => {
                self.handle_certificate_verify(header, body)
            }
            (ServerState::AwaitFinished, MessageType::Finished) => {
                self.handle_finished(header, body)
            }
            (state, msg_type) => Err(Error::ProtocolOrderViolation(format!(
                "{:?} (seq {}) while in {:?}",
                msg_type, header.message_seq, state
            ))),
        }
    }

    fn handle_client_hello(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, hello) = ClientHello::parse(body)?;

        if hello.client_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::NegotiationMismatch(format!(
                "client version {:?}",
                hello.client_version
            )));
        }
        if !hello.compression_methods.contains(&CompressionMethod::Null) {
            return Err(Error::NegotiationMismatch(
                "client did not offer null compression".into(),
            ));
        }

        if self.engine.config().hello_verify_request()
            && !verify_cookie(&self.cookie_secret, hello.random, &hello.cookie)
        {
            debug!("Invalid/missing cookie; sending HelloVerifyRequest");
            return self.send_hello_verify_request(header, hello.random);
        }

        let config = self.engine.config();
        let provider = config.crypto_provider();

        // Client order for the suite, our order for group and SRTP profile.
        let Some(suite) = hello
            .cipher_suites
            .iter()
            .find_map(|s| provider.find_cipher_suite(*s))
        else {
            return Err(Error::NegotiationMismatch(
                "no mutually acceptable cipher suite".into(),
            ));
        };

        let Some(group) = provider
            .kx_groups
            .iter()
            .map(|g| g.name())
            .find(|g| hello.supported_groups.is_empty() || hello.supported_groups.contains(g))
        else {
            return Err(Error::NegotiationMismatch(
                "no mutually acceptable key exchange group".into(),
            ));
        };

        let algorithm = SignatureAndHashAlgorithm::new(
            self.signing_key.hash_algorithm(),
            self.signing_key.algorithm(),
        );
        if !hello.signature_algorithms.is_empty()
            && !hello.signature_algorithms.contains(&algorithm)
        {
            return Err(Error::NegotiationMismatch(format!(
                "client does not accept our signature {:?}",
                algorithm
            )));
        }

        let srtp_profile = hello.use_srtp.as_ref().and_then(|offer| {
            config
                .srtp_profiles()
                .iter()
                .copied()
                .find(|p| offer.profiles.iter().any(|id| id.profile() == Some(*p)))
        });

        let extended_master_secret =
            hello.extended_master_secret && config.extended_master_secret();

        debug!(
            "Server negotiated {} {:?} {:?}, extended master secret: {}",
            suite.suite(),
            group,
            srtp_profile,
            extended_master_secret
        );

        self.cipher_suite = Some(suite);
        self.named_group = Some(group);
        self.srtp_profile = srtp_profile;
        self.extended_master_secret = extended_master_secret;
        self.client_random = Some(hello.random);

        // The ServerHello answers with the message_seq of this ClientHello.
        self.engine.set_next_handshake_seq(header.message_seq);
        self.engine.transcript_push(header, body);
        self.state = ServerState::SendServerHelloFlight;
        Ok(())
    }

    fn send_hello_verify_request(&mut self, header: &Header, client_random: Random) -> Result<(), Error> {
        let cookie = compute_cookie(&self.cookie_secret, client_random)?;

        // Stateless: no timer, resent only when the ClientHello repeats.
        self.engine.flight_begin(false);
        self.engine.set_next_handshake_seq(header.message_seq);
        self.engine.transcript_reset();
        self.engine
            .create_handshake(MessageType::HelloVerifyRequest, |body, _| {
                HelloVerifyRequest::new(ProtocolVersion::DTLS1_2, cookie).serialize(body);
                Ok(())
            })
    }

    fn send_server_hello_flight(&mut self) -> Result<(), Error> {
        debug!("Sending ServerHello flight");

        let suite = self.suite()?;
        let client_random = self.client_random()?;
        let group = self
            .named_group
            .ok_or_else(|| Error::ProtocolOrderViolation("no key exchange group".into()))?;
        let provider = self.engine.config().crypto_provider().clone();
        let request_certificate = self.engine.config().require_client_certificate();

        let mut server_hello = ServerHello::new(self.random, SessionId::empty(), suite.suite());
        server_hello.use_srtp = self.srtp_profile.map(|p| UseSrtpExtension::new(&[p]));
        server_hello.extended_master_secret = self.extended_master_secret;
        server_hello.renegotiation_info = true;

        let kx_group = provider
            .find_kx_group(group)
            .ok_or_else(|| Error::NegotiationMismatch(format!("no key exchange for {:?}", group)))?;
        let key_exchange = kx_group.start_exchange(Buf::new()).map_err(Error::Crypto)?;

        let algorithm = SignatureAndHashAlgorithm::new(
            self.signing_key.hash_algorithm(),
            self.signing_key.algorithm(),
        );
        let mut ske = ServerKeyExchange {
            named_group: group,
            public_key: key_exchange.pub_key().to_vec(),
            signed: DigitallySigned::new(algorithm, Vec::new()),
        };
        let mut signature = Buf::new();
        self.signing_key
            .sign(&ske.signed_data(&client_random.0, &self.random.0), &mut signature)
            .map_err(Error::Crypto)?;
        ske.signed.signature = signature.into_vec();
        self.key_exchange = Some(key_exchange);

        self.engine.flight_begin(true);

        self.engine
            .create_handshake(MessageType::ServerHello, |body, _| {
                server_hello.serialize(body);
                Ok(())
            })?;

        let certificate = Certificate::new(vec![self.certificate.certificate.clone()]);
        self.engine
            .create_handshake(MessageType::Certificate, |body, _| {
                certificate.serialize(body);
                Ok(())
            })?;

        self.engine
            .create_handshake(MessageType::ServerKeyExchange, |body, _| {
                ske.serialize(body);
                Ok(())
            })?;

        if request_certificate {
            let request = CertificateRequest {
                certificate_types: vec![ClientCertificateType::ECDSA_SIGN],
                supported_signature_algorithms: SignatureAndHashAlgorithm::supported().to_vec(),
                certificate_authorities: Vec::new(),
            };
            self.engine
                .create_handshake(MessageType::CertificateRequest, |body, _| {
                    request.serialize(body);
                    Ok(())
                })?;
        }

        // ServerHelloDone has an empty body
        self.engine
            .create_handshake(MessageType::ServerHelloDone, |_, _| Ok(()))?;

        self.state = if request_certificate {
            ServerState::AwaitCertificate
        } else {
            ServerState::AwaitClientKeyExchange
        };
        Ok(())
    }

    fn handle_certificate(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, certificate) = Certificate::parse(body)?;
        let Some(leaf) = certificate.leaf() else {
            return Err(Error::AuthenticationFailure(
                "client sent no certificate".into(),
            ));
        };

        match self.verifier.verify(leaf) {
            Verdict::Accepted(fingerprint) => self.client_fingerprint = Some(fingerprint),
            Verdict::Rejected(reason) => return Err(Error::AuthenticationFailure(reason)),
        }

        trace!("Client certificate {} bytes", leaf.len());
        self.client_certificate = Some(leaf.to_vec());
        self.engine.push_peer_cert(leaf.to_vec());
        self.engine.transcript_push(header, body);
        self.state = ServerState::AwaitClientKeyExchange;
        Ok(())
    }

    fn handle_client_key_exchange(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, ckx) = ClientKeyExchange::parse(body)?;
        self.engine.transcript_push(header, body);

        let suite = self.suite()?;
        let client_random = self.client_random()?;
        let key_exchange = self
            .key_exchange
            .take()
            .ok_or_else(|| Error::ProtocolOrderViolation("no key exchange in progress".into()))?;
        let provider = self.engine.config().crypto_provider().clone();

        let mut pre_master_secret = Buf::new();
        key_exchange
            .complete(&ckx.public_key, &mut pre_master_secret)
            .map_err(Error::Crypto)?;

        let hash = suite.hash_algorithm();
        let mut schedule = KeySchedule::new(provider.prf_provider, hash);
        let derived = if self.extended_master_secret {
            // Session hash up to and including the ClientKeyExchange.
            let session_hash = self.engine.transcript_hash(hash)?;
            schedule.derive_extended_master_secret(&pre_master_secret, &session_hash)
        } else {
            schedule.derive_master_secret(&pre_master_secret, &client_random.0, &self.random.0)
        };
        pre_master_secret.zeroize();
        derived?;

        let (_, key_len, iv_len) = suite.key_lengths();
        let keys = schedule.key_block(&client_random.0, &self.random.0, key_len, iv_len)?;
        let client_cipher = suite
            .create_cipher(&keys.client_write_key)
            .map_err(Error::Crypto)?;
        let server_cipher = suite
            .create_cipher(&keys.server_write_key)
            .map_err(Error::Crypto)?;

        self.schedule = Some(schedule);
        self.engine.enable_encryption(server_cipher, keys.server_write_iv);

        self.state = if self.client_certificate.is_some() {
            ServerState::AwaitCertificateVerify
        } else {
            ServerState::AwaitFinished
        };

        // May replay a buffered Finished into the reassembler.
        self.engine.set_peer_keys(client_cipher, keys.client_write_iv)
    }

    fn handle_certificate_verify(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, verify) = CertificateVerify::parse(body)?;
        let certificate = self
            .client_certificate
            .as_deref()
            .ok_or_else(|| Error::ProtocolOrderViolation("CertificateVerify without certificate".into()))?;

        if !verify.signed.algorithm.is_supported() {
            return Err(Error::NegotiationMismatch(format!(
                "client signed with {:?}",
                verify.signed.algorithm
            )));
        }

        self.engine
            .config()
            .crypto_provider()
            .signature_verification
            .verify_signature(
                certificate,
                self.engine.transcript(),
                &verify.signed.signature,
                verify.signed.algorithm.hash,
                verify.signed.algorithm.signature,
            )
            .map_err(|e| Error::AuthenticationFailure(format!("CertificateVerify: {}", e)))?;

        self.engine.transcript_push(header, body);
        self.state = ServerState::AwaitFinished;
        Ok(())
    }

    fn handle_finished(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        if !self.engine.is_peer_encryption_enabled() {
            return Err(Error::ProtocolOrderViolation(
                "Finished before ChangeCipherSpec".into(),
            ));
        }

        let suite = self.suite()?;
        let client_random = self.client_random()?;
        let (_, finished) = Finished::parse(body, suite.suite())?;
        let hash = suite.hash_algorithm();
        let verify_len = suite.suite().verify_data_length();

        let handshake_hash = self.engine.transcript_hash(hash)?;
        let schedule = self
            .schedule
            .as_mut()
            .ok_or_else(|| Error::ProtocolOrderViolation("Finished before key exchange".into()))?;
        let expected = schedule.verify_data("client finished", &handshake_hash, verify_len)?;
        if !bool::from(expected.ct_eq(&finished.verify_data)) {
            return Err(Error::AuthenticationFailure(
                "client Finished does not verify".into(),
            ));
        }
        debug!("Client Finished verified successfully");
        self.engine.transcript_push(header, body);

        let handshake_hash = self.engine.transcript_hash(hash)?;
        let verify_data = schedule.verify_data("server finished", &handshake_hash, verify_len)?;

        let exported = match self.srtp_profile {
            Some(profile) => Some(schedule.export_keys(profile, &client_random.0, &self.random.0)?),
            None => None,
        };

        // No timer, but a repeated client Finished brings this flight back.
        self.engine.flight_begin(false);
        self.engine.create_change_cipher_spec()?;
        self.engine
            .create_handshake(MessageType::Finished, |body, _| {
                Finished::new(&verify_data).serialize(body);
                Ok(())
            })?;
        self.engine.flight_finish(true);

        self.engine.push_connected();
        if let Some(keys) = exported {
            self.engine.push_keying_material(keys);
        }
        self.state = ServerState::Established;
        Ok(())
    }

    fn suite(&self) -> Result<&'static dyn SupportedDtls12CipherSuite, Error> {
        self.cipher_suite
            .ok_or_else(|| Error::ProtocolOrderViolation("no ClientHello".into()))
    }

    fn client_random(&self) -> Result<Random, Error> {
        self.client_random
            .ok_or_else(|| Error::ProtocolOrderViolation("no ClientHello".into()))
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("cipher_suite", &self.cipher_suite())
            .field("srtp_profile", &self.srtp_profile)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

fn compute_cookie(secret: &[u8; 32], client_random: Random) -> Result<Cookie, Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Crypto(format!("cookie key: {}", e)))?;
    mac.update(&client_random.0);
    let tag = mac.finalize().into_bytes();
    Cookie::try_new(&tag[..32]).ok_or_else(|| Error::Crypto("cookie length".into()))
}

fn verify_cookie(secret: &[u8; 32], client_random: Random, cookie: &[u8]) -> bool {
    if cookie.len() != 32 {
        return false;
    }
    let Ok(expected) = compute_cookie(secret, client_random) else {
        return false;
    };
    bool::from(expected.ct_eq(cookie))
}
