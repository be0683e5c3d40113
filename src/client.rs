// DTLS Client Handshake Flow:
//
// 1. Client sends ClientHello
// 2. Server may answer with HelloVerifyRequest carrying a cookie
//    - Client resends ClientHello with the cookie
// 3. Server sends ServerHello, Certificate, ServerKeyExchange,
//    [CertificateRequest], ServerHelloDone
// 4. Client sends [Certificate], ClientKeyExchange, [CertificateVerify],
//    ChangeCipherSpec, Finished
// 5. Server sends ChangeCipherSpec, Finished
// 6. Client verifies Finished and exports the SRTP keys

use std::sync::Arc;
use std::time::Instant;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::certificate::{self, DtlsCertificate};
use crate::crypto::{KeySchedule, SigningKey, SrtpProfile, SupportedDtls12CipherSuite};
use crate::engine::Engine;
use crate::message::{
    Alert, Certificate, CertificateRequest, CertificateVerify, CipherSuite, ClientHello,
    ClientKeyExchange, CompressionMethod, Cookie, DigitallySigned, Finished, Header,
    HelloVerifyRequest, MessageType, ProtocolVersion, Random, ServerHello, ServerKeyExchange,
    SignatureAndHashAlgorithm, UseSrtpExtension,
};
use crate::verifier::{CertificateVerifier, Fingerprint, Verdict};
use crate::{Config, Error, HandshakeFailure, Output};

/// Where the client handshake is, as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet.
    Idle,
    /// First ClientHello sent, no cookie.
    SentClientHello1,
    /// A HelloVerifyRequest arrived, the ClientHello goes out again.
    ReceivedVerifyRequest,
    /// ClientHello with cookie sent.
    SentClientHello2,
    /// Receiving ServerHello through ServerHelloDone.
    ReceivedServerFlight,
    /// Sent our Finished, waiting for the server's.
    SentClientFinalFlight,
    /// Handshake complete, keys exported.
    Established,
    /// Terminal. See [`Client::failure`].
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Idle,
    SentClientHello1,
    ReceivedVerifyRequest,
    SentClientHello2,
    AwaitCertificate,
    AwaitServerKeyExchange,
    AwaitServerHelloDone,
    SendFinalFlight,
    AwaitServerFinished,
    Established,
    Failed,
}

impl ClientState {
    fn expected(&self) -> Option<MessageType> {
        match self {
            ClientState::SentClientHello1 | ClientState::SentClientHello2 => {
                Some(MessageType::ServerHello)
            }
            ClientState::AwaitCertificate => Some(MessageType::Certificate),
            ClientState::AwaitServerKeyExchange => Some(MessageType::ServerKeyExchange),
            ClientState::AwaitServerHelloDone => Some(MessageType::ServerHelloDone),
            ClientState::AwaitServerFinished => Some(MessageType::Finished),
            _ => None,
        }
    }

    fn public(&self) -> HandshakeState {
        match self {
            ClientState::Idle => HandshakeState::Idle,
            ClientState::SentClientHello1 => HandshakeState::SentClientHello1,
            ClientState::ReceivedVerifyRequest => HandshakeState::ReceivedVerifyRequest,
            ClientState::SentClientHello2 => HandshakeState::SentClientHello2,
            ClientState::AwaitCertificate
            | ClientState::AwaitServerKeyExchange
            | ClientState::AwaitServerHelloDone
            | ClientState::SendFinalFlight => HandshakeState::ReceivedServerFlight,
            ClientState::AwaitServerFinished => HandshakeState::SentClientFinalFlight,
            ClientState::Established => HandshakeState::Established,
            ClientState::Failed => HandshakeState::Failed,
        }
    }
}

/// DTLS 1.2 client that ends its handshake by exporting SRTP keys.
///
/// Sans-IO: feed datagrams with [`Client::handle_packet`], drive time with
/// [`Client::handle_timeout`] and drain [`Client::poll_output`] after each.
pub struct Client {
    /// Engine in common between server and client.
    engine: Engine,

    state: ClientState,

    /// Our hello random, the same for every ClientHello of the attempt.
    random: Random,

    /// Cookie from the latest HelloVerifyRequest.
    cookie: Cookie,

    /// Local identity.
    certificate: DtlsCertificate,
    signing_key: Box<dyn SigningKey>,

    verifier: CertificateVerifier,

    server_random: Option<Random>,
    cipher_suite: Option<&'static dyn SupportedDtls12CipherSuite>,
    srtp_profile: Option<SrtpProfile>,
    extended_master_secret: bool,

    /// Leaf certificate of the server and its fingerprint.
    peer_certificate: Option<Vec<u8>>,
    peer_fingerprint: Option<Fingerprint>,

    server_key_exchange: Option<ServerKeyExchange>,
    certificate_request: Option<CertificateRequest>,

    schedule: Option<KeySchedule>,

    failure: Option<HandshakeFailure>,
}

impl Client {
    /// Create a client. Nothing is sent until the first call to
    /// [`Client::handle_timeout`].
    pub fn new(
        now: Instant,
        config: Arc<Config>,
        certificate: DtlsCertificate,
        verifier: CertificateVerifier,
    ) -> Result<Client, Error> {
        let signing_key = config
            .crypto_provider()
            .key_provider
            .load_private_key(&certificate.private_key)
            .map_err(|e| Error::Config(format!("private key: {}", e)))?;

        let mut engine = Engine::new(config, now);
        let random = Random::new(&mut engine.rng);

        Ok(Client {
            engine,
            state: ClientState::Idle,
            random,
            cookie: Cookie::empty(),
            certificate,
            signing_key,
            verifier,
            server_random: None,
            cipher_suite: None,
            srtp_profile: None,
            extended_master_secret: false,
            peer_certificate: None,
            peer_fingerprint: None,
            server_key_exchange: None,
            certificate_request: None,
            schedule: None,
            failure: None,
        })
    }

    /// Feed one received datagram.
    ///
    /// Follow with [`Client::handle_timeout`]: a flight begun here arms its
    /// retransmit timer from that call's `now`.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.state == ClientState::Failed {
            trace!("Ignore {} byte packet after failure", packet.len());
            return Ok(());
        }
        let result = self.engine.handle_datagram(packet);
        let result = result.and_then(|_| self.process_input());
        self.check(result)
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.state == ClientState::Failed {
            return Ok(());
        }
        let result = self.engine.handle_timeout(now);
        let result = result.and_then(|_| self.process_input());
        self.check(result)
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        self.engine.poll_output(buf)
    }

    /// Give up on the handshake. The attempt fails with [`Error::Aborted`].
    pub fn abort(&mut self) {
        if self.state != ClientState::Failed {
            self.fail(&Error::Aborted);
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state.public()
    }

    /// Why the handshake failed, once [`HandshakeState::Failed`].
    pub fn failure(&self) -> Option<&HandshakeFailure> {
        self.failure.as_ref()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite.map(|s| s.suite())
    }

    pub fn srtp_profile(&self) -> Option<SrtpProfile> {
        self.srtp_profile
    }

    pub fn peer_certificate(&self) -> Option<&[u8]> {
        self.peer_certificate.as_deref()
    }

    pub fn peer_fingerprint(&self) -> Option<Fingerprint> {
        self.peer_fingerprint
    }

    fn check(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        let Err(error) = result else {
            return Ok(());
        };
        self.fail(&error);
        Err(error)
    }

    fn fail(&mut self, error: &Error) {
        let failure = HandshakeFailure::new(error, self.state(), self.state.expected());
        debug!("Handshake failed: {}", failure);

        self.engine.abort();
        if let Some(description) = error.alert_description() {
            if let Err(e) = self.engine.send_alert(Alert::fatal(description)) {
                debug!("Could not queue alert: {}", e);
            }
        }

        self.failure = Some(failure);
        self.state = ClientState::Failed;
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

    /// One step of the state machine. True if a message was consumed.
    fn do_process_input(&mut self) -> Result<bool, Error> {
        match self.state {
            ClientState::Idle => {
                self.send_client_hello()?;
                self.state = ClientState::SentClientHello1;
                Ok(false)
            }
            ClientState::ReceivedVerifyRequest => {
                self.send_client_hello()?;
                self.state = ClientState::SentClientHello2;
                Ok(false)
            }
            ClientState::SendFinalFlight => {
                self.send_final_flight()?;
                self.state = ClientState::AwaitServerFinished;
                Ok(false)
            }
            ClientState::Established | ClientState::Failed => {
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
        trace!(
            "Handle {:?} seq {} in {:?}",
            header.msg_type,
            header.message_seq,
            self.state
        );

        match (self.state, header.msg_type) {
            (
                ClientState::SentClientHello1 | ClientState::SentClientHello2,
                MessageType::HelloVerifyRequest,
            ) => self.handle_hello_verify_request(body),

            (
                ClientState::SentClientHello1 | ClientState::SentClientHello2,
                MessageType::ServerHello,
            ) => self.handle_server_hello(header, body),

            (ClientState::AwaitCertificate, MessageType::Certificate) => {
                self.handle_certificate(header, body)
            }

            (ClientState::AwaitServerKeyExchange, MessageType::ServerKeyExchange) => {
                self.handle_server_key_exchange(header, body)
            }

            (ClientState::AwaitServerHelloDone, MessageType::CertificateRequest)
                if self.certificate_request.is_none() =>
            {
                let (_, request) = CertificateRequest::parse(body)?;
                debug!(
                    "Server requests a certificate, accepting {:?}",
                    request.supported_signature_algorithms
                );
                self.certificate_request = Some(request);
                self.engine.transcript_push(header, body);
                Ok(())
            }

            (ClientState::AwaitServerHelloDone, MessageType::ServerHelloDone) => {
                if !body.is_empty() {
                    return Err(Error::Decode(format!(
                        "ServerHelloDone with {} byte body",
                        body.len()
                    )));
                }
                self.engine.transcript_push(header, body);
                self.state = ClientState::SendFinalFlight;
                Ok(())
            }

            (ClientState::AwaitServerFinished, MessageType::Finished) => {
                self.handle_server_finished(header, body)
            }

            (state, msg_type) => Err(Error::ProtocolOrderViolation(format!(
                "{:?} (seq {}) while in {:?}",
                msg_type, header.message_seq, state
            ))),
        }
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        let config = self.engine.config();
        let provider = config.crypto_provider();

        let suites = provider.cipher_suites.iter().map(|s| s.suite()).collect();
        let mut hello = ClientHello::new(self.random, suites);
        hello.cookie = self.cookie;
        hello.supported_groups = provider.kx_groups.iter().map(|g| g.name()).collect();
        hello.signature_algorithms = SignatureAndHashAlgorithm::supported().to_vec();
        if !config.srtp_profiles().is_empty() {
            hello.use_srtp = Some(UseSrtpExtension::new(config.srtp_profiles()));
        }
        hello.extended_master_secret = config.extended_master_secret();
        hello.renegotiation_info = true;

        debug!(
            "Sending ClientHello with {} byte cookie, SRTP {:?}",
            self.cookie.len(),
            config.srtp_profiles()
        );

        self.engine.flight_begin(true);
        self.engine
            .create_handshake(MessageType::ClientHello, |body, _| {
                hello.serialize(body);
                Ok(())
            })
    }

    fn handle_hello_verify_request(&mut self, body: &[u8]) -> Result<(), Error> {
        let (_, hvr) = HelloVerifyRequest::parse(body)?;
        if hvr.cookie.is_empty() {
            return Err(Error::Decode("HelloVerifyRequest without cookie".into()));
        }

        if self.state == ClientState::SentClientHello2 {
            debug!("Replacing cookie after repeated HelloVerifyRequest");
        }
        debug!("HelloVerifyRequest with {} byte cookie", hvr.cookie.len());

        self.cookie = hvr.cookie;
        // The handshake restarts with the next ClientHello.
        self.engine.transcript_reset();
        self.state = ClientState::ReceivedVerifyRequest;
        Ok(())
    }

    fn handle_server_hello(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, server_hello) = ServerHello::parse(body)?;
        let config = self.engine.config();

        if server_hello.server_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::NegotiationMismatch(format!(
                "server version {:?}",
                server_hello.server_version
            )));
        }

        let Some(suite) = config
            .crypto_provider()
            .find_cipher_suite(server_hello.cipher_suite)
        else {
            return Err(Error::NegotiationMismatch(format!(
                "server chose cipher suite {} we did not offer",
                server_hello.cipher_suite
            )));
        };

        if server_hello.compression_method != CompressionMethod::Null {
            return Err(Error::NegotiationMismatch(format!(
                "server chose compression {:?}",
                server_hello.compression_method
            )));
        }

        let srtp_profile =
            select_srtp_profile(config.srtp_profiles(), server_hello.use_srtp.as_ref())?;

        if server_hello.extended_master_secret && !config.extended_master_secret() {
            return Err(Error::NegotiationMismatch(
                "server enabled extended master secret we did not offer".into(),
            ));
        }
        let extended_master_secret =
            server_hello.extended_master_secret && config.extended_master_secret();

        debug!(
            "Negotiated {} with SRTP {:?}, extended master secret: {}",
            suite.suite(),
            srtp_profile,
            extended_master_secret
        );

        self.cipher_suite = Some(suite);
        self.srtp_profile = srtp_profile;
        self.extended_master_secret = extended_master_secret;
        self.server_random = Some(server_hello.random);
        self.engine.transcript_push(header, body);
        self.state = ClientState::AwaitCertificate;
        Ok(())
    }

    fn handle_certificate(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, certificate) = Certificate::parse(body)?;
        let Some(leaf) = certificate.leaf() else {
            return Err(Error::AuthenticationFailure(
                "server sent no certificate".into(),
            ));
        };

        match self.verifier.verify(leaf) {
            Verdict::Accepted(fingerprint) => {
                debug!("Peer certificate accepted, fingerprint {}", fingerprint);
                self.peer_fingerprint = Some(fingerprint);
            }
            Verdict::Rejected(reason) => return Err(Error::AuthenticationFailure(reason)),
        }

        match certificate::subject(leaf) {
            Ok(subject) => debug!("Peer certificate subject: {}", subject),
            Err(e) => debug!("Peer certificate subject unreadable: {}", e),
        }

        self.peer_certificate = Some(leaf.to_vec());
        self.engine.transcript_push(header, body);
        self.state = ClientState::AwaitServerKeyExchange;
        Ok(())
    }

    fn handle_server_key_exchange(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let (_, ske) = ServerKeyExchange::parse(body)?;
        let provider = self.engine.config().crypto_provider();

        if provider.find_kx_group(ske.named_group).is_none() {
            return Err(Error::NegotiationMismatch(format!(
                "server chose group {:?} we did not offer",
                ske.named_group
            )));
        }
        if !ske.signed.algorithm.is_supported() {
            return Err(Error::NegotiationMismatch(format!(
                "server signed with {:?} we did not offer",
                ske.signed.algorithm
            )));
        }

        let server_random = self.server_random()?;
        let leaf = self
            .peer_certificate
            .as_deref()
            .ok_or_else(|| Error::ProtocolOrderViolation("ServerKeyExchange before Certificate".into()))?;

        let signed_data = ske.signed_data(&self.random.0, &server_random.0);
        provider
            .signature_verification
            .verify_signature(
                leaf,
                &signed_data,
                &ske.signed.signature,
                ske.signed.algorithm.hash,
                ske.signed.algorithm.signature,
            )
            .map_err(|e| {
                Error::AuthenticationFailure(format!("ServerKeyExchange signature: {}", e))
            })?;

        trace!("ServerKeyExchange signature verified");
        self.server_key_exchange = Some(ske);
        self.engine.transcript_push(header, body);
        self.state = ClientState::AwaitServerHelloDone;
        Ok(())
    }

    fn send_final_flight(&mut self) -> Result<(), Error> {
        let suite = self.suite()?;
        let server_random = self.server_random()?;
        let ske = self
            .server_key_exchange
            .take()
            .ok_or_else(|| Error::ProtocolOrderViolation("no ServerKeyExchange".into()))?;
        let provider = self.engine.config().crypto_provider().clone();

        // Settle client authentication before anything of the flight goes out.
        let client_auth = match &self.certificate_request {
            Some(request) => {
                let algorithm = SignatureAndHashAlgorithm::new(
                    self.signing_key.hash_algorithm(),
                    self.signing_key.algorithm(),
                );
                if !request.supported_signature_algorithms.contains(&algorithm) {
                    return Err(Error::NegotiationMismatch(format!(
                        "server does not accept our signature {:?}",
                        algorithm
                    )));
                }
                Some(algorithm)
            }
            None => None,
        };

        let group = provider.find_kx_group(ske.named_group).ok_or_else(|| {
            Error::NegotiationMismatch(format!("no key exchange for {:?}", ske.named_group))
        })?;
        let kx = group.start_exchange(Buf::new()).map_err(Error::Crypto)?;
        let client_public = kx.pub_key().to_vec();

        debug!("Sending client final flight");
        self.engine.flight_begin(true);

        if client_auth.is_some() {
            let certificate = Certificate::new(vec![self.certificate.certificate.clone()]);
            self.engine
                .create_handshake(MessageType::Certificate, |body, _| {
                    certificate.serialize(body);
                    Ok(())
                })?;
        }

        self.engine
            .create_handshake(MessageType::ClientKeyExchange, |body, _| {
                ClientKeyExchange::new(&client_public).serialize(body);
                Ok(())
            })?;

        let mut pre_master_secret = Buf::new();
        kx.complete(&ske.public_key, &mut pre_master_secret)
            .map_err(Error::Crypto)?;

        let hash = suite.hash_algorithm();
        let mut schedule = KeySchedule::new(provider.prf_provider, hash);
        let derived = if self.extended_master_secret {
            let session_hash = self.engine.transcript_hash(hash)?;
            schedule.derive_extended_master_secret(&pre_master_secret, &session_hash)
        } else {
            schedule.derive_master_secret(&pre_master_secret, &self.random.0, &server_random.0)
        };
        pre_master_secret.zeroize();
        derived?;

        if let Some(algorithm) = client_auth {
            let mut signature = Buf::new();
            self.signing_key
                .sign(self.engine.transcript(), &mut signature)
                .map_err(Error::Crypto)?;
            let verify = CertificateVerify::new(DigitallySigned::new(algorithm, signature.into_vec()));
            self.engine
                .create_handshake(MessageType::CertificateVerify, |body, _| {
                    verify.serialize(body);
                    Ok(())
                })?;
        }

        let (_, key_len, iv_len) = suite.key_lengths();
        let keys = schedule.key_block(&self.random.0, &server_random.0, key_len, iv_len)?;
        let client_cipher = suite
            .create_cipher(&keys.client_write_key)
            .map_err(Error::Crypto)?;
        let server_cipher = suite
            .create_cipher(&keys.server_write_key)
            .map_err(Error::Crypto)?;

        self.engine.create_change_cipher_spec()?;
        self.engine.enable_encryption(client_cipher, keys.client_write_iv);

        let handshake_hash = self.engine.transcript_hash(hash)?;
        let verify_data = schedule.verify_data(
            "client finished",
            &handshake_hash,
            suite.suite().verify_data_length(),
        )?;
        self.engine
            .create_handshake(MessageType::Finished, |body, _| {
                Finished::new(&verify_data).serialize(body);
                Ok(())
            })?;

        self.schedule = Some(schedule);
        self.engine.set_peer_keys(server_cipher, keys.server_write_iv)
    }

    fn handle_server_finished(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        if !self.engine.is_peer_encryption_enabled() {
            return Err(Error::ProtocolOrderViolation(
                "Finished before ChangeCipherSpec".into(),
            ));
        }

        let suite = self.suite()?;
        let server_random = self.server_random()?;
        let (_, finished) = Finished::parse(body, suite.suite())?;
        let handshake_hash = self.engine.transcript_hash(suite.hash_algorithm())?;

        let schedule = self
            .schedule
            .as_mut()
            .ok_or_else(|| Error::ProtocolOrderViolation("Finished before key exchange".into()))?;

        let expected = schedule.verify_data(
            "server finished",
            &handshake_hash,
            suite.suite().verify_data_length(),
        )?;
        if !bool::from(expected.ct_eq(&finished.verify_data)) {
            return Err(Error::AuthenticationFailure(
                "server Finished does not verify".into(),
            ));
        }
        self.engine.transcript_push(header, body);
        debug!("Server Finished verified");

        let exported = match self.srtp_profile {
            Some(profile) => Some(schedule.export_keys(profile, &self.random.0, &server_random.0)?),
            None => None,
        };

        self.engine.flight_finish(false);
        if let Some(certificate) = &self.peer_certificate {
            self.engine.push_peer_cert(certificate.clone());
        }
        self.engine.push_connected();
        if let Some(keys) = exported {
            debug!("Exported SRTP keys for {}", keys.profile);
            self.engine.push_keying_material(keys);
        }

        self.state = ClientState::Established;
        Ok(())
    }

    fn suite(&self) -> Result<&'static dyn SupportedDtls12CipherSuite, Error> {
        self.cipher_suite
            .ok_or_else(|| Error::ProtocolOrderViolation("no ServerHello".into()))
    }

    fn server_random(&self) -> Result<Random, Error> {
        self.server_random
            .ok_or_else(|| Error::ProtocolOrderViolation("no ServerHello".into()))
    }
}

/// The server must echo exactly one of the profiles we offered.
fn select_srtp_profile(
    offered: &[SrtpProfile],
    reply: Option<&UseSrtpExtension>,
) -> Result<Option<SrtpProfile>, Error> {
    let Some(reply) = reply else {
        if offered.is_empty() {
            return Ok(None);
        }
        return Err(Error::NegotiationMismatch(
            "server did not answer use_srtp".into(),
        ));
    };

    if offered.is_empty() {
        return Err(Error::NegotiationMismatch(
            "server sent use_srtp we did not offer".into(),
        ));
    }

    let id = match reply.profiles.as_slice() {
        [id] => *id,
        other => {
            return Err(Error::NegotiationMismatch(format!(
                "server chose {} SRTP profiles",
                other.len()
            )))
        }
    };

    match id.profile() {
        Some(profile) if offered.contains(&profile) => Ok(Some(profile)),
        _ => Err(Error::NegotiationMismatch(format!(
            "server chose SRTP profile {:?} we did not offer",
            id
        ))),
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("cipher_suite", &self.cipher_suite())
            .field("srtp_profile", &self.srtp_profile)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
