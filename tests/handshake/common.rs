//! Shared helpers for the handshake integration tests.

#![allow(unused)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls_srtp::crypto::rust_crypto::default_provider;
use dtls_srtp::crypto::{ActiveKeyExchange, Buf, CryptoProvider, NamedGroup, SupportedKxGroup};
use dtls_srtp::{
    generate_self_signed_certificate, CertificateVerifier, Client, Config, ConfigBuilder,
    DtlsCertificate, Error, ExportedKeys, HandshakeState, Output, Server, ServerState,
};

/// Handshake message types (RFC 5246 / 6347).
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE: u8 = 11;
pub const SERVER_KEY_EXCHANGE: u8 = 12;
pub const SERVER_HELLO_DONE: u8 = 14;
pub const CLIENT_KEY_EXCHANGE: u8 = 16;
pub const FINISHED: u8 = 20;

pub const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;

const RECORD_HEADER: usize = 13;
const HANDSHAKE_HEADER: usize = 12;

/// Parsed DTLS 1.2 record header plus where its body sits in the datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
    pub body: usize,
    pub len: usize,
}

/// Parse DTLS 1.2 record headers from a datagram.
pub fn parse_records(datagram: &[u8]) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + RECORD_HEADER <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes[2..].copy_from_slice(&datagram[i + 5..i + 11]);
        let seq = u64::from_be_bytes(seq_bytes);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        out.push(RecHdr {
            ctype,
            epoch,
            seq,
            body: i + RECORD_HEADER,
            len,
        });
        i += RECORD_HEADER + len;
    }
    out
}

/// Handshake message types of the plaintext (epoch 0) handshake records.
pub fn handshake_types(datagram: &[u8]) -> Vec<u8> {
    parse_records(datagram)
        .into_iter()
        .filter(|r| r.ctype == CONTENT_HANDSHAKE && r.epoch == 0 && r.len > 0)
        .map(|r| datagram[r.body])
        .collect()
}

/// Body offset of the first unfragmented plaintext handshake message of `msg_type`.
pub fn find_handshake(datagram: &[u8], msg_type: u8) -> Option<usize> {
    parse_records(datagram)
        .into_iter()
        .filter(|r| r.ctype == CONTENT_HANDSHAKE && r.epoch == 0 && r.len > HANDSHAKE_HEADER)
        .find(|r| datagram[r.body] == msg_type)
        .map(|r| r.body + HANDSHAKE_HEADER)
}

/// Cookie carried by a HelloVerifyRequest.
pub fn hello_verify_cookie(datagram: &[u8]) -> Option<Vec<u8>> {
    let at = find_handshake(datagram, HELLO_VERIFY_REQUEST)?;
    // server_version(2) cookie<0..255>
    let len = datagram[at + 2] as usize;
    Some(datagram[at + 3..at + 3 + len].to_vec())
}

/// Cookie carried by a ClientHello.
pub fn client_hello_cookie(datagram: &[u8]) -> Option<Vec<u8>> {
    let at = find_handshake(datagram, CLIENT_HELLO)?;
    // client_version(2) random(32) session_id<0..32> cookie<0..255>
    let sid_len = datagram[at + 34] as usize;
    let cookie_at = at + 35 + sid_len;
    let len = datagram[cookie_at] as usize;
    Some(datagram[cookie_at + 1..cookie_at + 1 + len].to_vec())
}

/// Rewrite the cipher suite a ServerHello selects.
///
/// Returns false when the datagram has no ServerHello.
pub fn patch_server_hello_suite(datagram: &mut [u8], suite: u16) -> bool {
    let Some(at) = find_handshake(datagram, SERVER_HELLO) else {
        return false;
    };
    // server_version(2) random(32) session_id<0..32> cipher_suite(2)
    let sid_len = datagram[at + 34] as usize;
    let i = at + 35 + sid_len;
    datagram[i..i + 2].copy_from_slice(&suite.to_be_bytes());
    true
}

/// Rewrite the profile of the use_srtp extension in a ServerHello.
///
/// Returns false when the datagram has no ServerHello with use_srtp.
pub fn patch_server_hello_profile(datagram: &mut [u8], profile_id: u16) -> bool {
    let Some(at) = find_handshake(datagram, SERVER_HELLO) else {
        return false;
    };
    // server_version(2) random(32) session_id<0..32> cipher_suite(2) compression(1)
    let sid_len = datagram[at + 34] as usize;
    let mut i = at + 35 + sid_len + 3;
    let ext_len = u16::from_be_bytes([datagram[i], datagram[i + 1]]) as usize;
    i += 2;
    let end = i + ext_len;

    while i + 4 <= end {
        let ext_type = u16::from_be_bytes([datagram[i], datagram[i + 1]]);
        let len = u16::from_be_bytes([datagram[i + 2], datagram[i + 3]]) as usize;
        if ext_type == 0x000e {
            // profiles<2..2^16-1> with a single entry, then mki
            datagram[i + 6..i + 8].copy_from_slice(&profile_id.to_be_bytes());
            return true;
        }
        i += 4 + len;
    }
    false
}

/// Either side of a handshake, for the drivers below.
pub trait Endpoint {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error>;
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error>;
    fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a>;
}

impl Endpoint for Client {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Client::handle_packet(self, packet)
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Client::handle_timeout(self, now)
    }

    fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        Client::poll_output(self, buf)
    }
}

impl Endpoint for Server {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Server::handle_packet(self, packet)
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Server::handle_timeout(self, now)
    }

    fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        Server::poll_output(self, buf)
    }
}

/// Collected outputs from polling an endpoint to `Timeout`.
#[derive(Default, Debug)]
pub struct Drained {
    pub packets: Vec<Vec<u8>>,
    pub connected: bool,
    pub peer_cert: Option<Vec<u8>>,
    pub keys: Option<ExportedKeys>,
    pub timeout: Option<Instant>,
}

/// Poll until `Timeout`, collecting everything.
pub fn drain<E: Endpoint>(endpoint: &mut E) -> Drained {
    let mut result = Drained::default();
    let mut buf = vec![0u8; 4096];
    loop {
        match endpoint.poll_output(&mut buf) {
            Output::Packet(p) => result.packets.push(p.to_vec()),
            Output::Connected => result.connected = true,
            Output::PeerCert(cert) => result.peer_cert = Some(cert.to_vec()),
            Output::KeyingMaterial(keys) => result.keys = Some(keys),
            Output::Timeout(t) => {
                result.timeout = Some(t);
                break;
            }
        }
    }
    result
}

/// Deliver packets, ignoring errors. Failures are checked through state.
pub fn deliver<E: Endpoint>(packets: &[Vec<u8>], dest: &mut E) {
    for p in packets {
        let _ = dest.handle_packet(p);
    }
}

/// Builder with deterministic randomness and exact timers.
pub fn config(seed: u64) -> ConfigBuilder {
    Config::builder().rng_seed(seed).flight_jitter(false)
}

/// A certificate pair, generated once per test binary run.
pub struct Identities {
    pub client: DtlsCertificate,
    pub server: DtlsCertificate,
}

pub fn identities() -> Identities {
    Identities {
        client: generate_self_signed_certificate().expect("client certificate"),
        server: generate_self_signed_certificate().expect("server certificate"),
    }
}

/// A client that authenticates the server by fingerprint, and the server.
pub fn pair(
    ids: &Identities,
    client_config: Config,
    server_config: Config,
    now: Instant,
) -> (Client, Server) {
    let client = Client::new(
        now,
        Arc::new(client_config),
        ids.client.clone(),
        CertificateVerifier::fingerprint(ids.server.fingerprint()),
    )
    .expect("client");
    let server = Server::new(
        now,
        Arc::new(server_config),
        ids.server.clone(),
        CertificateVerifier::fingerprint(ids.client.fingerprint()),
    )
    .expect("server");
    (client, server)
}

/// Client and server on a simulated clock over an in-memory datagram link.
pub struct Sim {
    pub client: Client,
    pub server: Server,
    pub now: Instant,
    pub client_out: Drained,
    pub server_out: Drained,
    /// Datagrams put on the link, in both directions.
    pub sent: usize,
    pub dropped: usize,
}

impl Sim {
    pub fn new(client: Client, server: Server, now: Instant) -> Self {
        Sim {
            client,
            server,
            now,
            client_out: Drained::default(),
            server_out: Drained::default(),
            sent: 0,
            dropped: 0,
        }
    }

    /// Run until both sides are connected, either side failed, or
    /// `max_rounds` passed. Datagram `n` is lost when `lose(n)`.
    pub fn run(&mut self, lose: impl Fn(usize) -> bool, max_rounds: usize) -> bool {
        let _ = self.client.handle_timeout(self.now);

        for _ in 0..max_rounds {
            let mut delivered = false;

            let c = drain(&mut self.client);
            let client_timeout = c.timeout;
            for p in &c.packets {
                let n = self.sent;
                self.sent += 1;
                if lose(n) {
                    self.dropped += 1;
                } else {
                    delivered = true;
                    let _ = self.server.handle_packet(p);
                }
            }
            absorb(&mut self.client_out, c);

            let s = drain(&mut self.server);
            let server_timeout = s.timeout;
            for p in &s.packets {
                let n = self.sent;
                self.sent += 1;
                if lose(n) {
                    self.dropped += 1;
                } else {
                    delivered = true;
                    let _ = self.client.handle_packet(p);
                }
            }
            absorb(&mut self.server_out, s);

            if self.client_out.connected && self.server_out.connected {
                // The client may still hold events from the last delivery.
                let c = drain(&mut self.client);
                absorb(&mut self.client_out, c);
                return true;
            }
            if self.client.state() == HandshakeState::Failed
                || self.server.state() == ServerState::Failed
            {
                return false;
            }

            if !delivered {
                let next = match (client_timeout, server_timeout) {
                    (Some(c), Some(s)) => c.min(s),
                    (Some(t), None) | (None, Some(t)) => t,
                    (None, None) => return false,
                };
                self.now = self.now.max(next);
                let _ = self.client.handle_timeout(self.now);
                let _ = self.server.handle_timeout(self.now);
            }
        }
        false
    }
}

fn absorb(into: &mut Drained, from: Drained) {
    into.packets.extend(from.packets);
    into.connected |= from.connected;
    if from.peer_cert.is_some() {
        into.peer_cert = from.peer_cert;
    }
    if from.keys.is_some() {
        into.keys = from.keys;
    }
    into.timeout = from.timeout;
}

/// P-256 key exchange with a fixed private scalar, for reproducible keys.
#[derive(Debug)]
pub struct FixedP256(pub [u8; 32]);

struct FixedExchange {
    secret: [u8; 32],
    public: Vec<u8>,
}

impl std::fmt::Debug for FixedExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedExchange").finish_non_exhaustive()
    }
}

impl SupportedKxGroup for FixedP256 {
    fn name(&self) -> NamedGroup {
        NamedGroup::Secp256r1
    }

    fn start_exchange(&self, _buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String> {
        let secret = p256::SecretKey::from_slice(&self.0).map_err(|e| e.to_string())?;
        let public = secret.public_key().to_sec1_bytes().to_vec();
        Ok(Box::new(FixedExchange {
            secret: self.0,
            public,
        }))
    }
}

impl ActiveKeyExchange for FixedExchange {
    fn pub_key(&self) -> &[u8] {
        &self.public
    }

    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        let secret = p256::SecretKey::from_slice(&self.secret).map_err(|e| e.to_string())?;
        let peer = p256::PublicKey::from_sec1_bytes(peer_pub).map_err(|e| e.to_string())?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        out.clear();
        out.extend_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(())
    }

    fn group(&self) -> NamedGroup {
        NamedGroup::Secp256r1
    }
}

static CLIENT_KX: FixedP256 = FixedP256([0x11; 32]);
static SERVER_KX: FixedP256 = FixedP256([0x22; 32]);
static CLIENT_GROUPS: &[&dyn SupportedKxGroup] = &[&CLIENT_KX];
static SERVER_GROUPS: &[&dyn SupportedKxGroup] = &[&SERVER_KX];

/// Default provider with the client's fixed key pair.
pub fn fixed_client_provider() -> CryptoProvider {
    CryptoProvider {
        kx_groups: CLIENT_GROUPS,
        ..default_provider()
    }
}

/// Default provider with the server's fixed key pair.
pub fn fixed_server_provider() -> CryptoProvider {
    CryptoProvider {
        kx_groups: SERVER_GROUPS,
        ..default_provider()
    }
}
