//! Blocking driver running a [`Client`] over a [`DatagramTransport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::crypto::{ExportedKeys, SrtpProfile};
use crate::identity::IdentityProvider;
use crate::message::CipherSuite;
use crate::transport::{DatagramTransport, Received};
use crate::verifier::{CertificateVerifier, Fingerprint};
use crate::{Client, Config, Error, HandshakeFailure, HandshakeState, Output};

/// Longest single wait, so an abort is noticed promptly.
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Largest datagram we read.
const RECEIVE_BUFFER: usize = 2048;

/// What a completed handshake hands to the caller.
#[derive(Debug)]
pub struct Established {
    pub cipher_suite: CipherSuite,
    pub srtp_profile: Option<SrtpProfile>,
    pub peer_certificate: Vec<u8>,
    pub peer_fingerprint: Fingerprint,
    /// Present when an SRTP profile was negotiated.
    pub keys: Option<ExportedKeys>,
}

/// One handshake attempt over a connected datagram transport.
///
/// The attempt owns its transport and client exclusively. To cancel it from
/// another thread, set the flag from [`Connection::abort_handle`].
pub struct Connection<T: DatagramTransport> {
    client: Client,
    transport: T,
    abort: Arc<AtomicBool>,
    buf: Vec<u8>,
    rx: Vec<u8>,
}

impl<T: DatagramTransport> Connection<T> {
    pub fn new(
        config: Arc<Config>,
        identity: &dyn IdentityProvider,
        verifier: CertificateVerifier,
        transport: T,
    ) -> Result<Self, Error> {
        let mtu = config.mtu();
        let certificate = identity.identity()?;
        let client = Client::new(Instant::now(), config, certificate, verifier)?;

        Ok(Connection {
            client,
            transport,
            abort: Arc::new(AtomicBool::new(false)),
            // Large enough for a certificate event as well as a datagram.
            buf: vec![0; mtu.max(RECEIVE_BUFFER) * 4],
            rx: vec![0; RECEIVE_BUFFER],
        })
    }

    /// Setting the flag makes [`Connection::connect`] fail with
    /// [`Error::Aborted`] at its next check.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Share an existing abort flag instead of the connection's own.
    pub fn with_abort_handle(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the handshake to completion.
    pub fn connect(&mut self) -> Result<Established, HandshakeFailure> {
        match self.run() {
            Ok(established) => Ok(established),
            Err(error) => Err(self.failure(error)),
        }
    }

    fn run(&mut self) -> Result<Established, Error> {
        let mut keys = None;
        self.client.handle_timeout(Instant::now())?;

        loop {
            let deadline = self.flush(&mut keys)?;

            if self.client.state() == HandshakeState::Established {
                return self.established(keys);
            }

            if self.abort.load(Ordering::Relaxed) {
                debug!("Handshake aborted by caller");
                self.client.abort();
                return Err(Error::Aborted);
            }

            let wait = deadline
                .saturating_duration_since(Instant::now())
                .min(MAX_WAIT);

            match self.transport.recv_timeout(&mut self.rx, wait)? {
                Received::Datagram(n) => self.client.handle_packet(&self.rx[..n])?,
                Received::Timeout => {}
            }

            self.client.handle_timeout(Instant::now())?;
        }
    }

    /// Send all queued datagrams and collect events. Returns the next deadline.
    fn flush(&mut self, keys: &mut Option<ExportedKeys>) -> Result<Instant, Error> {
        loop {
            match self.client.poll_output(&mut self.buf) {
                Output::Packet(p) => self.transport.send(p)?,
                Output::Timeout(t) => return Ok(t),
                Output::Connected => debug!("Handshake connected"),
                Output::PeerCert(cert) => trace!("Peer certificate of {} bytes", cert.len()),
                Output::KeyingMaterial(k) => *keys = Some(k),
            }
        }
    }

    fn established(&self, keys: Option<ExportedKeys>) -> Result<Established, Error> {
        let missing = || Error::ProtocolOrderViolation("established without peer".into());
        Ok(Established {
            cipher_suite: self.client.cipher_suite().ok_or_else(missing)?,
            srtp_profile: self.client.srtp_profile(),
            peer_certificate: self.client.peer_certificate().ok_or_else(missing)?.to_vec(),
            peer_fingerprint: self.client.peer_fingerprint().ok_or_else(missing)?,
            keys,
        })
    }

    fn failure(&mut self, error: Error) -> HandshakeFailure {
        // The client queues a fatal alert when it fails. Best effort to send it.
        if let Err(e) = self.flush(&mut None) {
            debug!("Could not send alert: {}", e);
        }

        match self.client.failure() {
            Some(failure) => failure.clone(),
            // Failures at the transport are not the client's.
            None => HandshakeFailure::new(&error, self.client.state(), None),
        }
    }
}

impl<T: DatagramTransport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client", &self.client)
            .field("aborted", &self.abort.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
