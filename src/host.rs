//! Host adapter.
//!
//! A small typed surface for an embedding application: start a handshake on
//! a background thread and get told about connection state changes and the
//! exported SRTP keys through [`HostEvents`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::crypto::{ExportedKeys, SrtpProfile};
use crate::identity::IdentityProvider;
use crate::transport::UdpTransport;
use crate::verifier::{CertificateVerifier, Fingerprint};
use crate::{Config, Connection, Error, ErrorKind, HandshakeFailure, HandshakeState};

/// Connection state as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failed,
}

/// Callbacks into the host. Invoked on the handshake thread.
pub trait HostEvents: Send + 'static {
    fn on_connection_state(&mut self, state: ConnectionState);

    /// Called once, before [`ConnectionState::Connected`], when an SRTP
    /// profile was negotiated.
    fn exported_keys_ready(&mut self, profile: SrtpProfile, keys: ExportedKeys);
}

/// Everything needed to attempt one handshake.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// Local address to bind. Defaults to the unspecified address of the
    /// remote's family.
    pub local: Option<String>,
    pub remote_host: String,
    pub remote_port: u16,
    /// Expected peer fingerprint. `None` accepts any peer.
    pub fingerprint: Option<Fingerprint>,
    pub config: Arc<Config>,
}

impl HandshakeRequest {
    pub fn new(remote_host: impl Into<String>, remote_port: u16, config: Arc<Config>) -> Self {
        HandshakeRequest {
            local: None,
            remote_host: remote_host.into(),
            remote_port,
            fingerprint: None,
            config,
        }
    }

    pub fn local(mut self, local: impl Into<String>) -> Self {
        self.local = Some(local.into());
        self
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    fn verifier(&self) -> CertificateVerifier {
        match self.fingerprint {
            Some(fp) => CertificateVerifier::fingerprint(fp),
            None => {
                warn!("No peer fingerprint, handshake is unauthenticated");
                CertificateVerifier::unauthenticated()
            }
        }
    }
}

/// A running handshake.
#[derive(Debug)]
pub struct HandshakeHandle {
    abort: Arc<AtomicBool>,
    thread: JoinHandle<Result<(), HandshakeFailure>>,
}

impl HandshakeHandle {
    /// Ask the handshake to stop. It fails with [`ErrorKind::Aborted`].
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the outcome.
    pub fn join(self) -> Result<(), HandshakeFailure> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(HandshakeFailure {
                kind: ErrorKind::Aborted,
                state: HandshakeState::Failed,
                expected: None,
                reason: "handshake thread panicked".into(),
            }),
        }
    }
}

/// Start a handshake on its own thread.
///
/// The host is told [`ConnectionState::Connecting`] straight away, and
/// later either the keys followed by [`ConnectionState::Connected`], or
/// [`ConnectionState::Failed`].
pub fn start_handshake<E: HostEvents>(
    request: HandshakeRequest,
    identity: Arc<dyn IdentityProvider>,
    mut events: E,
) -> Result<HandshakeHandle, Error> {
    let abort = Arc::new(AtomicBool::new(false));
    let flag = abort.clone();

    let thread = thread::Builder::new()
        .name("dtls-handshake".into())
        .spawn(move || {
            events.on_connection_state(ConnectionState::Connecting);
            let result = run(&request, identity.as_ref(), flag);

            match result {
                Ok(Some(keys)) => {
                    events.exported_keys_ready(keys.profile, keys);
                    events.on_connection_state(ConnectionState::Connected);
                    Ok(())
                }
                Ok(None) => {
                    events.on_connection_state(ConnectionState::Connected);
                    Ok(())
                }
                Err(failure) => {
                    debug!("Handshake with {} failed: {}", request.remote_host, failure);
                    events.on_connection_state(ConnectionState::Failed);
                    Err(failure)
                }
            }
        })?;

    Ok(HandshakeHandle { abort, thread })
}

fn run(
    request: &HandshakeRequest,
    identity: &dyn IdentityProvider,
    abort: Arc<AtomicBool>,
) -> Result<Option<ExportedKeys>, HandshakeFailure> {
    let setup = |e: Error| HandshakeFailure::new(&e, HandshakeState::Idle, None);

    let transport = UdpTransport::connect(
        request.local.as_deref(),
        &request.remote_host,
        request.remote_port,
    )
    .map_err(setup)?;

    let mut connection = Connection::new(
        request.config.clone(),
        identity,
        request.verifier(),
        transport,
    )
    .map_err(setup)?
    .with_abort_handle(abort);

    let established = connection.connect()?;
    debug!(
        "Connected to {} with {:?}, profile {:?}",
        established.peer_fingerprint, established.cipher_suite, established.srtp_profile
    );

    Ok(established.keys)
}
