//! The blocking driver and the host adapter over real UDP sockets.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dtls_srtp::host::{start_handshake, ConnectionState, HandshakeRequest, HostEvents};
use dtls_srtp::{
    CertificateVerifier, Connection, DtlsCertificate, ExportedKeys, Fingerprint, Output, Server,
    SrtpProfile, UdpTransport,
};

use crate::common::*;

struct PeerServer {
    port: u16,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Option<ExportedKeys>>,
}

impl PeerServer {
    /// Answer handshakes on a loopback socket until stopped.
    fn spawn(certificate: DtlsCertificate, client: Fingerprint, config: dtls_srtp::Config) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let thread = thread::spawn(move || {
            let mut server = Server::new(
                Instant::now(),
                Arc::new(config),
                certificate,
                CertificateVerifier::fingerprint(client),
            )
            .unwrap();

            let mut keys = None;
            let mut peer = None;
            let mut rx = vec![0u8; 2048];
            let mut tx = vec![0u8; 8192];
            let give_up = Instant::now() + Duration::from_secs(20);

            while !flag.load(Ordering::Relaxed) && Instant::now() < give_up {
                if let Ok((n, from)) = socket.recv_from(&mut rx) {
                    peer = Some(from);
                    let _ = server.handle_packet(&rx[..n]);
                }
                let _ = server.handle_timeout(Instant::now());

                loop {
                    match server.poll_output(&mut tx) {
                        Output::Packet(p) => {
                            if let Some(to) = peer {
                                socket.send_to(p, to).unwrap();
                            }
                        }
                        Output::KeyingMaterial(k) => keys = Some(k),
                        Output::Timeout(_) => break,
                        _ => {}
                    }
                }
            }
            keys
        });

        PeerServer { port, stop, thread }
    }

    fn finish(self) -> Option<ExportedKeys> {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.join().unwrap()
    }
}

#[test]
fn connection_over_udp_loopback() {
    let _ = env_logger::try_init();
    let ids = identities();
    let server = PeerServer::spawn(
        ids.server.clone(),
        ids.client.fingerprint(),
        config(70).build().unwrap(),
    );

    let transport = UdpTransport::connect(Some("127.0.0.1"), "127.0.0.1", server.port).unwrap();
    assert_eq!(transport.remote_addr().port(), server.port);

    let mut connection = Connection::new(
        Arc::new(config(71).build().unwrap()),
        &ids.client,
        CertificateVerifier::fingerprint(ids.server.fingerprint()),
        transport,
    )
    .unwrap();

    let established = connection.connect().expect("handshake over loopback");
    let server_keys = server.finish();

    assert_eq!(established.peer_fingerprint, ids.server.fingerprint());
    assert_eq!(established.peer_certificate, ids.server.certificate);
    assert_eq!(established.srtp_profile, Some(SrtpProfile::AeadAes256Gcm));
    assert_eq!(established.keys, server_keys);
    assert!(established.keys.is_some());
}

#[derive(Clone, Default)]
struct Collected {
    states: Arc<Mutex<Vec<ConnectionState>>>,
    keys: Arc<Mutex<Option<(SrtpProfile, ExportedKeys)>>>,
}

impl HostEvents for Collected {
    fn on_connection_state(&mut self, state: ConnectionState) {
        if state == ConnectionState::Connected {
            assert!(self.keys.lock().unwrap().is_some(), "keys before Connected");
        }
        self.states.lock().unwrap().push(state);
    }

    fn exported_keys_ready(&mut self, profile: SrtpProfile, keys: ExportedKeys) {
        *self.keys.lock().unwrap() = Some((profile, keys));
    }
}

#[test]
fn host_adapter_reports_keys_then_connected() {
    let _ = env_logger::try_init();
    let ids = identities();
    let server_config = config(72)
        .srtp_profiles(&[SrtpProfile::Aes128CmSha1_80])
        .build()
        .unwrap();
    let server = PeerServer::spawn(ids.server.clone(), ids.client.fingerprint(), server_config);

    let request = HandshakeRequest::new("127.0.0.1", server.port, Arc::new(config(73).build().unwrap()))
        .local("127.0.0.1")
        .fingerprint(ids.server.fingerprint());

    let events = Collected::default();
    let handle = start_handshake(request, Arc::new(ids.client.clone()), events.clone()).unwrap();
    handle.join().expect("handshake succeeds");
    let server_keys = server.finish();

    assert_eq!(
        *events.states.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    let (profile, keys) = events.keys.lock().unwrap().take().unwrap();
    assert_eq!(profile, SrtpProfile::Aes128CmSha1_80);
    assert_eq!(keys.client_write_key.len(), 16);
    assert_eq!(keys.client_write_salt.len(), 14);
    assert_eq!(Some(keys), server_keys);
}

#[test]
fn host_adapter_reports_rejected_server() {
    let ids = identities();
    let server = PeerServer::spawn(
        ids.server.clone(),
        ids.client.fingerprint(),
        config(74).build().unwrap(),
    );

    // Pinned to the wrong certificate.
    let request = HandshakeRequest::new("127.0.0.1", server.port, Arc::new(config(75).build().unwrap()))
        .fingerprint(ids.client.fingerprint());

    let events = Collected::default();
    let handle = start_handshake(request, Arc::new(ids.client.clone()), events.clone()).unwrap();
    let failure = handle.join().unwrap_err();
    server.finish();

    assert_eq!(failure.kind, dtls_srtp::ErrorKind::AuthenticationFailure);
    assert_eq!(
        *events.states.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Failed]
    );
    assert!(events.keys.lock().unwrap().is_none());
}
