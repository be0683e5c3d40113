//! Complete handshakes between the client and the in-process server.

use std::time::Instant;

use dtls_srtp::{CipherSuite, ExportedKeys, HandshakeState, ServerState, SrtpProfile};

use crate::common::*;

fn handshake(ids: &Identities, client: dtls_srtp::Config, server: dtls_srtp::Config) -> Sim {
    let now = Instant::now();
    let (client, server) = pair(ids, client, server, now);
    let mut sim = Sim::new(client, server, now);
    assert!(sim.run(|_| false, 100), "handshake did not complete");
    sim
}

fn fixed_configs() -> (dtls_srtp::Config, dtls_srtp::Config) {
    let client = config(1)
        .with_crypto_provider(fixed_client_provider())
        .build()
        .unwrap();
    let server = config(2)
        .with_crypto_provider(fixed_server_provider())
        .build()
        .unwrap();
    (client, server)
}

#[test]
fn both_sides_export_identical_keys() {
    let _ = env_logger::try_init();
    let ids = identities();

    let (c, s) = fixed_configs();
    let sim = handshake(&ids, c, s);

    assert_eq!(sim.client.state(), HandshakeState::Established);
    assert_eq!(sim.server.state(), ServerState::Established);

    let client_keys = sim.client_out.keys.as_ref().expect("client keys");
    let server_keys = sim.server_out.keys.as_ref().expect("server keys");
    assert_eq!(client_keys, server_keys);
    assert_eq!(client_keys.profile, SrtpProfile::AeadAes256Gcm);
    assert_eq!(client_keys.client_write_key.len(), 32);
    assert_eq!(client_keys.client_write_salt.len(), 12);
    assert_ne!(client_keys.client_write_key, client_keys.server_write_key);

    assert_eq!(sim.client_out.peer_cert.as_deref(), Some(&ids.server.certificate[..]));
    assert_eq!(sim.client.peer_fingerprint(), Some(ids.server.fingerprint()));
    assert_eq!(sim.server.client_fingerprint(), Some(ids.client.fingerprint()));
}

#[test]
fn seeded_runs_are_reproducible() {
    let _ = env_logger::try_init();
    let ids = identities();

    let run = || -> ExportedKeys {
        let (c, s) = fixed_configs();
        let mut sim = handshake(&ids, c, s);
        sim.client_out.keys.take().expect("client keys")
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
    assert_eq!(first.client_write_key, second.client_write_key);
    assert_eq!(first.server_write_salt, second.server_write_salt);
}

#[test]
fn different_seed_different_keys() {
    let ids = identities();

    let (c, s) = fixed_configs();
    let a = handshake(&ids, c, s).client_out.keys.take();

    let c = config(99)
        .with_crypto_provider(fixed_client_provider())
        .build()
        .unwrap();
    let s = config(2)
        .with_crypto_provider(fixed_server_provider())
        .build()
        .unwrap();
    let b = handshake(&ids, c, s).client_out.keys.take();

    assert_ne!(a.unwrap().client_write_key, b.unwrap().client_write_key);
}

#[test]
fn small_mtu_fragments_every_flight() {
    let _ = env_logger::try_init();
    let ids = identities();

    let client = config(3).mtu(256).build().unwrap();
    let server = config(4).mtu(256).build().unwrap();
    let sim = handshake(&ids, client, server);

    assert!(sim.client_out.packets.iter().all(|p| p.len() <= 256));
    assert!(sim.server_out.packets.iter().all(|p| p.len() <= 256));

    // The server's certificate alone spans several datagrams.
    let certificate_fragments = sim
        .server_out
        .packets
        .iter()
        .flat_map(|p| handshake_types(p))
        .filter(|t| *t == CERTIFICATE)
        .count();
    assert!(certificate_fragments >= 2, "{}", certificate_fragments);

    assert_eq!(sim.client_out.keys, sim.server_out.keys);
}

#[test]
fn without_srtp_no_keys_are_exported() {
    let ids = identities();

    let client = config(5).srtp_profiles(&[]).build().unwrap();
    let server = config(6).srtp_profiles(&[]).build().unwrap();
    let sim = handshake(&ids, client, server);

    assert!(sim.client_out.connected);
    assert_eq!(sim.client.srtp_profile(), None);
    assert!(sim.client_out.keys.is_none());
    assert!(sim.server_out.keys.is_none());
}

#[test]
fn without_extended_master_secret_or_client_auth() {
    let ids = identities();

    let client = config(7).extended_master_secret(false).build().unwrap();
    let server = config(8)
        .require_client_certificate(false)
        .hello_verify_request(false)
        .build()
        .unwrap();
    let sim = handshake(&ids, client, server);

    assert_eq!(sim.client_out.keys, sim.server_out.keys);
    assert_eq!(sim.server.client_fingerprint(), None);

    // No HelloVerifyRequest round: the first ClientHello is answered directly.
    let first_server = &sim.server_out.packets[0];
    assert_eq!(handshake_types(first_server)[0], SERVER_HELLO);
}

#[test]
fn negotiates_offered_cipher_suite() {
    let ids = identities();
    let (c, s) = fixed_configs();
    let sim = handshake(&ids, c, s);

    let suite = sim.client.cipher_suite().unwrap();
    assert!(matches!(
        suite,
        CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 | CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
    ));
    assert_eq!(Some(suite), sim.server.cipher_suite());
}
