//! Failed handshakes: what the client reports, sends and does afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls_srtp::{
    CertificateVerifier, Client, ErrorKind, HandshakeState, MessageType, ServerState,
};

use crate::common::*;

/// A client that expects the server to present `ids.client`'s certificate.
fn misconfigured_pair(ids: &Identities, now: Instant) -> (Client, dtls_srtp::Server) {
    let (_, server) = pair(
        ids,
        config(50).build().unwrap(),
        config(51).hello_verify_request(false).build().unwrap(),
        now,
    );
    let client = Client::new(
        now,
        Arc::new(config(50).build().unwrap()),
        ids.client.clone(),
        CertificateVerifier::fingerprint(ids.client.fingerprint()),
    )
    .unwrap();
    (client, server)
}

#[test]
fn wrong_fingerprint_fails_with_alert() {
    let _ = env_logger::try_init();
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = misconfigured_pair(&ids, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    let flight = drain(&mut server).packets;

    let err = flight
        .iter()
        .map(|p| client.handle_packet(p))
        .find_map(Result::err)
        .expect("certificate rejected");
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    assert_eq!(client.state(), HandshakeState::Failed);

    let failure = client.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::AuthenticationFailure);
    assert_eq!(failure.state, HandshakeState::ReceivedServerFlight);
    assert_eq!(failure.expected, Some(MessageType::Certificate));
    assert!(!failure.reason.is_empty());

    // Only the alert goes out, nothing of the final flight.
    let out = drain(&mut client);
    assert_eq!(out.packets.len(), 1);
    let records = parse_records(&out.packets[0]);
    assert_eq!(records.len(), 1);
    let alert = records[0];
    assert_eq!(alert.ctype, CONTENT_ALERT);
    assert_eq!(alert.epoch, 0);
    assert_eq!(&out.packets[0][alert.body..alert.body + alert.len], &[2, 42]);
    assert!(!out.connected);
    assert!(out.keys.is_none());

    let err = server.handle_packet(&out.packets[0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlertReceived);
    assert_eq!(server.state(), ServerState::Failed);
}

#[test]
fn failed_client_stays_silent() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = misconfigured_pair(&ids, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    let flight = drain(&mut server).packets;
    deliver(&flight, &mut client);
    assert_eq!(client.state(), HandshakeState::Failed);
    let failure = client.failure().cloned().unwrap();
    let _alert = drain(&mut client);

    // Valid packets, garbage and timeouts are all accepted and change nothing.
    for p in &flight {
        client.handle_packet(p).unwrap();
    }
    client.handle_packet(&[0xff; 40]).unwrap();
    client.handle_packet(&[]).unwrap();
    client.handle_timeout(now + Duration::from_secs(3600)).unwrap();

    let out = drain(&mut client);
    assert!(out.packets.is_empty());
    assert!(!out.connected);
    assert!(out.timeout.is_some());
    assert_eq!(client.failure(), Some(&failure));
    assert_eq!(client.state(), HandshakeState::Failed);
}

#[test]
fn fatal_alert_from_server_is_not_answered() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, _server) = pair(&ids, config(52).build().unwrap(), config(53).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    let _ch1 = drain(&mut client);

    // Epoch 0, record sequence 9, fatal handshake_failure.
    let alert = [21, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 9, 0, 2, 2, 40];
    let err = client.handle_packet(&alert).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlertReceived);

    let failure = client.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::AlertReceived);
    assert_eq!(failure.state, HandshakeState::SentClientHello1);
    assert!(drain(&mut client).packets.is_empty());
}

#[test]
fn warning_alert_is_ignored() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, _server) = pair(&ids, config(54).build().unwrap(), config(55).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    let _ch1 = drain(&mut client);

    // Warning level, user_canceled.
    let alert = [21, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 9, 0, 2, 1, 90];
    client.handle_packet(&alert).unwrap();
    assert_eq!(client.state(), HandshakeState::SentClientHello1);
}

#[test]
fn malformed_handshake_is_decode_error() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, _server) = pair(&ids, config(56).build().unwrap(), config(57).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    let _ch1 = drain(&mut client);

    // A handshake header announcing 100 bytes, with 2 present.
    let mut record = vec![22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 1, 0, 14];
    record.extend_from_slice(&[2, 0, 0, 100, 0, 0, 0, 0, 0, 0, 0, 100, 0xfe, 0xfd]);
    let err = client.handle_packet(&record).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);

    let out = drain(&mut client);
    assert_eq!(out.packets.len(), 1);
    let r = parse_records(&out.packets[0])[0];
    assert_eq!(r.ctype, CONTENT_ALERT);
    assert_eq!(&out.packets[0][r.body..r.body + r.len], &[2, 50]);
}

#[test]
fn tampered_record_is_dropped_and_recovered() {
    let _ = env_logger::try_init();
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = pair(&ids, config(58).build().unwrap(), config(59).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    let mut client_timeout = now;
    while server.state() != ServerState::Established {
        let c = drain(&mut client);
        client_timeout = c.timeout.unwrap();
        deliver(&c.packets, &mut server);
        if server.state() != ServerState::Established {
            deliver(&drain(&mut server).packets, &mut client);
        }
    }

    // Flip a bit in the authentication tag of the server's Finished.
    let mut answer = drain(&mut server).packets;
    let last = answer.last_mut().unwrap();
    let n = last.len();
    last[n - 1] ^= 0x01;
    deliver(&answer, &mut client);
    assert_eq!(client.state(), HandshakeState::SentClientFinalFlight);
    assert!(!drain(&mut client).connected);

    // Our flight times out, the server answers the repeat and we are through.
    client.handle_timeout(client_timeout).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    deliver(&drain(&mut server).packets, &mut client);
    assert_eq!(client.state(), HandshakeState::Established);
    assert!(drain(&mut client).connected);
}

#[test]
fn abort_fails_without_alert() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, _server) = pair(&ids, config(60).build().unwrap(), config(61).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    client.abort();

    let failure = client.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Aborted);
    assert_eq!(failure.state, HandshakeState::SentClientHello1);
    assert!(drain(&mut client).packets.is_empty(), "queued ClientHello is discarded");
}
