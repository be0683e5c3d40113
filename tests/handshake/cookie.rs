//! HelloVerifyRequest cookie exchange.

use std::time::Instant;

use dtls_srtp::{ErrorKind, HandshakeState};

use crate::common::*;

#[test]
fn second_client_hello_echoes_cookie() {
    let _ = env_logger::try_init();
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = pair(&ids, config(20).build().unwrap(), config(21).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    let ch1 = drain(&mut client).packets;
    assert_eq!(ch1.len(), 1);
    assert_eq!(client_hello_cookie(&ch1[0]), Some(vec![]));
    deliver(&ch1, &mut server);

    let hvr = drain(&mut server).packets;
    assert_eq!(hvr.len(), 1);
    let cookie = hello_verify_cookie(&hvr[0]).expect("HelloVerifyRequest");
    assert!(!cookie.is_empty());
    deliver(&hvr, &mut client);
    assert_eq!(client.state(), HandshakeState::SentClientHello2);

    let out = drain(&mut client);
    let ch2 = out.packets;
    assert_eq!(ch2.len(), 1);
    assert_eq!(client_hello_cookie(&ch2[0]), Some(cookie.clone()));

    // Retransmissions of the second ClientHello carry the same cookie.
    let at = out.timeout.unwrap();
    client.handle_timeout(at).unwrap();
    let resent = drain(&mut client).packets;
    assert_eq!(client_hello_cookie(&resent[0]), Some(cookie));

    deliver(&ch2, &mut server);
    let mut sim = Sim::new(client, server, at);
    assert!(sim.run(|_| false, 100));
    assert_eq!(sim.client.state(), HandshakeState::Established);
}

#[test]
fn repeated_hello_verify_request_replaces_cookie() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = pair(&ids, config(22).build().unwrap(), config(23).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    let ch1 = drain(&mut client).packets;
    deliver(&ch1, &mut server);
    let hvr = drain(&mut server).packets;
    deliver(&hvr, &mut client);
    let _ch2 = drain(&mut client).packets;

    // A different server instance issues a different cookie for the same
    // random, as if the server restarted. Its message_seq is the next one.
    let (_, mut other) = pair(&ids, config(20).build().unwrap(), config(24).build().unwrap(), now);
    deliver(&ch1, &mut other);
    let first_hvr = drain(&mut other).packets;
    let other_cookie = hello_verify_cookie(&first_hvr[0]).unwrap();

    let mut second_hvr = first_hvr[0].clone();
    bump_message_seq(&mut second_hvr, 1);
    client.handle_packet(&second_hvr).unwrap();

    assert_eq!(client.state(), HandshakeState::SentClientHello2);
    let ch3 = drain(&mut client).packets;
    assert_eq!(client_hello_cookie(&ch3[0]), Some(other_cookie));
}

#[test]
fn hello_verify_request_after_server_hello_fails() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = pair(&ids, config(25).build().unwrap(), config(26).build().unwrap(), now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    let hvr = drain(&mut server).packets;
    deliver(&hvr, &mut client);
    deliver(&drain(&mut client).packets, &mut server);
    let flight = drain(&mut server).packets;
    deliver(&flight, &mut client);
    assert_eq!(client.state(), HandshakeState::SentClientFinalFlight);

    // A HelloVerifyRequest numbered as the next message after ServerHelloDone.
    let mut late = hvr[0].clone();
    bump_message_seq(&mut late, 6);
    let err = client.handle_packet(&late).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolOrderViolation);
    assert_eq!(client.state(), HandshakeState::Failed);
}

/// Rewrite the message_seq of the single handshake record in `datagram`.
fn bump_message_seq(datagram: &mut [u8], seq: u16) {
    let r = parse_records(datagram)[0];
    datagram[r.body + 4..r.body + 6].copy_from_slice(&seq.to_be_bytes());
    // Give the record a fresh record sequence number.
    datagram[10] = datagram[10].wrapping_add(50);
}
