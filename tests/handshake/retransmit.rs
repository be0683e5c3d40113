//! Retransmission, duplicates and loss.

use std::time::{Duration, Instant};

use dtls_srtp::{ErrorKind, HandshakeState, MessageType, ServerState};

use crate::common::*;

#[test]
fn retransmits_at_doubling_intervals_then_gives_up() {
    let _ = env_logger::try_init();
    let ids = identities();
    let t0 = Instant::now();
    let rto = Duration::from_secs(1);
    let client_config = config(30)
        .flight_start_rto(rto)
        .flight_retries(3)
        .build()
        .unwrap();
    let (mut client, _server) = pair(&ids, client_config, config(31).build().unwrap(), t0);

    client.handle_timeout(t0).unwrap();
    let first = drain(&mut client);
    assert_eq!(first.packets.len(), 1);

    let mut resent_at = vec![];
    let mut timeout = first.timeout.unwrap();
    let err = loop {
        match client.handle_timeout(timeout) {
            Ok(()) => {
                let out = drain(&mut client);
                assert_eq!(out.packets.len(), 1, "one ClientHello per retransmission");
                assert_eq!(handshake_types(&out.packets[0]), vec![CLIENT_HELLO]);
                resent_at.push(timeout - t0);
                timeout = out.timeout.unwrap();
            }
            Err(e) => break e,
        }
    };

    assert_eq!(resent_at, vec![rto, 3 * rto, 7 * rto]);
    assert_eq!(timeout - t0, 15 * rto);
    assert_eq!(err.kind(), ErrorKind::TimeoutExceeded);

    let failure = client.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::TimeoutExceeded);
    assert_eq!(failure.state, HandshakeState::SentClientHello1);
    assert_eq!(failure.expected, Some(MessageType::ServerHello));

    // Timeouts send no alert.
    assert!(drain(&mut client).packets.is_empty());
}

#[test]
fn resent_records_get_fresh_sequence_numbers() {
    let ids = identities();
    let t0 = Instant::now();
    let (mut client, _server) = pair(&ids, config(32).build().unwrap(), config(33).build().unwrap(), t0);

    client.handle_timeout(t0).unwrap();
    let first = drain(&mut client);
    client.handle_timeout(first.timeout.unwrap()).unwrap();
    let second = drain(&mut client);

    let a = parse_records(&first.packets[0]);
    let b = parse_records(&second.packets[0]);
    assert_eq!(a.len(), b.len());
    for (a, b) in a.iter().zip(&b) {
        assert_eq!(a.epoch, b.epoch);
        assert!(b.seq > a.seq);
    }
    // Same handshake bytes, only the record header differs.
    assert_eq!(first.packets[0][13..], second.packets[0][13..]);
}

#[test]
fn repeated_server_flight_does_not_disturb_transcript() {
    let _ = env_logger::try_init();
    let ids = identities();
    let now = Instant::now();
    let server_config = config(35).hello_verify_request(false).build().unwrap();
    let (mut client, mut server) = pair(&ids, config(34).build().unwrap(), server_config, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);

    let first = drain(&mut server);
    deliver(&first.packets, &mut client);
    let final_flight = drain(&mut client).packets;
    let types: Vec<u8> = final_flight.iter().flat_map(|p| handshake_types(p)).collect();
    assert_eq!(types.iter().filter(|t| **t == CLIENT_KEY_EXCHANGE).count(), 1);

    // Our flight is lost. The server retransmits its own with fresh record
    // numbers, and its ServerHelloDone makes us send ours once more.
    let at = first.timeout.unwrap();
    server.handle_timeout(at).unwrap();
    let repeated = drain(&mut server).packets;
    assert_eq!(repeated.len(), first.packets.len());
    for (a, b) in first.packets.iter().zip(&repeated) {
        assert_eq!(handshake_types(a), handshake_types(b));
    }
    deliver(&repeated, &mut client);
    assert_eq!(client.state(), HandshakeState::SentClientFinalFlight);

    let resent = drain(&mut client).packets;
    let resent_types: Vec<u8> = resent.iter().flat_map(|p| handshake_types(p)).collect();
    assert_eq!(resent_types, types);

    // Finished verifies on both ends only if neither transcript took a message twice.
    deliver(&resent, &mut server);
    assert_eq!(server.state(), ServerState::Established);
    deliver(&final_flight, &mut server);
    let server_final = drain(&mut server).packets;
    deliver(&server_final, &mut client);
    assert_eq!(client.state(), HandshakeState::Established);

    let out = drain(&mut client);
    assert!(out.connected);
    assert!(out.packets.is_empty(), "an established client does not answer duplicates");
}

#[test]
fn exact_datagram_copies_are_replays() {
    let ids = identities();
    let now = Instant::now();
    let server_config = config(42).hello_verify_request(false).build().unwrap();
    let (mut client, mut server) = pair(&ids, config(43).build().unwrap(), server_config, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    let flight = drain(&mut server).packets;
    deliver(&flight, &mut client);
    let _final_flight = drain(&mut client);

    // Same record numbers: dropped by the replay window, nothing is resent.
    deliver(&flight, &mut client);
    assert!(drain(&mut client).packets.is_empty());
    assert_eq!(client.state(), HandshakeState::SentClientFinalFlight);
}

#[test]
fn server_answers_repeated_final_flight() {
    let ids = identities();
    let now = Instant::now();
    let (mut client, mut server) = pair(&ids, config(36).build().unwrap(), config(37).build().unwrap(), now);

    let mut sim_now = now;
    client.handle_timeout(sim_now).unwrap();
    loop {
        let c = drain(&mut client);
        deliver(&c.packets, &mut server);
        if server.state() == ServerState::Established {
            // The server's answer is lost, the client times out.
            let lost = drain(&mut server).packets;
            assert!(!lost.is_empty());
            sim_now = c.timeout.unwrap();
            break;
        }
        deliver(&drain(&mut server).packets, &mut client);
    }

    client.handle_timeout(sim_now).unwrap();
    let repeated = drain(&mut client).packets;
    assert!(!repeated.is_empty());
    deliver(&repeated, &mut server);

    let answer = drain(&mut server).packets;
    assert!(!answer.is_empty(), "server resends its final flight");
    deliver(&answer, &mut client);
    assert_eq!(client.state(), HandshakeState::Established);
}

#[test]
fn completes_with_thirty_percent_loss() {
    let _ = env_logger::try_init();
    let ids = identities();
    let now = Instant::now();

    let lossy = |seed| {
        config(seed)
            .flight_retries(8)
            .handshake_timeout(Duration::from_secs(600))
            .build()
            .unwrap()
    };
    let (client, server) = pair(&ids, lossy(38), lossy(39), now);

    let mut sim = Sim::new(client, server, now);
    let established = sim.run(|n| matches!(n % 10, 2 | 5 | 8), 500);

    assert!(established, "client {:?} server {:?}", sim.client, sim.server);
    assert!(sim.dropped > 0);
    assert_eq!(sim.client_out.keys, sim.server_out.keys);
    assert!(sim.client_out.keys.is_some());
}

#[test]
fn completes_with_reordered_flights() {
    let ids = identities();
    let now = Instant::now();
    let client_config = config(40).mtu(256).build().unwrap();
    let server_config = config(41).mtu(256).build().unwrap();
    let (mut client, mut server) = pair(&ids, client_config, server_config, now);

    client.handle_timeout(now).unwrap();
    for _ in 0..10 {
        let mut c = drain(&mut client).packets;
        c.reverse();
        deliver(&c, &mut server);
        let mut s = drain(&mut server).packets;
        s.reverse();
        deliver(&s, &mut client);
        if client.state() == HandshakeState::Established {
            break;
        }
    }
    assert_eq!(client.state(), HandshakeState::Established);
    assert_eq!(server.state(), ServerState::Established);
}
