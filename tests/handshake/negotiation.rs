//! SRTP profile negotiation as seen by the client.

use std::time::Instant;

use dtls_srtp::{ErrorKind, HandshakeState, MessageType, SrtpProfile};

use crate::common::*;

fn profile_id(profile: SrtpProfile) -> u16 {
    match profile {
        SrtpProfile::Aes128CmSha1_80 => 0x0001,
        SrtpProfile::AeadAes128Gcm => 0x0007,
        SrtpProfile::AeadAes256Gcm => 0x0008,
    }
}

/// Run to the server's ServerHello flight, rewrite its SRTP answer to
/// `answer` and hand it to the client.
fn client_sees_answer(ids: &Identities, offered: &[SrtpProfile], answer: u16) -> HandshakeState {
    let now = Instant::now();
    let client_config = config(10).srtp_profiles(offered).build().unwrap();
    let server_config = config(11).hello_verify_request(false).build().unwrap();
    let (mut client, mut server) = pair(ids, client_config, server_config, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);

    let mut flight = drain(&mut server).packets;
    let patched = flight
        .iter_mut()
        .any(|p| patch_server_hello_profile(p, answer));
    assert!(patched, "ServerHello carries use_srtp");

    deliver(&flight, &mut client);
    client.state()
}

#[test]
fn accepts_exactly_the_offered_profiles() {
    let _ = env_logger::try_init();
    let ids = identities();

    let offers: [&[SrtpProfile]; 4] = [
        &[SrtpProfile::AeadAes128Gcm],
        &[SrtpProfile::Aes128CmSha1_80, SrtpProfile::AeadAes256Gcm],
        &[SrtpProfile::AeadAes256Gcm, SrtpProfile::AeadAes128Gcm],
        SrtpProfile::ALL,
    ];

    for offered in offers {
        for answer in SrtpProfile::ALL {
            let state = client_sees_answer(&ids, offered, profile_id(*answer));
            if offered.contains(answer) {
                assert_eq!(
                    state,
                    HandshakeState::SentClientFinalFlight,
                    "{:?} answered with {:?}",
                    offered,
                    answer
                );
            } else {
                assert_eq!(state, HandshakeState::Failed, "{:?} answered with {:?}", offered, answer);
            }
        }
    }
}

#[test]
fn unknown_profile_is_negotiation_mismatch() {
    let ids = identities();
    let now = Instant::now();
    let client_config = config(12).build().unwrap();
    let server_config = config(13).hello_verify_request(false).build().unwrap();
    let (mut client, mut server) = pair(&ids, client_config, server_config, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    let mut flight = drain(&mut server).packets;
    assert!(flight.iter_mut().any(|p| patch_server_hello_profile(p, 0x0005)));

    let err = flight
        .iter()
        .map(|p| client.handle_packet(p))
        .find_map(Result::err)
        .expect("client rejects the ServerHello");
    assert_eq!(err.kind(), ErrorKind::NegotiationMismatch);

    let failure = client.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::NegotiationMismatch);
    assert_eq!(failure.state, HandshakeState::SentClientHello1);
    assert_eq!(failure.expected, Some(MessageType::ServerHello));
}

#[test]
fn server_follows_its_own_preference_among_offered() {
    let ids = identities();
    let now = Instant::now();
    let client_config = config(14)
        .srtp_profile_list("SRTP_AES128_CM_SHA1_80:SRTP_AEAD_AES_128_GCM")
        .unwrap()
        .build()
        .unwrap();
    let server_config = config(15).build().unwrap();
    let (client, server) = pair(&ids, client_config, server_config, now);

    let mut sim = Sim::new(client, server, now);
    assert!(sim.run(|_| false, 100));
    assert_eq!(sim.client.srtp_profile(), Some(SrtpProfile::AeadAes128Gcm));
    assert_eq!(sim.server.srtp_profile(), Some(SrtpProfile::AeadAes128Gcm));

    let keys = sim.client_out.keys.as_ref().unwrap();
    assert_eq!(keys.profile, SrtpProfile::AeadAes128Gcm);
    assert_eq!(keys.client_write_key.len(), 16);
    assert_eq!(keys.client_write_salt.len(), 12);
}

#[test]
fn no_common_profile_fails_the_client() {
    let ids = identities();
    let now = Instant::now();
    let client_config = config(16)
        .srtp_profiles(&[SrtpProfile::Aes128CmSha1_80])
        .build()
        .unwrap();
    let server_config = config(17)
        .srtp_profiles(&[SrtpProfile::AeadAes128Gcm])
        .build()
        .unwrap();
    let (client, server) = pair(&ids, client_config, server_config, now);

    // The server answers without use_srtp, which the client does not accept.
    let mut sim = Sim::new(client, server, now);
    assert!(!sim.run(|_| false, 100));
    let failure = sim.client.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::NegotiationMismatch);
}

#[test]
fn cipher_suite_not_offered_is_negotiation_mismatch() {
    let ids = identities();
    let now = Instant::now();
    let client_config = config(18).build().unwrap();
    let server_config = config(19).hello_verify_request(false).build().unwrap();
    let (mut client, mut server) = pair(&ids, client_config, server_config, now);

    client.handle_timeout(now).unwrap();
    deliver(&drain(&mut client).packets, &mut server);
    let mut flight = drain(&mut server).packets;

    // TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
    assert!(flight.iter_mut().any(|p| patch_server_hello_suite(p, 0xC030)));

    let err = flight
        .iter()
        .map(|p| client.handle_packet(p))
        .find_map(Result::err)
        .expect("client rejects the ServerHello");
    assert_eq!(err.kind(), ErrorKind::NegotiationMismatch);

    let failure = client.failure().unwrap();
    assert_eq!(failure.state, HandshakeState::SentClientHello1);
    assert_eq!(failure.expected, Some(MessageType::ServerHello));
    assert!(failure.reason.contains("0xC030"), "{}", failure.reason);
    assert_eq!(client.cipher_suite(), None);

    // handshake_failure goes back to the server.
    let out = drain(&mut client);
    assert_eq!(out.packets.len(), 1);
    let r = parse_records(&out.packets[0])[0];
    assert_eq!(r.ctype, CONTENT_ALERT);
    assert_eq!(&out.packets[0][r.body..r.body + r.len], &[2, 40]);
}
