//! DTLS 1.2 client handshake for real-time media.
//!
//! The crate runs the client side of a DTLS 1.2 handshake over UDP and ends
//! by exporting SRTP keying material (RFC 5764). Peers authenticate each
//! other by certificate fingerprint, as announced in an SDP offer/answer.
//!
//! The handshake engine is sans-IO. A [`Client`] is fed datagrams with
//! [`Client::handle_packet`] and the passage of time with
//! [`Client::handle_timeout`], and everything it wants to say comes out of
//! [`Client::poll_output`]. [`Connection`] drives a client over a
//! [`DatagramTransport`] until it is established or has failed, and
//! [`host::start_handshake`] runs that on a thread for an embedding host.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dtls_srtp::{CertificateVerifier, Config, Connection, Fingerprint, UdpTransport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(Config::builder().build()?);
//! let identity = dtls_srtp::generate_self_signed_certificate()?;
//! let peer: Fingerprint = "sha-256 AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:\
//!                          AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89"
//!     .parse()?;
//!
//! let transport = UdpTransport::connect(None, "192.0.2.10", 5004)?;
//! let verifier = CertificateVerifier::fingerprint(peer);
//! let mut connection = Connection::new(config, &identity, verifier, transport)?;
//!
//! let established = connection.connect()?;
//! if let Some(keys) = &established.keys {
//!     println!("SRTP profile {}", keys.profile);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The sans-IO loop looks like this:
//!
//! ```text
//! loop {
//!     match client.poll_output(&mut buf) {
//!         Output::Packet(p) => socket.send(p),
//!         Output::Timeout(t) => { wait for a datagram until t, then
//!                                 handle_packet if one came,
//!                                 handle_timeout(now) always }
//!         Output::PeerCert(c) => inspect certificate,
//!         Output::Connected => done,
//!         Output::KeyingMaterial(k) => hand keys to SRTP,
//!     }
//! }
//! ```
//!
//! `handle_packet` takes no clock. A flight it starts gets its retransmit
//! timer from the `now` of the following `handle_timeout`, so call that
//! before polling again.
#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

use std::fmt;
use std::time::Instant;

mod buffer;
mod engine;
mod event;
mod flight;
pub(crate) mod message;
mod record;
mod rng;
mod timer;
mod util;
mod window;

mod error;
pub use error::{Error, ErrorKind, HandshakeFailure};

mod config;
pub use config::{Config, ConfigBuilder};

mod client;
pub use client::{Client, HandshakeState};

mod server;
pub use server::{Server, ServerState};

pub mod crypto;
pub use crypto::{ExportedKeys, SrtpProfile};

pub use message::{CipherSuite, MessageType};

pub mod certificate;
pub use certificate::{CertificateOptions, DtlsCertificate, KeyAlgorithm};

#[cfg(feature = "rcgen")]
pub use certificate::{generate_certificate, generate_self_signed_certificate};

mod identity;
#[cfg(feature = "rcgen")]
pub use identity::SelfSignedIdentity;
pub use identity::IdentityProvider;

pub mod verifier;
pub use verifier::{CertificateVerifier, Fingerprint, Verdict};

mod transport;
pub use transport::{DatagramTransport, Received, UdpTransport};

mod connection;
pub use connection::{Connection, Established};

pub mod host;

/// Output from polling a [`Client`] or [`Server`].
pub enum Output<'a> {
    /// A datagram to send to the peer.
    Packet(&'a [u8]),
    /// Call `handle_timeout` at this instant unless a datagram arrives first.
    Timeout(Instant),
    /// The handshake completed.
    Connected,
    /// The peer's DER encoded leaf certificate.
    PeerCert(&'a [u8]),
    /// SRTP keys exported from the completed handshake.
    KeyingMaterial(ExportedKeys),
}

impl fmt::Debug for Output<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packet(v) => write!(f, "Packet({})", v.len()),
            Self::Timeout(v) => write!(f, "Timeout({:?})", v),
            Self::Connected => write!(f, "Connected"),
            Self::PeerCert(v) => write!(f, "PeerCert({})", v.len()),
            Self::KeyingMaterial(v) => write!(f, "KeyingMaterial({})", v.profile),
        }
    }
}
