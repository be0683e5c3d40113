//! Events the handshake queues for delivery via `poll_output`.

use crate::crypto::ExportedKeys;
use crate::Output;

#[derive(Debug)]
pub(crate) enum LocalEvent {
    /// Peer certificate is available for inspection.
    PeerCert,
    /// Handshake completed.
    Connected,
    /// SRTP keys exported from the completed handshake.
    KeyingMaterial(ExportedKeys),
}

impl LocalEvent {
    /// Convert into an `Output`, copying the peer certificate into `buf`.
    ///
    /// The caller checks that `buf` is large enough for the certificate.
    pub(crate) fn into_output<'a>(self, buf: &'a mut [u8], peer_cert: Option<&[u8]>) -> Output<'a> {
        match self {
            LocalEvent::PeerCert => {
                let cert = peer_cert.unwrap_or_default();
                let l = cert.len().min(buf.len());
                buf[..l].copy_from_slice(&cert[..l]);
                Output::PeerCert(&buf[..l])
            }
            LocalEvent::Connected => Output::Connected,
            LocalEvent::KeyingMaterial(keys) => Output::KeyingMaterial(keys),
        }
    }
}
