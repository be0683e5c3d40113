//! DTLS 1.2 record layer.
//!
//! Frames and unframes records, keeps one write sequence counter per epoch,
//! protects records of epoch 1 with the negotiated AEAD and rejects replays
//! with one [`ReplayWindow`] per epoch.

use std::fmt;

use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::crypto::{Aad, Cipher, Iv, Nonce, DTLS_AEAD_OVERHEAD, DTLS_EXPLICIT_NONCE_LEN};
use crate::message::{ContentType, ProtocolVersion, Sequence};
use crate::rng::SeededRng;
use crate::util::be_u48;
use crate::window::ReplayWindow;
use crate::Error;

mod reassembly;

pub(crate) use reassembly::Reassembler;

const MAX_SEQUENCE_NUMBER: u64 = (1 << 48) - 1;

/// A parsed record, borrowing its fragment from the datagram.
#[derive(PartialEq, Eq)]
pub(crate) struct DTLSRecord<'a> {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    pub fragment: &'a [u8],
}

impl<'a> DTLSRecord<'a> {
    pub const HEADER_LEN: usize = 13;

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], DTLSRecord<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (input, fragment) = take(length as usize)(input)?;

        Ok((
            input,
            DTLSRecord {
                content_type,
                version,
                sequence: Sequence {
                    epoch,
                    sequence_number,
                },
                fragment,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        output.extend_from_slice(&self.sequence.sequence_number.to_be_bytes()[2..]);
        output.extend_from_slice(&(self.fragment.len() as u16).to_be_bytes());
        output.extend_from_slice(self.fragment);
    }
}

impl fmt::Debug for DTLSRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DTLSRecord")
            .field("content_type", &self.content_type)
            .field("sequence", &self.sequence)
            .field("length", &self.fragment.len())
            .finish()
    }
}

/// Append one DTLS 1.2 record carrying `payload` to `output`.
pub(crate) fn encode_record(
    content_type: ContentType,
    sequence: Sequence,
    payload: &[u8],
    output: &mut Buf,
) {
    DTLSRecord {
        content_type,
        version: ProtocolVersion::DTLS1_2,
        sequence,
        fragment: payload,
    }
    .serialize(output);
}

/// Split the first record off a datagram.
///
/// Fails on a truncated header, a declared length running past the end of
/// the datagram, or a version that is not DTLS.
pub(crate) fn decode_record(input: &[u8]) -> Result<(DTLSRecord<'_>, &[u8]), Error> {
    if input.len() < DTLSRecord::HEADER_LEN {
        return Err(Error::Decode(format!(
            "record header needs {} bytes, got {}",
            DTLSRecord::HEADER_LEN,
            input.len()
        )));
    }

    let declared = u16::from_be_bytes([input[11], input[12]]) as usize;
    if declared > input.len() - DTLSRecord::HEADER_LEN {
        return Err(Error::Decode(format!(
            "record length {} exceeds remaining {} bytes",
            declared,
            input.len() - DTLSRecord::HEADER_LEN
        )));
    }

    let (rest, record) = DTLSRecord::parse(input)?;

    if matches!(record.version, ProtocolVersion::Unknown(_)) {
        return Err(Error::Decode(format!(
            "record version {:04x}",
            record.version.as_u16()
        )));
    }

    Ok((record, rest))
}

struct DirectionKeys {
    cipher: Box<dyn Cipher>,
    iv: Iv,
}

/// What became of an incoming record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Opened {
    /// Fresh record of the current read epoch, plaintext in the output buffer.
    Fresh,
    /// Sequence number already seen, or too old for the replay window.
    Replayed,
    /// Authentication tag did not verify.
    BadTag,
    /// Record from an epoch we have left. Plaintext if that epoch was 0.
    Superseded,
    /// Record of the next epoch, arriving before its keys.
    Early,
    /// Record of an epoch we can never read.
    Unreadable,
}

pub(crate) struct RecordLayer {
    sequence_epoch_0: Sequence,
    sequence_epoch_n: Sequence,
    write: Option<DirectionKeys>,

    read_epoch: u16,
    read: Option<DirectionKeys>,
    pending_read: Option<DirectionKeys>,
    replay_epoch_0: ReplayWindow,
    replay_epoch_n: ReplayWindow,
}

impl RecordLayer {
    pub fn new() -> Self {
        RecordLayer {
            sequence_epoch_0: Sequence::new(0),
            sequence_epoch_n: Sequence::new(1),
            write: None,
            read_epoch: 0,
            read: None,
            pending_read: None,
            replay_epoch_0: ReplayWindow::new(),
            replay_epoch_n: ReplayWindow::new(),
        }
    }

    pub fn write_epoch(&self) -> u16 {
        if self.write.is_some() {
            1
        } else {
            0
        }
    }

    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    /// Extra bytes a record of `epoch` adds on top of its plaintext.
    pub fn overhead(epoch: u16) -> usize {
        if epoch == 0 {
            DTLSRecord::HEADER_LEN
        } else {
            DTLSRecord::HEADER_LEN + DTLS_AEAD_OVERHEAD
        }
    }

    /// Start protecting outgoing records of epoch 1.
    pub fn enable_write_encryption(&mut self, cipher: Box<dyn Cipher>, iv: Iv) {
        self.write = Some(DirectionKeys { cipher, iv });
    }

    /// Keys for the peer's epoch 1. They take effect with [`RecordLayer::enable_read_encryption`].
    pub fn set_pending_read_keys(&mut self, cipher: Box<dyn Cipher>, iv: Iv) {
        self.pending_read = Some(DirectionKeys { cipher, iv });
    }

    /// The peer's ChangeCipherSpec arrived. Returns false if we have no keys for it yet.
    pub fn enable_read_encryption(&mut self) -> bool {
        let Some(keys) = self.pending_read.take() else {
            return false;
        };
        self.read = Some(keys);
        self.read_epoch = 1;
        true
    }

    fn next_sequence(&mut self, epoch: u16) -> Result<Sequence, Error> {
        let seq = if epoch == 0 {
            &mut self.sequence_epoch_0
        } else {
            &mut self.sequence_epoch_n
        };
        if seq.sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(Error::Crypto(format!("sequence numbers exhausted for epoch {}", epoch)));
        }
        let current = *seq;
        seq.sequence_number += 1;
        Ok(current)
    }

    /// Frame `payload` as the next record of `epoch`, appending to `output`.
    ///
    /// Every call takes a new sequence number, also for retransmissions.
    pub fn seal(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        payload: &[u8],
        rng: &mut SeededRng,
        output: &mut Buf,
    ) -> Result<(), Error> {
        if epoch > 0 && self.write.is_none() {
            return Err(Error::Crypto(format!("no write keys for epoch {}", epoch)));
        }
        let sequence = self.next_sequence(epoch)?;

        let Some(keys) = self.write.as_mut().filter(|_| epoch > 0) else {
            encode_record(content_type, sequence, payload, output);
            return Ok(());
        };

        let mut explicit_nonce = [0u8; DTLS_EXPLICIT_NONCE_LEN];
        rng.fill(&mut explicit_nonce);
        let nonce = Nonce::new(keys.iv, &explicit_nonce);
        let aad = Aad::new(content_type, sequence, payload.len() as u16);

        let mut body = Buf::new();
        body.extend_from_slice(payload);
        keys.cipher
            .encrypt(&mut body, aad, nonce)
            .map_err(Error::Crypto)?;

        let mut fragment = Buf::new();
        fragment.extend_from_slice(&explicit_nonce);
        fragment.extend_from_slice(&body);
        encode_record(content_type, sequence, &fragment, output);
        Ok(())
    }

    /// Unprotect an incoming record into `output`.
    ///
    /// Authentication comes before the replay check, so a forged record can
    /// not burn a sequence number.
    pub fn open(&mut self, record: &DTLSRecord, output: &mut Buf) -> Opened {
        output.clear();
        let epoch = record.sequence.epoch;

        if epoch < self.read_epoch {
            if epoch == 0 {
                output.extend_from_slice(record.fragment);
            }
            return Opened::Superseded;
        }
        if epoch > self.read_epoch {
            return if epoch == self.read_epoch + 1 {
                Opened::Early
            } else {
                Opened::Unreadable
            };
        }

        if epoch == 0 {
            output.extend_from_slice(record.fragment);
            return if self.replay_epoch_0.check_and_update(record.sequence.sequence_number) {
                Opened::Fresh
            } else {
                Opened::Replayed
            };
        }

        let Some(keys) = self.read.as_mut() else {
            return Opened::Unreadable;
        };

        if record.fragment.len() < DTLS_AEAD_OVERHEAD {
            return Opened::BadTag;
        }
        let (explicit, ciphertext) = record.fragment.split_at(DTLS_EXPLICIT_NONCE_LEN);
        let mut explicit_nonce = [0u8; DTLS_EXPLICIT_NONCE_LEN];
        explicit_nonce.copy_from_slice(explicit);
        let nonce = Nonce::new(keys.iv, &explicit_nonce);
        let plaintext_len = ciphertext.len() - (DTLS_AEAD_OVERHEAD - DTLS_EXPLICIT_NONCE_LEN);
        let aad = Aad::new(record.content_type, record.sequence, plaintext_len as u16);

        output.extend_from_slice(ciphertext);
        if keys.cipher.decrypt(output, aad, nonce).is_err() {
            output.clear();
            return Opened::BadTag;
        }

        if self.replay_epoch_n.check_and_update(record.sequence.sequence_number) {
            Opened::Fresh
        } else {
            output.clear();
            Opened::Replayed
        }
    }
}

impl fmt::Debug for RecordLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordLayer")
            .field("sequence_epoch_0", &self.sequence_epoch_0)
            .field("sequence_epoch_n", &self.sequence_epoch_n)
            .field("write_epoch", &self.write_epoch())
            .field("read_epoch", &self.read_epoch)
            .finish()
    }
}
