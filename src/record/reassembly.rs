use std::collections::BTreeMap;

use crate::buffer::Buf;
use crate::message::{Header, MessageType};
use crate::Error;

/// How far ahead of the next expected message_seq we buffer.
const MAX_AHEAD: u16 = 16;

/// Collects handshake fragments and hands out whole messages in message_seq order.
#[derive(Debug)]
pub(crate) struct Reassembler {
    next_seq: u16,
    max_fragments: usize,
    buffered: usize,
    pending: BTreeMap<u16, Partial>,
}

#[derive(Debug)]
struct Partial {
    msg_type: MessageType,
    length: u32,
    /// Fragments keyed by offset.
    fragments: BTreeMap<u32, Buf>,
}

impl Partial {
    fn is_complete(&self) -> bool {
        let mut covered = 0;
        for (offset, data) in &self.fragments {
            if *offset > covered {
                return false;
            }
            covered = covered.max(offset + data.len() as u32);
        }
        !self.fragments.is_empty() && covered >= self.length
    }

    fn assemble(self) -> Buf {
        let mut body = Buf::new();
        body.resize(self.length as usize, 0);
        for (offset, data) in self.fragments {
            let start = offset as usize;
            body[start..start + data.len()].copy_from_slice(&data);
        }
        body
    }

    /// Check a new fragment against the bytes we already hold for the same range.
    fn conflicts(&self, offset: u32, data: &[u8]) -> bool {
        let end = offset + data.len() as u32;
        self.fragments.iter().any(|(o, d)| {
            let o_end = o + d.len() as u32;
            let from = offset.max(*o);
            let to = end.min(o_end);
            if from >= to {
                return false;
            }
            let ours = &d[(from - o) as usize..(to - o) as usize];
            let theirs = &data[(from - offset) as usize..(to - offset) as usize];
            ours != theirs
        })
    }
}

impl Reassembler {
    pub fn new(max_fragments: usize) -> Self {
        Reassembler {
            next_seq: 0,
            max_fragments,
            buffered: 0,
            pending: BTreeMap::new(),
        }
    }

    /// The message_seq of the next message we hand out.
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Buffer one fragment.
    ///
    /// Returns `Ok(false)` when the fragment is not kept: stale, too far ahead,
    /// or over the buffering limit. Fragments that disagree with buffered bytes
    /// for the same range, or with the message's type and length, are an error.
    pub fn push(&mut self, header: &Header, data: &[u8]) -> Result<bool, Error> {
        if data.len() as u32 != header.fragment_length {
            return Err(Error::Decode(format!(
                "fragment length {} but {} bytes",
                header.fragment_length,
                data.len()
            )));
        }
        if header.fragment_offset + header.fragment_length > header.length {
            return Err(Error::Decode(format!(
                "fragment {}+{} beyond message length {}",
                header.fragment_offset, header.fragment_length, header.length
            )));
        }

        if header.message_seq < self.next_seq
            || header.message_seq >= self.next_seq.saturating_add(MAX_AHEAD)
        {
            return Ok(false);
        }

        let partial = self.pending.entry(header.message_seq).or_insert(Partial {
            msg_type: header.msg_type,
            length: header.length,
            fragments: BTreeMap::new(),
        });

        if partial.msg_type != header.msg_type || partial.length != header.length {
            return Err(Error::Decode(format!(
                "message_seq {} is {:?}/{} but fragment says {:?}/{}",
                header.message_seq,
                partial.msg_type,
                partial.length,
                header.msg_type,
                header.length
            )));
        }

        if partial.conflicts(header.fragment_offset, data) {
            warn!(
                "Conflicting bytes for {:?} message_seq {} at offset {}",
                header.msg_type, header.message_seq, header.fragment_offset
            );
            return Err(Error::Decode(format!(
                "conflicting overlapping fragment for message_seq {}",
                header.message_seq
            )));
        }

        if let Some(existing) = partial.fragments.get(&header.fragment_offset) {
            if existing.len() >= data.len() {
                // Already covered.
                return Ok(true);
            }
        } else if self.buffered >= self.max_fragments {
            trace!("Fragment buffer full, dropping {:?}", header);
            return Ok(false);
        } else {
            self.buffered += 1;
        }

        let mut fragment = Buf::new();
        fragment.extend_from_slice(data);
        partial.fragments.insert(header.fragment_offset, fragment);
        Ok(true)
    }

    /// Take the next message if all its bytes have arrived.
    ///
    /// The returned header describes the whole, unfragmented message.
    pub fn pop(&mut self) -> Option<(Header, Buf)> {
        if !self.pending.get(&self.next_seq)?.is_complete() {
            return None;
        }
        let partial = self.pending.remove(&self.next_seq)?;
        self.buffered -= partial.fragments.len();

        let header = Header::whole(partial.msg_type, partial.length, self.next_seq);
        self.next_seq += 1;
        Some((header, partial.assemble()))
    }
}
