use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::{Buf, BufferPool};
use crate::crypto::{Cipher, ExportedKeys, Iv};
use crate::event::LocalEvent;
use crate::flight::{Entry, Flight, FlightEvent, Timeout};
use crate::message::{Alert, ContentType, HashAlgorithm, Header, MessageType};
use crate::record::{decode_record, DTLSRecord, Opened, Reassembler, RecordLayer};
use crate::rng::SeededRng;
use crate::{Config, Error, Output};

/// Records of the next epoch held back until the peer's keys are known.
const MAX_EARLY_RECORDS: usize = 8;

/// The machinery shared by client and server: record layer, reassembly,
/// flights, transcript and the outgoing datagram queue.
pub(crate) struct Engine {
    config: Arc<Config>,

    /// Seedable random number generator for deterministic testing
    pub(crate) rng: SeededRng,

    /// Pool of buffers
    buffers_free: BufferPool,

    records: RecordLayer,

    reassembler: Reassembler,

    flight: Flight,

    /// Queue of outgoing datagrams.
    queue_tx: VecDeque<Buf>,

    /// Epoch 1 records that arrived before we could read them.
    early: Vec<Buf>,

    /// The peer sent ChangeCipherSpec before we had its keys.
    peer_ccs_seen: bool,

    /// Next handshake message sequence number for sending
    next_handshake_seq_no: u16,

    /// Every handshake message of this attempt, in order, as it counts for
    /// Finished and CertificateVerify.
    transcript: Buf,

    /// Global timeout for the entire handshake.
    connect_timeout: Timeout,

    /// Events for the application, delivered after all packets.
    events: VecDeque<LocalEvent>,

    /// Leaf certificate of the peer.
    peer_certificate: Option<Vec<u8>>,

    /// Last time we were told about.
    now: Instant,
}

impl Engine {
    pub fn new(config: Arc<Config>, now: Instant) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());
        let flight = Flight::new(&config, &mut rng);
        let reassembler = Reassembler::new(config.max_queue_rx());
        let connect_timeout = Timeout::Armed(now + config.handshake_timeout());

        Engine {
            config,
            rng,
            buffers_free: BufferPool::default(),
            records: RecordLayer::new(),
            reassembler,
            flight,
            queue_tx: VecDeque::new(),
            early: Vec::new(),
            peer_ccs_seen: false,
            next_handshake_seq_no: 0,
            transcript: Buf::new(),
            connect_timeout,
            events: VecDeque::new(),
            peer_certificate: None,
            now,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse and absorb one incoming datagram.
    pub fn handle_datagram(&mut self, packet: &[u8]) -> Result<(), Error> {
        self.flight.new_datagram();

        let mut rest = packet;
        while !rest.is_empty() {
            let (record, next) = decode_record(rest)?;
            rest = next;
            self.handle_record(&record)?;
        }
        Ok(())
    }

    fn handle_record(&mut self, record: &DTLSRecord) -> Result<(), Error> {
        let mut plaintext = self.buffers_free.pop();

        let result = match self.records.open(record, &mut plaintext) {
            Opened::Fresh => self.handle_plaintext(record.content_type, &plaintext),
            Opened::Replayed => {
                trace!("Drop replayed record {}", record.sequence);
                Ok(())
            }
            Opened::BadTag => {
                warn!("Drop record {} failing authentication", record.sequence);
                Ok(())
            }
            Opened::Superseded => self.handle_superseded(record.content_type, &plaintext),
            Opened::Early => {
                self.stash_early(record);
                Ok(())
            }
            Opened::Unreadable => {
                trace!("Drop record of unreadable epoch {}", record.sequence);
                Ok(())
            }
        };

        self.buffers_free.push(plaintext);
        result
    }

    fn handle_plaintext(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        match content_type {
            ContentType::Handshake => self.handle_handshake_fragments(payload),

            ContentType::ChangeCipherSpec => {
                if payload != [1] {
                    return Err(Error::Decode(format!(
                        "ChangeCipherSpec body {:02x?}",
                        payload
                    )));
                }
                self.peer_ccs_seen = true;
                self.maybe_enable_peer_encryption()
            }

            ContentType::Alert => {
                let (_, alert) = Alert::parse(payload)?;
                if alert.is_terminal() {
                    warn!("Received alert {:?}", alert);
                    return Err(Error::AlertReceived(
                        alert.level.as_u8(),
                        alert.description,
                    ));
                }
                debug!("Ignore warning alert {}", alert.description);
                Ok(())
            }

            ContentType::ApplicationData => {
                trace!("Drop {} bytes of application data", payload.len());
                Ok(())
            }

            ContentType::Unknown(v) => {
                trace!("Drop record of unknown content type {}", v);
                Ok(())
            }
        }
    }

    fn handle_handshake_fragments(&mut self, mut input: &[u8]) -> Result<(), Error> {
        while !input.is_empty() {
            let (rest, header) = Header::parse(input)?;
            let len = header.fragment_length as usize;
            if rest.len() < len {
                return Err(Error::Decode(format!(
                    "{:?} fragment of {} bytes truncated to {}",
                    header.msg_type,
                    len,
                    rest.len()
                )));
            }
            let (body, rest) = rest.split_at(len);
            input = rest;

            match self
                .flight
                .on_message_received(&header, self.reassembler.next_seq())
            {
                FlightEvent::Stale { resend } => {
                    trace!("Stale {:?} seq {}", header.msg_type, header.message_seq);
                    if resend {
                        self.flight_resend("peer repeated its flight")?;
                    }
                }
                FlightEvent::Expected | FlightEvent::Future => {
                    self.reassembler.push(&header, body)?;
                }
            }
        }
        Ok(())
    }

    /// A record from the epoch before the current one. Its only use is to
    /// tell us the peer missed our flight.
    fn handle_superseded(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        if content_type != ContentType::Handshake {
            return Ok(());
        }

        let mut input = payload;
        while let Ok((rest, header)) = Header::parse(input) {
            let len = (header.fragment_length as usize).min(rest.len());
            input = &rest[len..];

            let event = self
                .flight
                .on_message_received(&header, self.reassembler.next_seq());
            if event == (FlightEvent::Stale { resend: true }) {
                self.flight_resend("peer repeated a flight of an old epoch")?;
            }
        }
        Ok(())
    }

    fn stash_early(&mut self, record: &DTLSRecord) {
        if self.early.len() >= MAX_EARLY_RECORDS {
            trace!("Drop early record {}, stash full", record.sequence);
            return;
        }
        trace!("Stash early record {}", record.sequence);
        let mut raw = self.buffers_free.pop();
        record.serialize(&mut raw);
        self.early.push(raw);
    }

    /// Keys for reading the peer's epoch 1, effective once its
    /// ChangeCipherSpec is seen.
    pub fn set_peer_keys(&mut self, cipher: Box<dyn Cipher>, iv: Iv) -> Result<(), Error> {
        self.records.set_pending_read_keys(cipher, iv);
        self.maybe_enable_peer_encryption()
    }

    fn maybe_enable_peer_encryption(&mut self) -> Result<(), Error> {
        if !self.peer_ccs_seen || !self.records.enable_read_encryption() {
            if self.peer_ccs_seen {
                debug!("ChangeCipherSpec before peer keys, waiting");
            }
            return Ok(());
        }
        debug!("Peer encryption enabled");

        for raw in std::mem::take(&mut self.early) {
            let (record, _) = decode_record(&raw)?;
            self.handle_record(&record)?;
            self.buffers_free.push(raw);
        }
        Ok(())
    }

    pub fn is_peer_encryption_enabled(&self) -> bool {
        self.records.read_epoch() > 0
    }

    /// Start protecting our records of epoch 1.
    pub fn enable_encryption(&mut self, cipher: Box<dyn Cipher>, iv: Iv) {
        debug!("Own encryption enabled");
        self.records.enable_write_encryption(cipher, iv);
    }

    /// Next complete handshake message, in message_seq order.
    pub fn next_message(&mut self) -> Option<(Header, Buf)> {
        self.reassembler.pop()
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.now = now;

        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::TimeoutExceeded(format!(
                    "handshake not done within {:?}",
                    self.config.handshake_timeout()
                )));
            }
        }

        if self.flight.on_timeout(now, &mut self.rng)? {
            self.flight_resend("flight timeout")?;
        }

        Ok(())
    }

    /// Packets first, then events, and a timeout when there is nothing else.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        if let Some(len) = self.poll_packet(buf) {
            return Output::Packet(&buf[..len]);
        }

        while let Some(event) = self.events.pop_front() {
            let cert_len = self.peer_certificate.as_ref().map(|c| c.len()).unwrap_or(0);
            if matches!(event, LocalEvent::PeerCert) && cert_len > buf.len() {
                warn!("Output buffer too small for peer certificate {} > {}", cert_len, buf.len());
                continue;
            }
            return event.into_output(buf, self.peer_certificate.as_deref());
        }

        Output::Timeout(self.poll_timeout())
    }

    /// Copy the next outgoing datagram into `buf`, returning its length.
    fn poll_packet(&mut self, buf: &mut [u8]) -> Option<usize> {
        while let Some(p) = self.queue_tx.pop_front() {
            let len = p.len();
            if len > buf.len() {
                warn!("Output buffer too small for packet {} > {}", len, buf.len());
                self.buffers_free.push(p);
                continue;
            }
            buf[..len].copy_from_slice(&p);
            self.buffers_free.push(p);
            return Some(len);
        }
        None
    }

    pub fn push_peer_cert(&mut self, certificate: Vec<u8>) {
        self.peer_certificate = Some(certificate);
        self.events.push_back(LocalEvent::PeerCert);
    }

    pub fn push_connected(&mut self) {
        self.events.push_back(LocalEvent::Connected);
    }

    pub fn push_keying_material(&mut self, keys: ExportedKeys) {
        self.events.push_back(LocalEvent::KeyingMaterial(keys));
    }

    pub fn poll_timeout(&mut self) -> Instant {
        let flight = self.flight.poll_timeout(self.now);
        let connect = match self.connect_timeout {
            Timeout::Armed(c) => Some(c),
            _ => None,
        };

        match (connect, flight) {
            (Some(c), Some(f)) => c.min(f),
            (Some(t), None) | (None, Some(t)) => t,
            (None, None) => {
                const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
                self.now + DISTANT_FUTURE
            }
        }
    }

    /// Start a new outgoing flight, dropping the previous one.
    pub fn flight_begin(&mut self, with_timer: bool) {
        self.flight.begin(with_timer, &mut self.rng);
    }

    /// The handshake is complete. The server keeps answering duplicates of
    /// the client's last flight, the client does not.
    pub fn flight_finish(&mut self, resend_on_dupe: bool) {
        debug!("Stop connect and flight timeouts");
        self.connect_timeout = Timeout::Disabled;
        self.flight.finish(resend_on_dupe);
    }

    /// Drop all pending output and stop all timers.
    pub fn abort(&mut self) {
        self.connect_timeout = Timeout::Disabled;
        self.flight.clear();
        self.events.clear();
        while let Some(p) = self.queue_tx.pop_front() {
            self.buffers_free.push(p);
        }
    }

    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        debug!("Resending flight {} due to {}", self.flight.number(), reason);
        let saved = self.flight.take_saved();

        let mut result = Ok(());
        for entry in &saved {
            result = if entry.content_type == ContentType::Handshake {
                self.send_handshake(&entry.fragment, entry.epoch)
            } else {
                self.create_record(entry.content_type, entry.epoch, &entry.fragment)
            };
            if result.is_err() {
                break;
            }
        }

        self.flight.restore(saved);
        result
    }

    /// Frame `payload` as one record, packing it into the last queued
    /// datagram when it fits the MTU.
    fn create_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        payload: &[u8],
    ) -> Result<(), Error> {
        let record_wire_len = RecordLayer::overhead(epoch) + payload.len();

        let can_append = self
            .queue_tx
            .back()
            .map(|b| b.len() + record_wire_len <= self.config.mtu())
            .unwrap_or(false);

        if !can_append && self.queue_tx.len() >= self.config.max_queue_tx() {
            warn!("Transmit queue full (max {})", self.config.max_queue_tx());
            return Err(Error::TransmitQueueFull);
        }

        if let Some(last) = self.queue_tx.back_mut().filter(|_| can_append) {
            return self
                .records
                .seal(content_type, epoch, payload, &mut self.rng, last);
        }

        let mut datagram = self.buffers_free.pop();
        self.records
            .seal(content_type, epoch, payload, &mut self.rng, &mut datagram)?;
        self.queue_tx.push_back(datagram);
        Ok(())
    }

    /// Send a ChangeCipherSpec as part of the current flight.
    pub fn create_change_cipher_spec(&mut self) -> Result<(), Error> {
        let mut fragment = self.buffers_free.pop();
        fragment.push(1);
        self.create_record(ContentType::ChangeCipherSpec, 0, &fragment)?;
        self.flight.save(Entry {
            content_type: ContentType::ChangeCipherSpec,
            epoch: 0,
            fragment,
        });
        Ok(())
    }

    /// Create a handshake message, add it to the transcript and the current
    /// flight, and send it fragmented to the MTU.
    pub fn create_handshake<F>(&mut self, msg_type: MessageType, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Buf, &mut Self) -> Result<(), Error>,
    {
        let mut body = self.buffers_free.pop();
        f(&mut body, self)?;

        let header = Header::whole(msg_type, body.len() as u32, self.next_handshake_seq_no);
        self.next_handshake_seq_no += 1;

        let mut full = self.buffers_free.pop();
        header.serialize(&mut full);
        full.extend_from_slice(&body);
        self.buffers_free.push(body);

        // A stateless HelloVerifyRequest is never part of the transcript.
        if msg_type != MessageType::HelloVerifyRequest {
            self.transcript.extend_from_slice(&full);
        }

        let epoch = msg_type.epoch();
        self.send_handshake(&full, epoch)?;
        self.flight.save(Entry {
            content_type: ContentType::Handshake,
            epoch,
            fragment: full,
        });
        Ok(())
    }

    /// Fragment a whole handshake message (header included) into records.
    fn send_handshake(&mut self, full: &[u8], epoch: u16) -> Result<(), Error> {
        let (body, header) = Header::parse(full)?;
        let total_len = body.len();
        let fixed_overhead = RecordLayer::overhead(epoch) + Header::LEN;
        let mut offset = 0;

        // At least one record, also for an empty body.
        loop {
            let used = self.queue_tx.back().map(|b| b.len()).unwrap_or(0);
            let available_in_current = self.config.mtu().saturating_sub(used);
            let available_for_body = if available_in_current > fixed_overhead {
                available_in_current - fixed_overhead
            } else {
                self.config.mtu().saturating_sub(fixed_overhead).max(1)
            };

            let chunk_len = (total_len - offset).min(available_for_body);

            let fragment_header = Header {
                fragment_offset: offset as u32,
                fragment_length: chunk_len as u32,
                ..header
            };
            let mut fragment = self.buffers_free.pop();
            fragment_header.serialize(&mut fragment);
            fragment.extend_from_slice(&body[offset..offset + chunk_len]);

            let result = self.create_record(ContentType::Handshake, epoch, &fragment);
            self.buffers_free.push(fragment);
            result?;

            offset += chunk_len;
            if offset >= total_len {
                break;
            }
        }
        Ok(())
    }

    /// Send a fatal alert outside of any flight, replacing queued output.
    pub fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        while let Some(p) = self.queue_tx.pop_front() {
            self.buffers_free.push(p);
        }
        let mut body = self.buffers_free.pop();
        alert.serialize(&mut body);
        let epoch = self.records.write_epoch();
        let result = self.create_record(ContentType::Alert, epoch, &body);
        self.buffers_free.push(body);
        result
    }

    /// Pin the message_seq of the next handshake we create.
    pub fn set_next_handshake_seq(&mut self, seq: u16) {
        self.next_handshake_seq_no = seq;
    }

    pub fn transcript_push(&mut self, header: &Header, body: &[u8]) {
        header.serialize(&mut self.transcript);
        self.transcript.extend_from_slice(body);
    }

    /// Forget the transcript. The handshake restarts after a HelloVerifyRequest.
    pub fn transcript_reset(&mut self) {
        self.transcript.clear();
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    pub fn transcript_hash(&self, algorithm: HashAlgorithm) -> Result<Buf, Error> {
        let mut hash = self
            .config
            .crypto_provider()
            .hash_provider
            .create_hash(algorithm)
            .map_err(Error::Crypto)?;
        hash.update(&self.transcript);
        let mut out = Buf::new();
        hash.clone_and_finalize(&mut out);
        Ok(out)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("records", &self.records)
            .field("flight", &self.flight.number())
            .field("queue_tx", &self.queue_tx.len())
            .field("early", &self.early.len())
            .field("transcript", &self.transcript.len())
            .finish()
    }
}
