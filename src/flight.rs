//! Flights and their retransmission.
//!
//! A flight is the group of records one side sends before waiting for the
//! other. The whole flight is kept until the handshake moves past it, and is
//! resent when its timer fires or when a copy of the peer's previous flight
//! shows the peer missed it.

use std::time::Instant;

use crate::buffer::Buf;
use crate::message::{ContentType, Header};
use crate::rng::SeededRng;
use crate::timer::ExponentialBackoff;
use crate::{Config, Error};

/// One record of the current flight, before record protection.
#[derive(Debug)]
pub(crate) struct Entry {
    pub content_type: ContentType,
    pub epoch: u16,
    /// A whole handshake message with its header, or a record body.
    pub fragment: Buf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timeout {
    Disabled,
    /// Armed on the next poll, counting from that moment.
    Unarmed,
    Armed(Instant),
}

/// Classification of an incoming handshake fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlightEvent {
    /// Part of the next message we expect.
    Expected,
    /// A message we already handled. `resend` asks for our flight to go out again.
    Stale { resend: bool },
    /// A later message, arriving ahead of the one we expect.
    Future,
}

#[derive(Debug)]
pub(crate) struct Flight {
    saved: Vec<Entry>,
    backoff: ExponentialBackoff,
    timeout: Timeout,
    resend_on_dupe: bool,
    resent_in_datagram: bool,
    number: usize,
}

impl Flight {
    pub fn new(config: &Config, rng: &mut SeededRng) -> Self {
        Flight {
            saved: Vec::new(),
            backoff: ExponentialBackoff::new(
                config.flight_start_rto(),
                config.flight_max_rto(),
                config.flight_retries(),
                config.flight_jitter(),
                rng,
            ),
            timeout: Timeout::Disabled,
            resend_on_dupe: false,
            resent_in_datagram: false,
            number: 0,
        }
    }

    /// Replace the current flight with a new, empty one.
    ///
    /// A flight with a timer is retransmitted until answered. Without one it
    /// only goes out again when the peer repeats itself.
    pub fn begin(&mut self, with_timer: bool, rng: &mut SeededRng) {
        self.number += 1;
        debug!("Begin flight {}", self.number);
        self.saved.clear();
        self.backoff.reset(rng);
        self.timeout = if with_timer {
            Timeout::Unarmed
        } else {
            Timeout::Disabled
        };
        self.resend_on_dupe = true;
    }

    /// The handshake is over for this side. No timer, and for the client no
    /// more answering of duplicates.
    pub fn finish(&mut self, resend_on_dupe: bool) {
        self.timeout = Timeout::Disabled;
        self.resend_on_dupe = resend_on_dupe;
    }

    /// Stop everything, the attempt has failed.
    pub fn clear(&mut self) {
        self.saved.clear();
        self.timeout = Timeout::Disabled;
        self.resend_on_dupe = false;
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn save(&mut self, entry: Entry) {
        self.saved.push(entry);
    }

    /// Take the saved records out for a resend. Hand them back with [`Flight::restore`].
    pub fn take_saved(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.saved)
    }

    pub fn restore(&mut self, saved: Vec<Entry>) {
        self.saved = saved;
    }

    /// Called at the start of every incoming datagram.
    pub fn new_datagram(&mut self) {
        self.resent_in_datagram = false;
    }

    /// When the timer fires next, arming it from `now` if needed.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<Instant> {
        match self.timeout {
            Timeout::Disabled => None,
            Timeout::Unarmed => {
                let at = now + self.backoff.rto();
                self.timeout = Timeout::Armed(at);
                Some(at)
            }
            Timeout::Armed(at) => Some(at),
        }
    }

    /// Advance the timer. `Ok(true)` means the flight should be resent now.
    ///
    /// Fails with [`Error::TimeoutExceeded`] when the timer fires with no
    /// retries left.
    pub fn on_timeout(&mut self, now: Instant, rng: &mut SeededRng) -> Result<bool, Error> {
        let at = match self.timeout {
            Timeout::Disabled => return Ok(false),
            Timeout::Unarmed => {
                self.poll_timeout(now);
                return Ok(false);
            }
            Timeout::Armed(at) => at,
        };
        if now < at {
            return Ok(false);
        }

        if !self.backoff.can_retry() {
            return Err(Error::TimeoutExceeded(format!(
                "flight {} unanswered after {} retransmissions",
                self.number,
                self.backoff.retries()
            )));
        }

        self.backoff.attempt(rng);
        self.timeout = Timeout::Armed(now + self.backoff.rto());
        Ok(true)
    }

    /// Classify an incoming handshake fragment against the next message_seq
    /// the reassembler is waiting for.
    pub fn on_message_received(&mut self, header: &Header, next_receive_seq: u16) -> FlightEvent {
        if header.message_seq >= next_receive_seq {
            return if header.message_seq == next_receive_seq {
                FlightEvent::Expected
            } else {
                FlightEvent::Future
            };
        }

        let resend = self.resend_on_dupe
            && !self.resent_in_datagram
            && !self.saved.is_empty()
            && header.dupe_triggers_resend();

        if resend {
            self.resent_in_datagram = true;
        }

        FlightEvent::Stale { resend }
    }
}
