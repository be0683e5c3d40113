use std::time::Duration;

use crate::rng::SeededRng;

// In seconds.
const JITTER_RANGE: f32 = 0.5;

const MIN_RTO: Duration = Duration::from_millis(50);

/// Retransmission timeout that doubles on every unanswered attempt.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    start_rto: Duration,
    max_rto: Duration,
    retries: usize,
    rto: Duration,
    with_jitter: bool,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(
        start_rto: Duration,
        max_rto: Duration,
        retries: usize,
        with_jitter: bool,
        rng: &mut SeededRng,
    ) -> Self {
        let mut b = Self {
            start_rto,
            max_rto,
            retries,
            rto: start_rto,
            with_jitter,
            jitter: 0.0,
            left: retries,
        };
        b.jitter = b.next_jitter(rng);
        b
    }

    pub fn reset(&mut self, rng: &mut SeededRng) {
        self.rto = self.start_rto;
        self.jitter = self.next_jitter(rng);
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            let duration = Duration::from_secs_f32(self.jitter.abs());
            self.rto.saturating_sub(duration)
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(MIN_RTO)
    }

    // A value between -0.25s and 0.25s, or 0 when disabled.
    fn next_jitter(&self, rng: &mut SeededRng) -> f32 {
        if !self.with_jitter {
            return 0.0;
        }
        rng.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self, rng: &mut SeededRng) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };

        self.left = n;
        self.jitter = self.next_jitter(rng);
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}
