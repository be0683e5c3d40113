/// Sliding replay window for record sequence numbers.
///
/// Keeps the highest accepted sequence number and a 64-bit bitmap of the
/// 64 sequence numbers below it. One window per epoch.
#[derive(Debug, Default)]
pub(crate) struct ReplayWindow {
    max_seq: u64,
    window: u64,
    seen_any: bool,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the given sequence number is fresh and mark it seen.
    ///
    /// Returns false for duplicates and for numbers that fell out of the window.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.seen_any {
            self.seen_any = true;
            self.max_seq = seqno;
            self.window = 1;
            return true;
        }

        if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            self.window = if delta >= 64 { 0 } else { self.window << delta };
            self.window |= 1;
            self.max_seq = seqno;
            true
        } else {
            let offset = self.max_seq - seqno;
            if offset >= 64 {
                return false;
            }
            let mask = 1u64 << offset;
            if (self.window & mask) != 0 {
                return false;
            }
            self.window |= mask;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fresh_and_rejects_duplicate() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(!w.check_and_update(0));
        assert!(w.check_and_update(1));
        assert!(!w.check_and_update(1));
        assert!(w.check_and_update(2));
    }

    #[test]
    fn accepts_out_of_order_within_window() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(8));
        assert!(!w.check_and_update(8));
        assert!(w.check_and_update(9));
    }

    #[test]
    fn rejects_too_old() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(100));
        assert!(!w.check_and_update(36));
        assert!(w.check_and_update(37));
    }

    #[test]
    fn handles_large_jump() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(1));
        assert!(w.check_and_update(80));
        assert!(w.check_and_update(79));
        assert!(!w.check_and_update(15));
        // Nothing below the jump was carried over.
        assert!(w.check_and_update(17));
    }
}
