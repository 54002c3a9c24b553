//! Congestion control (RFC 5681): slow start, congestion avoidance, and the
//! cwnd/ssthresh response to loss. No SACK, ECN, or any of the later RFCs.

use crate::config::TCP_DEFAULT_MSS;

/// Reno, per RFC 5681.
#[derive(Debug, Clone, Copy)]
struct Reno {
    cwnd: usize,
    ssthresh: usize,
    mss: usize,
}

impl Reno {
    fn new() -> Self {
        Reno {
            cwnd: TCP_DEFAULT_MSS,
            ssthresh: usize::MAX,
            mss: TCP_DEFAULT_MSS,
        }
    }

    fn set_mss(&mut self, mss: usize) {
        self.mss = mss;
        self.cwnd = self.cwnd.max(mss);
    }

    fn on_ack(&mut self, acked: usize) {
        if self.cwnd < self.ssthresh {
            // Slow start: one MSS of growth per ACKed segment.
            self.cwnd += acked.min(self.mss);
        } else {
            // Congestion avoidance: roughly one MSS of growth per RTT.
            self.cwnd += (self.mss * self.mss / self.cwnd).max(1);
        }
    }

    fn on_retransmit(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(2 * self.mss);
        self.cwnd = self.mss;
    }

    fn on_duplicate_ack(&mut self) {
        // Fast retransmit: halve the window instead of collapsing to one MSS.
        self.ssthresh = (self.cwnd / 2).max(2 * self.mss);
        self.cwnd = self.ssthresh;
    }
}

/// Congestion controller used by a TCP socket.
///
/// An enum rather than a trait object: there is one algorithm today, but the
/// call sites (`on_ack`/`on_retransmit`/`on_duplicate_ack`) are already shaped
/// for more than one.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AnyController {
    Reno(Reno),
}

impl AnyController {
    pub(crate) fn new() -> Self {
        AnyController::Reno(Reno::new())
    }

    /// Current congestion window, in bytes.
    pub(crate) fn window(&self) -> usize {
        match self {
            AnyController::Reno(r) => r.cwnd,
        }
    }

    pub(crate) fn set_mss(&mut self, mss: usize) {
        match self {
            AnyController::Reno(r) => r.set_mss(mss),
        }
    }

    /// Called once per ACK that newly acknowledges `acked` bytes.
    pub(crate) fn on_ack(&mut self, acked: usize) {
        match self {
            AnyController::Reno(r) => r.on_ack(acked),
        }
    }

    /// Called when the retransmission timer fires.
    pub(crate) fn on_retransmit(&mut self) {
        match self {
            AnyController::Reno(r) => r.on_retransmit(),
        }
    }

    /// Called on the third duplicate ACK (fast retransmit).
    pub(crate) fn on_duplicate_ack(&mut self) {
        match self {
            AnyController::Reno(r) => r.on_duplicate_ack(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_grows_by_acked_bytes() {
        let mut c = AnyController::new();
        let before = c.window();
        c.on_ack(500);
        assert!(c.window() > before);
    }

    #[test]
    fn retransmit_collapses_window_to_one_segment() {
        let mut c = AnyController::new();
        c.on_ack(10_000);
        c.on_retransmit();
        assert_eq!(c.window(), TCP_DEFAULT_MSS);
    }

    #[test]
    fn duplicate_ack_halves_rather_than_collapses() {
        let mut c = AnyController::new();
        for _ in 0..20 {
            c.on_ack(TCP_DEFAULT_MSS);
        }
        let before = c.window();
        c.on_duplicate_ack();
        assert!(c.window() < before);
        assert!(c.window() >= TCP_DEFAULT_MSS);
    }
}
