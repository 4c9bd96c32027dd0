//! Round-trip and forward delay estimation.
//!
//! Each side stamps its outgoing `State` with a timestamp and echoes the
//! peer's last timestamp back. The echo gives an RTT sample; the peer's own
//! RTT report lets us spot asymmetric paths.

use crate::clock::SharedClock;
use crate::constants::PING_MOVING_AVERAGE_WEIGHT;

#[derive(Debug, Clone)]
pub struct PingService {
    clock: SharedClock,
    weight: f64,
    rtt: f64,
    avg_rtt: Option<f64>,
    forward_delay: f64,
}

impl PingService {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_weight(clock, PING_MOVING_AVERAGE_WEIGHT)
    }

    pub fn with_weight(clock: SharedClock, weight: f64) -> Self {
        Self {
            clock,
            weight: weight.clamp(0.0, 1.0),
            rtt: 0.0,
            avg_rtt: None,
            forward_delay: 0.0,
        }
    }

    pub fn new_timestamp(&self) -> f64 {
        self.clock.now()
    }

    /// Record the echo of a timestamp we sent earlier, together with the RTT
    /// the peer measured for its own pings.
    pub fn receive_message(&mut self, timestamp: f64, remote_rtt: f64) {
        if timestamp <= 0.0 {
            return;
        }
        let rtt = self.clock.now() - timestamp;
        if rtt < 0.0 || remote_rtt < 0.0 {
            tracing::debug!(rtt, remote_rtt, "Discarding ping sample with negative RTT");
            return;
        }

        self.rtt = rtt;
        let avg = match self.avg_rtt {
            None => rtt,
            Some(avg) => avg * self.weight + rtt * (1.0 - self.weight),
        };
        self.avg_rtt = Some(avg);

        self.forward_delay = if remote_rtt < rtt {
            avg / 2.0 + (rtt - remote_rtt)
        } else {
            avg / 2.0
        };
    }

    /// Last measured round trip, in seconds.
    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    pub fn average_rtt(&self) -> f64 {
        self.avg_rtt.unwrap_or(0.0)
    }

    /// Estimated age of a message the peer just sent us.
    pub fn last_forward_delay(&self) -> f64 {
        self.forward_delay
    }
}
