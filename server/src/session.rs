//! Per-connection protocol bookkeeping: ping measurement and the
//! ignore-on-the-fly counters that keep forced states from echoing back.

use lockstep_protocol::messages::{IgnoringInfo, PingInfo, PlayState, StateMessage};
use lockstep_protocol::{PingService, SharedClock};
use std::sync::Arc;

use crate::room::ReportedPlaystate;

/// A client's state report once the ignore counters let it through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateReport {
    pub playstate: Option<ReportedPlaystate>,
    /// Estimated one-way delay of the message that carried it.
    pub message_age: f64,
}

#[derive(Debug)]
pub struct ServerSession {
    clock: SharedClock,
    ping: PingService,
    server_ignoring: u32,
    client_ignoring: u32,
    client_latency_calculation: Option<f64>,
    client_latency_arrival: Option<f64>,
}

impl ServerSession {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            ping: PingService::new(Arc::clone(&clock)),
            clock,
            server_ignoring: 0,
            client_ignoring: 0,
            client_latency_calculation: None,
            client_latency_arrival: None,
        }
    }

    pub fn server_ignoring(&self) -> u32 {
        self.server_ignoring
    }

    pub fn client_ignoring(&self) -> u32 {
        self.client_ignoring
    }

    pub fn ping(&self) -> &PingService {
        &self.ping
    }

    /// Build the next outgoing `State`. Returns `None` when an unforced
    /// update must be held back because a forced one is still unacknowledged.
    pub fn build_state(
        &mut self,
        position: f64,
        paused: bool,
        do_seek: bool,
        set_by: Option<String>,
        forced: bool,
    ) -> Option<StateMessage> {
        let processing_time = self
            .client_latency_arrival
            .map(|arrival| self.clock.now() - arrival)
            .unwrap_or(0.0);

        let ping = PingInfo {
            latency_calculation: Some(self.ping.new_timestamp()),
            client_latency_calculation: self
                .client_latency_calculation
                .take()
                .map(|timestamp| timestamp + processing_time),
            client_rtt: None,
            server_rtt: Some(self.ping.rtt()),
        };

        if forced {
            self.server_ignoring += 1;
        }
        let ignoring_on_the_fly = IgnoringInfo::from_counters(self.server_ignoring, self.client_ignoring);
        // The client's counter is acknowledged exactly once.
        self.client_ignoring = 0;

        if self.server_ignoring != 0 && !forced {
            return None;
        }

        Some(StateMessage {
            playstate: Some(PlayState {
                position,
                paused,
                do_seek: Some(do_seek),
                set_by,
            }),
            ping: Some(ping),
            ignoring_on_the_fly,
        })
    }

    /// Absorb an incoming `State`. Ping data is always processed; the
    /// playstate only reaches the room once our own forced state has been
    /// echoed back.
    pub fn receive_state(&mut self, state: &StateMessage) -> Option<StateReport> {
        if let Some(ignoring) = &state.ignoring_on_the_fly {
            if ignoring.server == Some(self.server_ignoring) {
                self.server_ignoring = 0;
            }
            if let Some(client) = ignoring.client {
                self.client_ignoring = client;
            }
        }

        if let Some(ping) = &state.ping {
            self.client_latency_calculation = ping.client_latency_calculation.filter(|ts| *ts > 0.0);
            self.client_latency_arrival = Some(self.clock.now());
            self.ping.receive_message(
                ping.latency_calculation.unwrap_or(0.0),
                ping.client_rtt.unwrap_or(0.0),
            );
        }

        if self.server_ignoring != 0 {
            tracing::debug!(
                counter = self.server_ignoring,
                "Ignoring client state until forced update is acknowledged"
            );
            return None;
        }

        Some(StateReport {
            playstate: state.playstate.as_ref().map(|playstate| ReportedPlaystate {
                position: playstate.position,
                paused: playstate.paused,
                do_seek: playstate.do_seek(),
            }),
            message_age: self.ping.last_forward_delay(),
        })
    }
}
