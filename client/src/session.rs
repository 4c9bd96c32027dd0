//! Client half of the State exchange: ping bookkeeping and the
//! ignore-on-the-fly counters.

use lockstep_protocol::messages::{IgnoringInfo, PingInfo, PlayState, StateMessage};
use lockstep_protocol::{PingService, SharedClock};

use crate::engine::LocalState;

/// A server playstate that made it past the ignore counters.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalUpdate {
    pub position: f64,
    pub paused: bool,
    pub do_seek: bool,
    pub set_by: Option<String>,
    pub message_age: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Incoming {
    pub update: Option<GlobalUpdate>,
    /// Server timestamp to echo in our reply.
    pub latency_calculation: Option<f64>,
}

#[derive(Debug)]
pub struct ClientSession {
    ping: PingService,
    client_ignoring: u32,
    server_ignoring: u32,
}

impl ClientSession {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            ping: PingService::new(clock),
            client_ignoring: 0,
            server_ignoring: 0,
        }
    }

    pub fn client_ignoring(&self) -> u32 {
        self.client_ignoring
    }

    pub fn server_ignoring(&self) -> u32 {
        self.server_ignoring
    }

    pub fn ping(&self) -> &PingService {
        &self.ping
    }

    pub fn receive_state(&mut self, state: &StateMessage) -> Incoming {
        if let Some(ignoring) = &state.ignoring_on_the_fly {
            if let Some(server) = ignoring.server {
                // The server forced a state on us; whatever we pushed is moot.
                self.server_ignoring = server;
                self.client_ignoring = 0;
            } else if ignoring.client == Some(self.client_ignoring) {
                self.client_ignoring = 0;
            }
        }

        let mut latency_calculation = None;
        if let Some(ping) = &state.ping {
            latency_calculation = ping.latency_calculation;
            if let Some(timestamp) = ping.client_latency_calculation {
                self.ping
                    .receive_message(timestamp, ping.server_rtt.unwrap_or(0.0));
            }
        }
        let message_age = self.ping.last_forward_delay();

        let update = match &state.playstate {
            Some(playstate) if self.client_ignoring == 0 => Some(GlobalUpdate {
                position: playstate.position,
                paused: playstate.paused,
                do_seek: playstate.do_seek(),
                set_by: playstate.set_by.clone(),
                message_age,
            }),
            Some(_) => {
                tracing::debug!(
                    counter = self.client_ignoring,
                    "Ignoring server state until our change is acknowledged"
                );
                None
            }
            None => None,
        };

        Incoming {
            update,
            latency_calculation,
        }
    }

    /// Build the next outgoing `State`. A `state_change` counts as a forced
    /// push and bumps our ignore counter.
    pub fn build_state(
        &mut self,
        local: Option<LocalState>,
        latency_calculation: Option<f64>,
        state_change: bool,
    ) -> StateMessage {
        let client_ignore_is_not_set = self.client_ignoring == 0 || self.server_ignoring != 0;
        let playstate = local
            .filter(|_| client_ignore_is_not_set)
            .map(|local| PlayState {
                position: local.position,
                paused: local.paused,
                do_seek: local.do_seek.then_some(true),
                set_by: None,
            });

        let ping = PingInfo {
            latency_calculation: latency_calculation.filter(|ts| *ts > 0.0),
            client_latency_calculation: Some(self.ping.new_timestamp()),
            client_rtt: Some(self.ping.rtt()),
            server_rtt: None,
        };

        if state_change {
            self.client_ignoring += 1;
        }
        let ignoring_on_the_fly = IgnoringInfo::from_counters(self.server_ignoring, self.client_ignoring);
        // The server's counter is acknowledged exactly once.
        self.server_ignoring = 0;

        StateMessage {
            playstate,
            ping: Some(ping),
            ignoring_on_the_fly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_protocol::ManualClock;
    use std::sync::Arc;

    fn session() -> (ClientSession, Arc<ManualClock>) {
        let clock = ManualClock::new(1000.0);
        (ClientSession::new(clock.clone()), clock)
    }

    fn local(position: f64) -> Option<LocalState> {
        Some(LocalState {
            position,
            paused: false,
            do_seek: false,
        })
    }

    fn server_state(position: f64, ignoring: Option<IgnoringInfo>) -> StateMessage {
        StateMessage {
            playstate: Some(PlayState {
                position,
                paused: false,
                do_seek: None,
                set_by: Some("bob".into()),
            }),
            ping: None,
            ignoring_on_the_fly: ignoring,
        }
    }

    #[test]
    fn forced_push_suppresses_inbound_playstate_until_echo() {
        let (mut session, _clock) = session();
        let pushed = session.build_state(local(50.0), None, true);
        assert_eq!(
            pushed.ignoring_on_the_fly,
            Some(IgnoringInfo {
                server: None,
                client: Some(1)
            })
        );

        // Stale broadcast still reflecting the old position.
        let incoming = session.receive_state(&server_state(10.0, None));
        assert!(incoming.update.is_none());
        assert_eq!(session.client_ignoring(), 1);

        // While waiting, heartbeats carry no playstate.
        let heartbeat = session.build_state(local(51.0), None, false);
        assert!(heartbeat.playstate.is_none());

        let echo = IgnoringInfo {
            server: None,
            client: Some(1),
        };
        let incoming = session.receive_state(&server_state(50.0, Some(echo)));
        assert_eq!(incoming.update.unwrap().position, 50.0);
        assert_eq!(session.client_ignoring(), 0);
    }

    #[test]
    fn server_force_overrides_our_pending_push() {
        let (mut session, _clock) = session();
        session.build_state(local(50.0), None, true);
        let forced = IgnoringInfo {
            server: Some(3),
            client: None,
        };
        let incoming = session.receive_state(&server_state(80.0, Some(forced)));
        assert!(incoming.update.is_some());
        assert_eq!(session.client_ignoring(), 0);

        let reply = session.build_state(local(80.0), None, false);
        assert!(reply.playstate.is_some());
        assert_eq!(reply.ignoring_on_the_fly, Some(forced));
        assert_eq!(session.server_ignoring(), 0);
    }

    #[test]
    fn do_seek_only_sent_when_true() {
        let (mut session, _clock) = session();
        let plain = session.build_state(local(1.0), Some(5.0), false);
        assert_eq!(plain.playstate.unwrap().do_seek, None);
        assert_eq!(plain.ping.unwrap().latency_calculation, Some(5.0));

        let seek = session.build_state(
            Some(LocalState {
                position: 1.0,
                paused: true,
                do_seek: true,
            }),
            None,
            false,
        );
        assert_eq!(seek.playstate.unwrap().do_seek, Some(true));
    }

    #[test]
    fn echoed_timestamp_drives_message_age() {
        let (mut session, clock) = session();
        let sent = session.build_state(None, None, false);
        let timestamp = sent.ping.unwrap().client_latency_calculation.unwrap();
        clock.advance(0.4);

        let state = StateMessage {
            ping: Some(PingInfo {
                latency_calculation: Some(999.0),
                client_latency_calculation: Some(timestamp),
                server_rtt: Some(0.4),
                client_rtt: None,
            }),
            ..server_state(0.0, None)
        };
        let incoming = session.receive_state(&state);
        assert_eq!(incoming.latency_calculation, Some(999.0));
        let update = incoming.update.unwrap();
        assert!((update.message_age - 0.2).abs() < 1e-6);
        assert_eq!(update.set_by.as_deref(), Some("bob"));
    }
}
