//! Connection lifecycle state machine.
//!
//! [`Link`] holds the lifecycle as a [`LinkState`] and turns each [`Input`]
//! into a list of [`Effect`]s for the driver to perform. It owns no socket
//! and no timers, so every reconnection path can be exercised in unit tests.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use switchboard_audit::AuditEvent;
use switchboard_proto::{CLOSE_AUTH_FAILED, CLOSE_NORMAL};

use super::backoff::ReconnectConfig;
use crate::events::SessionEvent;
use crate::metrics::ConnectionStatus;

/// Why the link stopped reconnecting on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The server rejected the token or no fresh token was available.
    AuthFailed(String),
    /// `max_attempts` reconnection attempts failed.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Lifecycle state of the link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No socket and nothing scheduled.
    #[default]
    Idle,
    /// Token refresh or socket open in progress.
    Connecting,
    /// Socket open.
    Open,
    /// A close frame was sent; waiting for the socket to finish closing.
    Closing {
        /// Where the link goes once closed. `None` means back to idle.
        after: Option<HaltReason>,
    },
    /// Waiting out the delay before a reconnection attempt.
    Backoff {
        /// Zero-based attempt the delay was computed for.
        attempt: u32,
    },
    /// Stopped; only an explicit connect starts it again.
    Halted {
        /// Why reconnection stopped.
        reason: HaltReason,
    },
}

/// Something that happened to the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The application asked to connect.
    Connect,
    /// The socket opened.
    Opened,
    /// The socket did not open within the connect timeout.
    OpenTimedOut,
    /// The socket failed.
    SocketError(String),
    /// The socket closed.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The reconnect delay elapsed.
    BackoffElapsed,
    /// The application asked to disconnect.
    Disconnect {
        /// Close code to send.
        code: u16,
        /// Close reason to send.
        reason: String,
    },
    /// The server asked for a fresh token.
    AuthRequired,
    /// The token source finished. `None` means the refresh failed.
    TokenRefreshed(Option<String>),
    /// The server accepted the token.
    AuthSucceeded,
    /// The server rejected the token.
    AuthFailed {
        /// Server-provided reason.
        reason: String,
    },
    /// Too many heartbeats went unanswered.
    HeartbeatTimedOut,
}

/// Work the driver must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Update the published status.
    SetStatus(ConnectionStatus),
    /// Update the published reconnect counter.
    SetAttempts(u32),
    /// Ask the token source for a fresh token.
    RefreshToken,
    /// Open the socket.
    BeginConnect {
        /// Token for the connection URL.
        token: Option<String>,
    },
    /// Drop any in-flight socket open or token refresh.
    AbortConnect,
    /// Send an `auth` frame.
    SendAuth(String),
    /// Start the heartbeat timer.
    StartHeartbeat,
    /// Stop the heartbeat timer.
    StopHeartbeat,
    /// Write every queued message to the socket.
    FlushQueue,
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Zero-based attempt.
        attempt: u32,
        /// Delay, jitter included.
        delay: Duration,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Start the close handshake.
    CloseSocket {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Discard a dead socket without a close handshake.
    DropSocket,
    /// Record a transport error in the metrics.
    RecordError(String),
    /// Broadcast a session event.
    Notify(SessionEvent),
    /// Hand an event to the audit sink.
    Audit(AuditEvent),
}

/// The connection lifecycle.
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    attempts: u32,
    intentional: bool,
    token: Option<String>,
    has_token_source: bool,
    config: ReconnectConfig,
    rng: StdRng,
}

impl Link {
    /// Create an idle link.
    ///
    /// `token` is the last known token; `has_token_source` says whether
    /// [`Effect::RefreshToken`] can ever produce a fresh one.
    #[must_use]
    pub fn new(config: ReconnectConfig, token: Option<String>, has_token_source: bool) -> Self {
        Self::with_rng(config, token, has_token_source, StdRng::from_entropy())
    }

    /// Create an idle link with a given jitter source.
    #[must_use]
    pub fn with_rng(
        config: ReconnectConfig,
        token: Option<String>,
        has_token_source: bool,
        rng: StdRng,
    ) -> Self {
        Self {
            state: LinkState::Idle,
            attempts: 0,
            intentional: false,
            token,
            has_token_source,
            config,
            rng,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &LinkState {
        &self.state
    }

    /// Reconnection attempts since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the application closed the link on purpose.
    #[must_use]
    pub const fn is_intentionally_closed(&self) -> bool {
        self.intentional
    }

    /// Last known token.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Apply an input.
    pub fn step(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match (self.state.clone(), input) {
            (LinkState::Idle | LinkState::Halted { .. }, Input::Connect) => {
                self.intentional = false;
                self.begin_connect(&mut effects);
            }

            (LinkState::Backoff { .. }, Input::BackoffElapsed) => {
                self.attempts += 1;
                effects.push(Effect::SetAttempts(self.attempts));
                self.begin_connect(&mut effects);
            }

            (LinkState::Connecting, Input::TokenRefreshed(token)) => {
                if token.is_some() {
                    self.token = token;
                }
                effects.push(Effect::BeginConnect {
                    token: self.token.clone(),
                });
            }

            (LinkState::Connecting, Input::Opened) => {
                self.state = LinkState::Open;
                self.attempts = 0;
                effects.push(Effect::SetAttempts(0));
                effects.push(Effect::SetStatus(ConnectionStatus::Connected));
                effects.push(Effect::Notify(SessionEvent::Connected));
                if let Some(token) = &self.token {
                    effects.push(Effect::SendAuth(token.clone()));
                }
                effects.push(Effect::StartHeartbeat);
                effects.push(Effect::FlushQueue);
            }

            (LinkState::Connecting, Input::OpenTimedOut) => {
                effects.push(Effect::AbortConnect);
                self.fail("connection timed out".to_string(), &mut effects);
            }

            (LinkState::Connecting, Input::SocketError(message)) => {
                effects.push(Effect::AbortConnect);
                self.fail(message, &mut effects);
            }

            (LinkState::Open, Input::SocketError(message)) => {
                effects.push(Effect::StopHeartbeat);
                effects.push(Effect::DropSocket);
                self.fail(message, &mut effects);
            }

            (LinkState::Open, Input::HeartbeatTimedOut) => {
                effects.push(Effect::StopHeartbeat);
                effects.push(Effect::DropSocket);
                self.fail("heartbeat timed out".to_string(), &mut effects);
            }

            (LinkState::Open, Input::Closed { code, reason }) => {
                effects.push(Effect::StopHeartbeat);
                effects.push(Effect::Notify(SessionEvent::Disconnected {
                    code,
                    reason: reason.clone(),
                }));
                if code == Some(CLOSE_AUTH_FAILED) {
                    self.halt_auth(reason, &mut effects);
                } else {
                    if code != Some(CLOSE_NORMAL) {
                        effects.push(Effect::Audit(AuditEvent::abnormal_closure(
                            code,
                            reason.clone(),
                        )));
                    }
                    effects.push(Effect::SetStatus(ConnectionStatus::Disconnected));
                    self.schedule_reconnect(&mut effects);
                }
            }

            (LinkState::Closing { after }, Input::Closed { code, reason }) => {
                self.finish_close(after, code, reason, &mut effects);
            }

            // The peer may drop the connection instead of answering our close.
            (LinkState::Closing { after }, Input::SocketError(message)) => {
                self.finish_close(after, None, message, &mut effects);
            }

            (LinkState::Closing { after }, Input::HeartbeatTimedOut) => {
                effects.push(Effect::StopHeartbeat);
                effects.push(Effect::DropSocket);
                self.finish_close(after, None, "heartbeat timed out".to_string(), &mut effects);
            }

            (LinkState::Open, Input::Disconnect { code, reason }) => {
                self.intentional = true;
                self.state = LinkState::Closing { after: None };
                effects.push(Effect::SetStatus(ConnectionStatus::Disconnecting));
                effects.push(Effect::StopHeartbeat);
                effects.push(Effect::CloseSocket { code, reason });
            }

            (LinkState::Connecting, Input::Disconnect { .. }) => {
                self.intentional = true;
                self.state = LinkState::Idle;
                effects.push(Effect::AbortConnect);
                effects.push(Effect::SetStatus(ConnectionStatus::Disconnected));
            }

            (LinkState::Backoff { .. }, Input::Disconnect { .. }) => {
                self.intentional = true;
                self.state = LinkState::Idle;
                effects.push(Effect::CancelReconnect);
                effects.push(Effect::SetStatus(ConnectionStatus::Disconnected));
            }

            (LinkState::Halted { .. }, Input::Disconnect { .. }) => {
                self.intentional = true;
                self.state = LinkState::Idle;
                effects.push(Effect::SetStatus(ConnectionStatus::Disconnected));
            }

            (LinkState::Open, Input::AuthRequired) => {
                if self.has_token_source {
                    effects.push(Effect::RefreshToken);
                } else {
                    self.close_for_auth("token expired and no token source".to_string(), &mut effects);
                }
            }

            (LinkState::Open, Input::TokenRefreshed(Some(token))) => {
                self.token = Some(token.clone());
                effects.push(Effect::SendAuth(token));
            }

            (LinkState::Open, Input::TokenRefreshed(None)) => {
                self.close_for_auth("token refresh failed".to_string(), &mut effects);
            }

            (LinkState::Open, Input::AuthSucceeded) => {
                effects.push(Effect::Notify(SessionEvent::Authenticated));
            }

            (LinkState::Open, Input::AuthFailed { reason }) => {
                self.close_for_auth(reason, &mut effects);
            }

            // Everything else is stale or redundant: a connect while already
            // connecting, a timer that fired after a state change, and so on.
            _ => {}
        }
        effects
    }

    fn begin_connect(&mut self, effects: &mut Vec<Effect>) {
        self.state = LinkState::Connecting;
        effects.push(Effect::SetStatus(ConnectionStatus::Connecting));
        if self.has_token_source {
            effects.push(Effect::RefreshToken);
        } else {
            effects.push(Effect::BeginConnect {
                token: self.token.clone(),
            });
        }
    }

    /// Leave `Closing` once the socket is gone, however it went.
    fn finish_close(
        &mut self,
        after: Option<HaltReason>,
        code: Option<u16>,
        reason: String,
        effects: &mut Vec<Effect>,
    ) {
        effects.push(Effect::Notify(SessionEvent::Disconnected { code, reason }));
        match after {
            None => {
                self.state = LinkState::Idle;
                effects.push(Effect::SetStatus(ConnectionStatus::Disconnected));
            }
            Some(reason) => {
                self.state = LinkState::Halted { reason };
                effects.push(Effect::SetStatus(ConnectionStatus::Error));
            }
        }
    }

    fn fail(&mut self, message: String, effects: &mut Vec<Effect>) {
        effects.push(Effect::RecordError(message.clone()));
        effects.push(Effect::SetStatus(ConnectionStatus::Error));
        effects.push(Effect::Notify(SessionEvent::Error(message.clone())));
        effects.push(Effect::Audit(AuditEvent::abnormal_closure(None, message)));
        self.schedule_reconnect(effects);
    }

    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        let attempt = self.attempts;
        if self.config.should_reconnect(attempt) {
            let delay = self.config.jittered_delay(attempt, &mut self.rng);
            self.state = LinkState::Backoff { attempt };
            effects.push(Effect::ScheduleReconnect { attempt, delay });
            effects.push(Effect::Notify(SessionEvent::Reconnecting { attempt, delay }));
            effects.push(Effect::Audit(AuditEvent::reconnect_scheduled(
                attempt,
                delay.as_millis() as u64,
            )));
        } else {
            self.state = LinkState::Halted {
                reason: HaltReason::Exhausted { attempts: attempt },
            };
            effects.push(Effect::SetStatus(ConnectionStatus::Error));
            effects.push(Effect::Notify(SessionEvent::ReconnectFailed { attempts: attempt }));
            effects.push(Effect::Audit(AuditEvent::reconnect_exhausted(attempt)));
        }
    }

    /// Close with the auth-failure code, then halt once the socket is gone.
    fn close_for_auth(&mut self, reason: String, effects: &mut Vec<Effect>) {
        self.state = LinkState::Closing {
            after: Some(HaltReason::AuthFailed(reason.clone())),
        };
        effects.push(Effect::StopHeartbeat);
        effects.push(Effect::RecordError(format!("authentication failed: {reason}")));
        effects.push(Effect::Notify(SessionEvent::AuthenticationFailed {
            reason: reason.clone(),
        }));
        effects.push(Effect::Audit(AuditEvent::authentication_failure(
            reason.clone(),
        )));
        effects.push(Effect::SetStatus(ConnectionStatus::Disconnecting));
        effects.push(Effect::CloseSocket {
            code: CLOSE_AUTH_FAILED,
            reason: "authentication failed".to_string(),
        });
    }

    /// The server already closed with the auth-failure code.
    fn halt_auth(&mut self, reason: String, effects: &mut Vec<Effect>) {
        self.state = LinkState::Halted {
            reason: HaltReason::AuthFailed(reason.clone()),
        };
        effects.push(Effect::RecordError(format!("authentication failed: {reason}")));
        effects.push(Effect::Notify(SessionEvent::AuthenticationFailed {
            reason: reason.clone(),
        }));
        effects.push(Effect::Audit(AuditEvent::authentication_failure(reason)));
        effects.push(Effect::SetStatus(ConnectionStatus::Error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        }
    }

    fn link(token: Option<&str>, has_source: bool) -> Link {
        Link::with_rng(
            no_jitter(),
            token.map(ToString::to_string),
            has_source,
            StdRng::seed_from_u64(1),
        )
    }

    fn open_link(token: Option<&str>, has_source: bool) -> Link {
        let mut link = link(token, has_source);
        link.step(Input::Connect);
        if has_source {
            link.step(Input::TokenRefreshed(token.map(ToString::to_string)));
        }
        link.step(Input::Opened);
        assert!(link.is_open());
        link
    }

    fn abnormal_close() -> Input {
        Input::Closed {
            code: Some(1006),
            reason: "reset".to_string(),
        }
    }

    fn scheduled(effects: &[Effect]) -> Option<(u32, Duration)> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
    }

    fn auth_frames(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::SendAuth(token) => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_without_token_source_opens_directly() {
        let mut link = link(Some("static"), false);
        let effects = link.step(Input::Connect);
        assert_eq!(link.state(), &LinkState::Connecting);
        assert_eq!(
            effects,
            vec![
                Effect::SetStatus(ConnectionStatus::Connecting),
                Effect::BeginConnect {
                    token: Some("static".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_connect_with_token_source_refreshes_first() {
        let mut link = link(None, true);
        let effects = link.step(Input::Connect);
        assert!(effects.contains(&Effect::RefreshToken));

        let effects = link.step(Input::TokenRefreshed(Some("fresh".to_string())));
        assert_eq!(
            effects,
            vec![Effect::BeginConnect {
                token: Some("fresh".to_string())
            }]
        );
    }

    #[test]
    fn test_failed_refresh_falls_back_to_last_token() {
        let mut link = link(Some("old"), true);
        link.step(Input::Connect);
        let effects = link.step(Input::TokenRefreshed(None));
        assert_eq!(
            effects,
            vec![Effect::BeginConnect {
                token: Some("old".to_string())
            }]
        );
    }

    #[test]
    fn test_connect_is_noop_when_busy() {
        let mut link = link(None, false);
        link.step(Input::Connect);
        assert!(link.step(Input::Connect).is_empty());

        link.step(Input::Opened);
        assert!(link.step(Input::Connect).is_empty());

        link.step(abnormal_close());
        assert!(matches!(link.state(), LinkState::Backoff { .. }));
        assert!(link.step(Input::Connect).is_empty());
    }

    #[test]
    fn test_open_authenticates_then_heartbeats_then_flushes() {
        let mut link = link(Some("tok"), false);
        link.step(Input::Connect);
        let effects = link.step(Input::Opened);

        let auth = effects
            .iter()
            .position(|e| matches!(e, Effect::SendAuth(_)));
        let heartbeat = effects.iter().position(|e| *e == Effect::StartHeartbeat);
        let flush = effects.iter().position(|e| *e == Effect::FlushQueue);
        assert!(auth < heartbeat && heartbeat < flush);
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Connected)));
        assert!(effects.contains(&Effect::SetAttempts(0)));
    }

    #[test]
    fn test_open_without_token_skips_auth() {
        let mut link = open_link(None, false);
        assert!(link.token().is_none());

        link.step(Input::Closed {
            code: Some(1006),
            reason: String::new(),
        });
        link.step(Input::BackoffElapsed);
        let effects = link.step(Input::Opened);
        assert!(auth_frames(&effects).is_empty());
    }

    #[test]
    fn test_five_abnormal_closures_back_off_exponentially() {
        let mut link = open_link(None, false);
        let mut delays = Vec::new();

        let effects = link.step(abnormal_close());
        delays.extend(scheduled(&effects).map(|(_, d)| d.as_millis()));

        for _ in 0..4 {
            link.step(Input::BackoffElapsed);
            let effects = link.step(Input::SocketError("connection reset".to_string()));
            delays.extend(scheduled(&effects).map(|(_, d)| d.as_millis()));
        }

        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5062]);
    }

    #[test]
    fn test_failed_attempts_grow_backoff_and_success_resets() {
        let mut link = open_link(None, false);
        link.step(abnormal_close());

        for expected in [1u32, 2, 3] {
            let effects = link.step(Input::BackoffElapsed);
            assert!(effects.contains(&Effect::SetAttempts(expected)));
            let effects = link.step(Input::OpenTimedOut);
            assert_eq!(scheduled(&effects).map(|(a, _)| a), Some(expected));
            assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Error)));
        }
        assert_eq!(link.attempts(), 3);

        link.step(Input::BackoffElapsed);
        link.step(Input::Opened);
        assert_eq!(link.attempts(), 0);
    }

    #[test]
    fn test_exhausted_attempts_halt() {
        let mut link = Link::with_rng(
            ReconnectConfig {
                max_attempts: Some(2),
                ..no_jitter()
            },
            None,
            false,
            StdRng::seed_from_u64(1),
        );
        link.step(Input::Connect);
        link.step(Input::SocketError("refused".to_string()));
        link.step(Input::BackoffElapsed);
        link.step(Input::SocketError("refused".to_string()));
        link.step(Input::BackoffElapsed);
        let effects = link.step(Input::SocketError("refused".to_string()));

        assert_eq!(
            link.state(),
            &LinkState::Halted {
                reason: HaltReason::Exhausted { attempts: 2 }
            }
        );
        assert!(effects.contains(&Effect::Notify(SessionEvent::ReconnectFailed { attempts: 2 })));
        assert!(scheduled(&effects).is_none());
        assert!(link.step(Input::BackoffElapsed).is_empty());
    }

    #[test]
    fn test_auth_required_refreshes_and_sends_exactly_one_auth() {
        let mut link = open_link(Some("tok1"), true);

        let effects = link.step(Input::AuthRequired);
        assert_eq!(effects, vec![Effect::RefreshToken]);

        let effects = link.step(Input::TokenRefreshed(Some("tok2".to_string())));
        assert_eq!(auth_frames(&effects), vec!["tok2".to_string()]);
        assert!(scheduled(&effects).is_none());
        assert!(!effects.iter().any(|e| matches!(e, Effect::CloseSocket { .. })));
        assert!(link.is_open());
        assert_eq!(link.token(), Some("tok2"));
    }

    #[test]
    fn test_auth_required_with_failed_refresh_closes_4001_and_halts() {
        let mut link = open_link(Some("tok1"), true);
        link.step(Input::AuthRequired);
        let effects = link.step(Input::TokenRefreshed(None));

        assert!(effects.contains(&Effect::CloseSocket {
            code: CLOSE_AUTH_FAILED,
            reason: "authentication failed".to_string()
        }));

        let effects = link.step(Input::Closed {
            code: Some(CLOSE_AUTH_FAILED),
            reason: "authentication failed".to_string(),
        });
        assert!(scheduled(&effects).is_none());
        assert!(matches!(
            link.state(),
            LinkState::Halted {
                reason: HaltReason::AuthFailed(_)
            }
        ));
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Error)));
    }

    #[test]
    fn test_auth_required_without_source_halts() {
        let mut link = open_link(Some("tok1"), false);
        let effects = link.step(Input::AuthRequired);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CloseSocket { code: CLOSE_AUTH_FAILED, .. })));
    }

    #[test]
    fn test_auth_failed_frame_halts() {
        let mut link = open_link(Some("bad"), false);
        let effects = link.step(Input::AuthFailed {
            reason: "invalid token".to_string(),
        });
        assert!(effects.contains(&Effect::Notify(SessionEvent::AuthenticationFailed {
            reason: "invalid token".to_string()
        })));
        assert!(effects.iter().any(|e| matches!(e, Effect::Audit(_))));
    }

    #[test]
    fn test_server_close_4001_halts_without_reconnect() {
        let mut link = open_link(Some("tok"), false);
        let effects = link.step(Input::Closed {
            code: Some(CLOSE_AUTH_FAILED),
            reason: "expired".to_string(),
        });
        assert!(scheduled(&effects).is_none());
        assert!(matches!(link.state(), LinkState::Halted { .. }));
    }

    #[test]
    fn test_normal_server_close_still_reconnects() {
        let mut link = open_link(None, false);
        let effects = link.step(Input::Closed {
            code: Some(CLOSE_NORMAL),
            reason: "restart".to_string(),
        });
        assert_eq!(scheduled(&effects).map(|(a, _)| a), Some(0));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::Audit(a) if a.event_type() == "abnormal_closure")));
    }

    #[test]
    fn test_intentional_disconnect_stops_cycle() {
        let mut link = open_link(None, false);
        let effects = link.step(Input::Disconnect {
            code: CLOSE_NORMAL,
            reason: "bye".to_string(),
        });
        assert!(link.is_intentionally_closed());
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Disconnecting)));
        assert!(effects.contains(&Effect::StopHeartbeat));

        let effects = link.step(Input::Closed {
            code: Some(CLOSE_NORMAL),
            reason: "bye".to_string(),
        });
        assert_eq!(link.state(), &LinkState::Idle);
        assert!(scheduled(&effects).is_none());
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Disconnected)));
    }

    #[test]
    fn test_disconnect_during_backoff_cancels_timer() {
        let mut link = open_link(None, false);
        link.step(abnormal_close());
        let effects = link.step(Input::Disconnect {
            code: CLOSE_NORMAL,
            reason: String::new(),
        });
        assert!(effects.contains(&Effect::CancelReconnect));
        assert_eq!(link.state(), &LinkState::Idle);
        assert!(link.step(Input::BackoffElapsed).is_empty());
    }

    #[test]
    fn test_disconnect_during_connect_aborts() {
        let mut link = link(None, false);
        link.step(Input::Connect);
        let effects = link.step(Input::Disconnect {
            code: CLOSE_NORMAL,
            reason: String::new(),
        });
        assert!(effects.contains(&Effect::AbortConnect));
        assert!(link.step(Input::Opened).is_empty());
    }

    #[test]
    fn test_reset_during_intentional_close_goes_idle() {
        let mut link = open_link(None, false);
        link.step(Input::Disconnect {
            code: CLOSE_NORMAL,
            reason: "bye".to_string(),
        });

        let effects = link.step(Input::SocketError("reset without closing handshake".to_string()));
        assert_eq!(link.state(), &LinkState::Idle);
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Disconnected)));
        assert!(scheduled(&effects).is_none());

        let effects = link.step(Input::Connect);
        assert_eq!(link.state(), &LinkState::Connecting);
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Connecting)));
    }

    #[test]
    fn test_reset_during_auth_close_halts() {
        let mut link = open_link(Some("tok"), false);
        link.step(Input::AuthFailed {
            reason: "revoked".to_string(),
        });
        assert!(matches!(link.state(), LinkState::Closing { after: Some(_) }));

        let effects = link.step(Input::SocketError("connection reset".to_string()));
        assert_eq!(
            link.state(),
            &LinkState::Halted {
                reason: HaltReason::AuthFailed("revoked".to_string())
            }
        );
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Error)));
        assert!(scheduled(&effects).is_none());
    }

    #[test]
    fn test_heartbeat_timeout_while_closing_finishes_close() {
        let mut link = open_link(None, false);
        link.step(Input::Disconnect {
            code: CLOSE_NORMAL,
            reason: String::new(),
        });
        let effects = link.step(Input::HeartbeatTimedOut);
        assert!(effects.contains(&Effect::DropSocket));
        assert_eq!(link.state(), &LinkState::Idle);
    }

    #[test]
    fn test_heartbeat_timeout_reconnects() {
        let mut link = open_link(None, false);
        let effects = link.step(Input::HeartbeatTimedOut);
        assert!(effects.contains(&Effect::DropSocket));
        assert!(effects.contains(&Effect::RecordError("heartbeat timed out".to_string())));
        assert_eq!(scheduled(&effects).map(|(a, _)| a), Some(0));
    }

    #[test]
    fn test_connect_after_halt_keeps_attempts() {
        let mut link = Link::with_rng(
            ReconnectConfig {
                max_attempts: Some(1),
                ..no_jitter()
            },
            None,
            false,
            StdRng::seed_from_u64(1),
        );
        link.step(Input::Connect);
        link.step(Input::OpenTimedOut);
        link.step(Input::BackoffElapsed);
        link.step(Input::OpenTimedOut);
        assert!(matches!(link.state(), LinkState::Halted { .. }));

        let effects = link.step(Input::Connect);
        assert!(effects.contains(&Effect::SetStatus(ConnectionStatus::Connecting)));
        assert_eq!(link.attempts(), 1);
    }
}
