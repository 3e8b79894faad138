use std::time::Duration;

use crate::{
    error::AulaError,
    retry::{ReconnectBackoff, RetryPolicy},
    types::ConnectionState,
};

/// What the runtime should do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Wait `delay`, then open again. `attempt` is 1-based.
    Reconnect { attempt: u32, delay: Duration },
    /// The retry ceiling was reached; the channel stays closed.
    Exhausted { attempts: u32 },
    /// The close was requested through `disconnect`.
    Manual,
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    backoff: ReconnectBackoff,
    manual_close: bool,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ConnectionStateMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Closed,
            backoff: ReconnectBackoff::new(policy),
            manual_close: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn current_delay(&self) -> Duration {
        self.backoff.current_delay()
    }

    pub fn is_manually_closed(&self) -> bool {
        self.manual_close
    }

    /// A connection exists or is on its way; a new `connect` must not start
    /// another one.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, ConnectionState::Closed)
    }

    /// `Closed -> Connecting` for a fresh connect request. Starts a new
    /// retry budget.
    pub fn request_connect(&mut self) -> Result<ConnectionState, AulaError> {
        if self.state != ConnectionState::Closed {
            return Err(AulaError::invalid_state(self.state, "connect"));
        }
        self.manual_close = false;
        self.backoff.reset();
        self.state = ConnectionState::Connecting;
        Ok(self.state)
    }

    /// `Connecting -> Open`. Clears any backoff left over from earlier
    /// failures.
    pub fn on_open(&mut self) -> Result<ConnectionState, AulaError> {
        if self.state != ConnectionState::Connecting {
            return Err(AulaError::invalid_state(self.state, "on_open"));
        }
        self.backoff.reset();
        self.state = ConnectionState::Open;
        Ok(self.state)
    }

    /// Handle a transport close (clean, failed open, or forced after an error).
    pub fn on_close(&mut self) -> CloseOutcome {
        if self.manual_close || self.state == ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            return CloseOutcome::Manual;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                CloseOutcome::Reconnect {
                    attempt: self.backoff.attempts(),
                    delay,
                }
            }
            None => {
                self.state = ConnectionState::Closed;
                CloseOutcome::Exhausted {
                    attempts: self.backoff.attempts(),
                }
            }
        }
    }

    /// `Reconnecting -> Connecting` once the backoff timer fired.
    pub fn on_backoff_elapsed(&mut self) -> Result<ConnectionState, AulaError> {
        if self.state != ConnectionState::Reconnecting {
            return Err(AulaError::invalid_state(self.state, "on_backoff_elapsed"));
        }
        self.state = ConnectionState::Connecting;
        Ok(self.state)
    }

    /// Stop without the manual flag, e.g. when the token disappeared before a
    /// reconnect.
    pub fn abandon(&mut self) -> ConnectionState {
        self.state = ConnectionState::Closed;
        self.state
    }

    /// Any state `-> Closed`; suppresses every later reconnect of this session.
    pub fn disconnect(&mut self) -> ConnectionState {
        self.manual_close = true;
        self.state = ConnectionState::Closed;
        self.state
    }
}
