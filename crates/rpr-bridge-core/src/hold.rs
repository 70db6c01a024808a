//! Hold/Release scheduling.
//!
//! The outer host calls [`crate::Server::tick`] once per scheduling quantum
//! (typically once per UI frame), which caps throughput at roughly one
//! request per quantum. A client that needs to issue a batch brackets it with
//! `HOLD` … `RELEASE`; while held, the server stays inside [`HoldScheduler::run`]
//! and serves requests from a blocking loop on the same thread.
//!
//! ```text
//!            HOLD (ack flushed)
//!   Idle ─────────────────────────▶ Holding
//!    ▲                                 │
//!    │  RELEASE / peer close / error   │
//!    └─────────────────────────────────┘
//! ```
//!
//! The loop checks the holding flag at exactly one point per iteration, after
//! the previous response has been flushed.

use crate::connection::Connection;
use crate::protocol::ControlCommand;
use crate::shutdown::ShutdownSignal;
use crate::BridgeError;
use std::time::Duration;
use tracing::{debug, info};

/// Who is driving the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    /// Driven by the outer tick, fully non-blocking.
    Idle,
    /// Driven by the internal blocking loop.
    Holding,
}

impl HoldState {
    pub fn of(conn: &Connection) -> Self {
        if conn.is_holding() {
            HoldState::Holding
        } else {
            HoldState::Idle
        }
    }
}

/// What the driver must do after a request has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    EnterHold,
    Release,
}

/// How a hold loop ended.
#[derive(Debug)]
pub enum HoldExit {
    /// The client sent `RELEASE`.
    Released { handled: usize },
    /// The connection failed and has been reset.
    Failed { handled: usize, error: BridgeError },
}

impl HoldExit {
    pub fn handled(&self) -> usize {
        match self {
            HoldExit::Released { handled } | HoldExit::Failed { handled, .. } => *handled,
        }
    }
}

/// Hold-mode state machine and blocking loop.
#[derive(Debug, Clone)]
pub struct HoldScheduler {
    read_timeout: Duration,
}

impl HoldScheduler {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Decide the transition for a control command in `state`.
    ///
    /// `HOLD` while holding and `RELEASE` while idle are acknowledged no-ops.
    pub fn on_control(state: HoldState, cmd: ControlCommand) -> Transition {
        match (state, cmd) {
            (HoldState::Idle, ControlCommand::Hold) => Transition::EnterHold,
            (HoldState::Holding, ControlCommand::Release) => Transition::Release,
            (HoldState::Holding, ControlCommand::Hold) | (HoldState::Idle, ControlCommand::Release) => {
                Transition::Stay
            }
        }
    }

    /// Serve requests from a blocking loop until released or failed.
    ///
    /// The caller has already queued the `HOLD` acknowledgement; it is the
    /// first thing flushed. `handle` dispatches one message body and queues
    /// its response, clearing the holding flag on `RELEASE`. Non-blocking mode
    /// is restored before returning, whatever the outcome.
    pub fn run<F>(&self, conn: &mut Connection, shutdown: &ShutdownSignal, mut handle: F) -> HoldExit
    where
        F: FnMut(&mut Connection, &[u8]),
    {
        if let Err(error) = conn.enter_blocking(self.read_timeout) {
            return HoldExit::Failed { handled: 0, error };
        }
        conn.set_holding(true);
        info!("Entering hold mode for {:?}", conn.peer_addr());

        let mut handled = 0;
        let exit = loop {
            if let Err(error) = conn.flush_blocking(shutdown) {
                break HoldExit::Failed { handled, error };
            }
            if !conn.is_holding() {
                break HoldExit::Released { handled };
            }
            let body = match conn.recv_message_blocking(shutdown) {
                Ok(body) => body,
                Err(error) => break HoldExit::Failed { handled, error },
            };
            handle(conn, &body);
            handled += 1;
        };

        conn.exit_blocking();
        conn.set_holding(false);
        match &exit {
            HoldExit::Released { handled } => {
                info!("Hold released after {} request(s)", handled)
            }
            HoldExit::Failed { handled, error } => {
                debug!("Hold aborted after {} request(s): {}", handled, error)
            }
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ControlCommand::*;
        use HoldState::*;

        assert_eq!(HoldScheduler::on_control(Idle, Hold), Transition::EnterHold);
        assert_eq!(HoldScheduler::on_control(Holding, Release), Transition::Release);
        assert_eq!(HoldScheduler::on_control(Holding, Hold), Transition::Stay);
        assert_eq!(HoldScheduler::on_control(Idle, Release), Transition::Stay);
    }

    #[test]
    fn test_state_follows_connection_flag() {
        let mut conn = Connection::new(16, 16);
        assert_eq!(HoldState::of(&conn), HoldState::Idle);
        conn.set_holding(true);
        assert_eq!(HoldState::of(&conn), HoldState::Holding);
        conn.reset();
        assert_eq!(HoldState::of(&conn), HoldState::Idle);
    }

    #[test]
    fn test_run_without_client_fails_fast() {
        let scheduler = HoldScheduler::new(Duration::from_millis(10));
        let mut conn = Connection::new(16, 16);
        let mut calls = 0;

        let exit = scheduler.run(&mut conn, &ShutdownSignal::new(), |_, _| calls += 1);

        assert!(matches!(
            exit,
            HoldExit::Failed {
                handled: 0,
                error: BridgeError::NotConnected
            }
        ));
        assert_eq!(calls, 0);
        assert!(!conn.is_holding());
    }
}
