//! Tick-driven TCP server.
//!
//! The host owns the event loop and calls [`Server::tick`] whenever it can
//! spare a moment (once per UI frame, say). Each tick does a bounded amount of
//! non-blocking work:
//!
//! 1. accept a client if none is attached,
//! 2. one read of up to `read_chunk_size` bytes,
//! 3. dispatch every complete message now buffered,
//! 4. one write attempt of the pending responses.
//!
//! The only exception is a `HOLD` request, which keeps the tick inside the
//! hold loop until the client releases it or the connection fails.
//!
//! # Thread Safety
//!
//! The server is driven from one thread through `&mut self`. The only value
//! meant to cross threads is the [`ShutdownSignal`].

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatch::{encode_response, Dispatcher};
use crate::executor::CallExecutor;
use crate::failure::{Failure, FailureReason};
use crate::hold::{HoldExit, HoldScheduler, HoldState, Transition};
use crate::protocol::Response;
use crate::registry::Registry;
use crate::shutdown::ShutdownSignal;
use crate::{BridgeError, Result};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use tracing::{debug, error, info, warn};

/// What a single [`Server::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A new client was attached during this tick.
    pub accepted: Option<SocketAddr>,
    /// Requests answered, including those served inside a hold loop.
    pub messages_handled: usize,
    /// The tick entered (and left) hold mode.
    pub held: bool,
    /// The connection was reset during this tick.
    pub disconnected: bool,
}

/// The bridge server: one listener, at most one client.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    conn: Connection,
    dispatcher: Dispatcher,
    scheduler: HoldScheduler,
    shutdown: ShutdownSignal,
}

impl Server {
    /// Bind the listener and prepare an empty connection slot.
    pub fn new(config: ServerConfig, registry: Box<dyn Registry>) -> Result<Self> {
        config.validate()?;
        let addr = config.socket_addr()?;

        let listener = TcpListener::bind(addr).map_err(|e| BridgeError::bind(addr, e))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!("Bridge server listening on {}", local_addr);

        let executor = CallExecutor::new(registry).with_allowed_prefix(config.allowed_prefix.clone());

        Ok(Self {
            listener: Some(listener),
            local_addr,
            conn: Connection::new(config.max_message_size, config.read_chunk_size),
            dispatcher: Dispatcher::new(executor),
            scheduler: HoldScheduler::new(config.hold_read_timeout),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Get the address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops the server (and any hold loop) from another thread.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn hold_state(&self) -> HoldState {
        HoldState::of(&self.conn)
    }

    pub fn is_shut_down(&self) -> bool {
        self.listener.is_none()
    }

    /// Run one bounded, non-blocking step.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if self.shutdown.is_triggered() {
            self.shutdown();
        }
        let Some(listener) = self.listener.as_ref() else {
            return report;
        };

        match self.conn.accept_if_needed(listener) {
            Ok(Some(addr)) => {
                info!("Client connected from {}", addr);
                report.accepted = Some(addr);
            }
            Ok(None) => {}
            Err(e) => warn!("Accept failed: {}", e),
        }
        if !self.conn.is_connected() {
            return report;
        }

        if let Err(e) = self.conn.pump_receive() {
            self.on_connection_error(e, &mut report);
            return report;
        }

        self.drain_messages(&mut report);

        if let Err(e) = self.conn.flush_nonblocking() {
            self.on_connection_error(e, &mut report);
        }
        report
    }

    /// Drop the client and close the listener. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        if self.conn.is_connected() {
            info!("Closing client connection for shutdown");
        }
        self.conn.reset();
        if self.listener.take().is_some() {
            info!("Bridge server on {} shut down", self.local_addr);
        }
    }

    /// Dispatch every complete message currently buffered, in arrival order.
    fn drain_messages(&mut self, report: &mut TickReport) {
        while self.conn.is_connected() {
            let body = match self.conn.try_extract_message() {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    self.on_connection_error(e, report);
                    break;
                }
            };

            let dispatched = self.dispatcher.handle(&body, HoldState::of(&self.conn));
            report.messages_handled += 1;
            queue_response(&mut self.conn, &dispatched.response);

            match dispatched.transition {
                Transition::EnterHold => self.hold(report),
                Transition::Release => self.conn.set_holding(false),
                Transition::Stay => {}
            }
        }
    }

    /// Serve the held connection until `RELEASE` or failure.
    fn hold(&mut self, report: &mut TickReport) {
        report.held = true;
        let dispatcher = &self.dispatcher;

        let exit = self
            .scheduler
            .run(&mut self.conn, &self.shutdown, |conn, body| {
                let dispatched = dispatcher.handle(body, HoldState::of(conn));
                queue_response(conn, &dispatched.response);
                if dispatched.transition == Transition::Release {
                    conn.set_holding(false);
                }
            });

        report.messages_handled += exit.handled();
        if let HoldExit::Failed { error, .. } = exit {
            self.on_connection_error(error, report);
        }
    }

    /// Log a connection-level error and make sure the client is gone.
    fn on_connection_error(&mut self, err: BridgeError, report: &mut TickReport) {
        if let BridgeError::FrameTooLarge { len, max } = err {
            warn!(
                "Rejecting {:?}: declared message size {} exceeds maximum {}",
                self.conn.peer_addr(),
                len,
                max
            );
            let failure = Failure::new(FailureReason::InvalidRequest(err.to_string()))
                .context("while reading message length prefix");
            queue_response(&mut self.conn, &Response::error(Value::Null, failure.traceback()));
            if let Err(e) = self.conn.flush_nonblocking() {
                debug!("Could not deliver size rejection: {}", e);
            }
        } else if matches!(err, BridgeError::PeerClosed) {
            info!("Client {:?} disconnected", self.conn.peer_addr());
        } else {
            info!("Dropping client {:?}: {}", self.conn.peer_addr(), err);
        }

        self.conn.reset();
        report.disconnected = true;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("connection", &self.conn)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

fn queue_response(conn: &mut Connection, response: &Response) {
    let Some(body) = encode_response(response) else {
        return;
    };
    if let Err(e) = conn.enqueue_message(&body) {
        error!("Could not frame response id={}: {}", response.id, e);
        let failure = Failure::new(FailureReason::Encode(e.to_string()));
        if let Some(body) = encode_response(&Response::error(response.id.clone(), failure.traceback())) {
            let _ = conn.enqueue_message(&body);
        }
    }
}
