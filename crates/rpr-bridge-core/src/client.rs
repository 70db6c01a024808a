//! Blocking client for the bridge.
//!
//! One request is in flight at a time: `call` writes a frame, then blocks for
//! the matching response. Ids are assigned from a per-client counter and every
//! response id is checked against the request it answers.
//!
//! ```no_run
//! use rpr_bridge_core::BridgeClient;
//! use serde_json::json;
//!
//! let mut client = BridgeClient::new("127.0.0.1:9999".parse().unwrap());
//! client.connect()?;
//! {
//!     let mut held = client.hold()?;
//!     for i in 0..100 {
//!         held.call("RPR_AddProjectMarker", vec![json!(0), json!(false), json!(i)])?;
//!     }
//! } // RELEASE is sent here
//! # Ok::<(), rpr_bridge_core::BridgeError>(())
//! ```

use crate::config::{ClientDefaults, ProtocolConfig};
use crate::protocol::{read_frame, write_frame, ControlCommand, Request, Response, ResponseBody};
use crate::{BridgeError, Result};
use serde_json::Value;
use std::net::{SocketAddr, TcpStream};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{debug, warn};

/// Blocking bridge client.
#[derive(Debug)]
pub struct BridgeClient {
    addr: SocketAddr,
    timeout: Option<Duration>,
    stream: Option<TcpStream>,
    next_id: u64,
    holding: bool,
}

impl BridgeClient {
    /// Create an unconnected client with the default I/O timeout.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Some(ClientDefaults::IO_TIMEOUT),
            stream: None,
            next_id: 1,
            holding: false,
        }
    }

    /// Set the connect/read/write timeout (`None` blocks indefinitely).
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Connect if not already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&self.addr, timeout)?,
            None => TcpStream::connect(self.addr)?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;

        debug!("Bridge client connected to {}", self.addr);
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the connection. Hold state is forgotten.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.holding = false;
    }

    /// Call a registry function and return its packed result value.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.take_id();
        self.round_trip(Request::call(id, name, args), id)
    }

    /// Enter hold mode. `RELEASE` is sent when the guard is dropped.
    pub fn hold(&mut self) -> Result<HoldGuard<'_>> {
        if self.holding {
            return Err(BridgeError::HoldNesting);
        }
        self.control(ControlCommand::Hold)?;
        self.holding = true;
        Ok(HoldGuard { client: self })
    }

    /// Leave hold mode. A no-op when not holding.
    pub fn release(&mut self) -> Result<()> {
        if !self.holding {
            return Ok(());
        }
        let result = self.control(ControlCommand::Release);
        self.holding = false;
        result
    }

    fn control(&mut self, cmd: ControlCommand) -> Result<()> {
        let id = self.take_id();
        self.round_trip(Request::control(id, cmd), id).map(|_| ())
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn round_trip(&mut self, request: Request, id: u64) -> Result<Value> {
        self.connect()?;
        let payload = serde_json::to_vec(&request)?;

        let response = match self.exchange(&payload) {
            Ok(response) => response,
            Err(e) => {
                // The stream position is unknown after a failed exchange.
                self.close();
                return Err(e);
            }
        };

        if response.id != Value::from(id) {
            self.close();
            return Err(BridgeError::ResponseMismatch {
                expected: id,
                actual: response.id.to_string(),
            });
        }

        match response.body {
            ResponseBody::Result { value } => Ok(value),
            ResponseBody::Error { traceback } => Err(BridgeError::Remote { traceback }),
        }
    }

    fn exchange(&mut self, payload: &[u8]) -> Result<Response> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        write_frame(stream, payload)?;
        let body = read_frame(stream, ProtocolConfig::MAX_MESSAGE_SIZE)?
            .ok_or(BridgeError::PeerClosed)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scope of a hold. Derefs to the client so calls go through it.
#[derive(Debug)]
pub struct HoldGuard<'a> {
    client: &'a mut BridgeClient,
}

impl HoldGuard<'_> {
    /// Release explicitly and observe the result.
    pub fn release(self) -> Result<()> {
        let mut guard = std::mem::ManuallyDrop::new(self);
        guard.client.release()
    }
}

impl Deref for HoldGuard<'_> {
    type Target = BridgeClient;

    fn deref(&self) -> &BridgeClient {
        self.client
    }
}

impl DerefMut for HoldGuard<'_> {
    fn deref_mut(&mut self) -> &mut BridgeClient {
        self.client
    }
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.client.release() {
            warn!("Failed to release hold: {}", e);
        }
    }
}
