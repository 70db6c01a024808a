//! Buffered connection state machine.
//!
//! Owns the single accepted socket and hides partial I/O from the dispatcher.
//! Outside hold mode every operation is non-blocking: would-block is "no
//! progress", never an error. In hold mode the socket is switched to blocking
//! with a short timeout and the `*_blocking` methods retry timeouts until a
//! full message is available or the send buffer is drained.
//!
//! Any fatal condition (peer close, hard I/O error) resets the connection
//! before the error is returned, so callers only need to log it.
//!
//! # Invariant
//!
//! At most one inbound message is being assembled: `expected_len` is set when
//! a length prefix has been consumed and cleared when its body is sliced out.

use crate::config::ProtocolConfig;
use crate::error::is_transient_io;
use crate::protocol::{frame_into, split};
use crate::shutdown::ShutdownSignal;
use crate::{BridgeError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{debug, info};

/// The server's one client connection, or the empty slot waiting for one.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    recv_buf: BytesMut,
    send_buf: BytesMut,
    expected_len: Option<usize>,
    holding: bool,
    max_message_size: usize,
    read_chunk_size: usize,
}

impl Connection {
    pub fn new(max_message_size: usize, read_chunk_size: usize) -> Self {
        Self {
            stream: None,
            peer: None,
            recv_buf: BytesMut::new(),
            send_buf: BytesMut::new(),
            expected_len: None,
            holding: false,
            max_message_size,
            read_chunk_size,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn set_holding(&mut self, holding: bool) {
        self.holding = holding;
    }

    /// Bytes queued but not yet written.
    pub fn pending_send(&self) -> usize {
        self.send_buf.len()
    }

    /// Bytes received but not yet consumed as a message.
    pub fn buffered_receive(&self) -> usize {
        self.recv_buf.len()
    }

    /// Accept a client if none is attached.
    ///
    /// Returns the peer address of a newly attached client. While a client is
    /// attached, new clients stay in the listen backlog.
    pub fn accept_if_needed(&mut self, listener: &TcpListener) -> Result<Option<SocketAddr>> {
        if self.stream.is_some() {
            return Ok(None);
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true)?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                }
                self.attach(stream, addr);
                Ok(Some(addr))
            }
            Err(e) if is_transient_io(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn attach(&mut self, stream: TcpStream, addr: SocketAddr) {
        self.reset();
        self.stream = Some(stream);
        self.peer = Some(addr);
    }

    /// One non-blocking read of up to `read_chunk_size` bytes.
    ///
    /// Returns the number of bytes appended (0 when nothing was available).
    pub fn pump_receive(&mut self) -> Result<usize> {
        match self.read_chunk() {
            Ok(n) => Ok(n),
            Err(e) if e.is_transient() => Ok(0),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Read once from the socket into the receive buffer.
    ///
    /// EOF is reported as `PeerClosed`; transient errors are passed through.
    fn read_chunk(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;

        let start = self.recv_buf.len();
        self.recv_buf.resize(start + self.read_chunk_size, 0);
        let result = stream.read(&mut self.recv_buf[start..]);
        let n = *result.as_ref().unwrap_or(&0);
        self.recv_buf.truncate(start + n);

        match result {
            Ok(0) => Err(BridgeError::PeerClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    /// Slice the next complete message body out of the receive buffer.
    ///
    /// Returns `Ok(None)` until a full prefix and body are buffered; call it
    /// repeatedly to drain pipelined messages. A declared length above the
    /// configured maximum yields `FrameTooLarge` without touching the socket.
    pub fn try_extract_message(&mut self) -> Result<Option<Bytes>> {
        if self.expected_len.is_none() {
            let Some(len) = split(&self.recv_buf) else {
                return Ok(None);
            };
            if len > self.max_message_size {
                return Err(BridgeError::FrameTooLarge {
                    len,
                    max: self.max_message_size,
                });
            }
            self.recv_buf.advance(ProtocolConfig::LENGTH_PREFIX_SIZE);
            self.expected_len = Some(len);
        }

        match self.expected_len {
            Some(len) if self.recv_buf.len() >= len => {
                self.expected_len = None;
                Ok(Some(self.recv_buf.split_to(len).freeze()))
            }
            _ => Ok(None),
        }
    }

    /// Append already-framed bytes to the send buffer.
    pub fn enqueue(&mut self, framed: &[u8]) {
        self.send_buf.extend_from_slice(framed);
    }

    /// Frame `body` and append it to the send buffer.
    pub fn enqueue_message(&mut self, body: &[u8]) -> Result<()> {
        frame_into(&mut self.send_buf, body)
    }

    /// One non-blocking write of the pending send buffer.
    ///
    /// Returns the number of bytes written; the unsent remainder is kept.
    pub fn flush_nonblocking(&mut self) -> Result<usize> {
        if self.send_buf.is_empty() || self.stream.is_none() {
            return Ok(0);
        }
        match self.write_once() {
            Ok(n) => Ok(n),
            Err(e) if e.is_transient() => Ok(0),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn write_once(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        match stream.write(&self.send_buf) {
            Ok(0) => Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
            Ok(n) => {
                self.send_buf.advance(n);
                Ok(n)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Switch the socket to blocking mode with `timeout` on reads and writes.
    pub fn enter_blocking(&mut self, timeout: Duration) -> Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(BridgeError::NotConnected);
        };
        let configured = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_read_timeout(Some(timeout)))
            .and_then(|()| stream.set_write_timeout(Some(timeout)));
        if let Err(e) = configured {
            self.reset();
            return Err(e.into());
        }
        Ok(())
    }

    /// Restore non-blocking mode. A failure here resets the connection.
    pub fn exit_blocking(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        if let Err(e) = stream.set_nonblocking(true) {
            info!("Could not restore non-blocking mode, dropping client: {}", e);
            self.reset();
        }
    }

    /// Wait for the next complete message.
    ///
    /// Already-buffered messages are returned first. Timeouts are retried
    /// after checking `shutdown`; EOF, hard errors and shutdown are fatal.
    pub fn recv_message_blocking(&mut self, shutdown: &ShutdownSignal) -> Result<Bytes> {
        loop {
            if let Some(body) = self.try_extract_message()? {
                return Ok(body);
            }
            match self.read_chunk() {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    if let Err(e) = shutdown.check() {
                        self.reset();
                        return Err(e);
                    }
                }
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    /// Write the whole send buffer, retrying timeouts.
    pub fn flush_blocking(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        while !self.send_buf.is_empty() {
            match self.write_once() {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    if let Err(e) = shutdown.check() {
                        self.reset();
                        return Err(e);
                    }
                }
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Drop the client and every piece of buffered state. Idempotent.
    pub fn reset(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(
                "Connection reset ({} bytes unread, {} bytes unsent)",
                self.recv_buf.len(),
                self.send_buf.len()
            );
        }
        self.peer = None;
        self.recv_buf.clear();
        self.send_buf.clear();
        self.expected_len = None;
        self.holding = false;
    }

    #[cfg(test)]
    pub(crate) fn extend_received(&mut self, data: &[u8]) {
        self.recv_buf.extend_from_slice(data);
    }
}
