//! Wire protocol types and framing.
//!
//! Every message is a 4-byte little-endian length prefix followed by a UTF-8
//! JSON body of exactly that length:
//!
//! ```text
//! [u32 LE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! There is no other framing: no magic, no checksum, no keepalive.

use crate::config::ProtocolConfig;
use crate::{BridgeError, Result};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

/// Request sent by a client.
///
/// `id` is any JSON value chosen by the client and echoed back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub kind: RequestKind,
}

/// The `type`-tagged part of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestKind {
    /// Invoke a registry function. `null` entries in `args` mean "omitted".
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Change session state.
    Control { cmd: ControlCommand },
}

/// Commands accepted by a `control` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlCommand {
    Hold,
    Release,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Hold => "HOLD",
            ControlCommand::Release => "RELEASE",
        }
    }
}

impl Request {
    /// Create a call request.
    pub fn call(id: impl Into<Value>, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            kind: RequestKind::Call {
                name: name.into(),
                args,
            },
        }
    }

    /// Create a control request.
    pub fn control(id: impl Into<Value>, cmd: ControlCommand) -> Self {
        Self {
            id: id.into(),
            kind: RequestKind::Control { cmd },
        }
    }
}

/// Response sent by the server, one per request, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub body: ResponseBody,
}

/// The `type`-tagged part of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseBody {
    Result {
        #[serde(default)]
        value: Value,
    },
    Error { traceback: String },
}

impl Response {
    /// Create a success response.
    pub fn result(id: Value, value: Value) -> Self {
        Self {
            id,
            body: ResponseBody::Result { value },
        }
    }

    /// Create an error response.
    pub fn error(id: Value, traceback: impl Into<String>) -> Self {
        Self {
            id,
            body: ResponseBody::Error {
                traceback: traceback.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error { .. })
    }
}

/// Prepend the length prefix to `body`.
pub fn encode_message(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = BytesMut::with_capacity(ProtocolConfig::LENGTH_PREFIX_SIZE + body.len());
    frame_into(&mut out, body)?;
    Ok(out.to_vec())
}

/// Append a framed copy of `body` to `dst`.
pub fn frame_into(dst: &mut BytesMut, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| BridgeError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(ProtocolConfig::LENGTH_PREFIX_SIZE + body.len());
    dst.put_u32_le(len);
    dst.put_slice(body);
    Ok(())
}

/// Read the declared body length once a full prefix is buffered.
pub fn split(buffer: &[u8]) -> Option<usize> {
    let prefix: [u8; 4] = buffer.get(..ProtocolConfig::LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix) as usize)
}

/// Read one length-prefixed frame from a blocking reader.
///
/// Returns `None` on clean EOF before the prefix (peer closed connection).
pub fn read_frame<R: Read>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_size {
        return Err(BridgeError::FrameTooLarge { len, max: max_size });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame to a blocking writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let framed = encode_message(payload)?;
    writer.write_all(&framed)?;
    writer.flush()?;
    Ok(())
}
