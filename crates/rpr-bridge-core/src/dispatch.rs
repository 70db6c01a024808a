//! Request dispatch.
//!
//! Turns one message body into exactly one [`Response`]. Nothing that happens
//! while handling a request escapes as a panic or an `Err`: decode problems,
//! unknown functions, host errors and host panics all become `error`
//! responses carrying the best-known request id.

use crate::executor::CallExecutor;
use crate::failure::{panic_message, Failure, FailureReason};
use crate::hold::{HoldScheduler, HoldState, Transition};
use crate::protocol::{Request, RequestKind, Response};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// Outcome of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub response: Response,
    pub transition: Transition,
}

/// Routes decoded requests to the executor or the hold scheduler.
#[derive(Debug)]
pub struct Dispatcher {
    executor: CallExecutor,
}

impl Dispatcher {
    pub fn new(executor: CallExecutor) -> Self {
        Self { executor }
    }

    /// Handle one message body received while the connection is in `state`.
    pub fn handle(&self, body: &[u8], state: HoldState) -> Dispatched {
        let mut id = Value::Null;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.try_handle(body, state, &mut id)))
            .unwrap_or_else(|payload| {
                Err(Failure::new(FailureReason::Panicked {
                    name: "dispatcher".to_string(),
                    message: panic_message(payload.as_ref()),
                }))
            });

        match outcome {
            Ok((value, transition)) => Dispatched {
                response: Response::result(id, value),
                transition,
            },
            Err(failure) => {
                debug!("Request id={} failed: {}", id, failure);
                Dispatched {
                    response: Response::error(id, failure.traceback()),
                    transition: Transition::Stay,
                }
            }
        }
    }

    /// Decode and route. `id` is filled in as soon as it can be recovered so
    /// that later failures still echo it.
    fn try_handle(
        &self,
        body: &[u8],
        state: HoldState,
        id: &mut Value,
    ) -> Result<(Value, Transition), Failure> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Failure::decode(format!("request is not valid UTF-8: {}", e)))?;
        let raw: Value = serde_json::from_str(text).map_err(|e| Failure::decode(e.to_string()))?;

        let Value::Object(fields) = &raw else {
            return Err(Failure::invalid_request(format!(
                "request must be an object, got {}",
                json_type_name(&raw)
            )));
        };
        *id = fields.get("id").cloned().unwrap_or(Value::Null);

        let request: Request = serde_json::from_value(raw).map_err(|e| {
            Failure::invalid_request(e.to_string())
                .context(format!("while decoding request id={}", id))
        })?;

        match request.kind {
            RequestKind::Call { name, args } => {
                debug!("call id={} {}({} arg(s))", id, name, args.len());
                let value = self
                    .executor
                    .execute(&name, args)
                    .map_err(|f| f.context(format!("while handling call request id={}", id)))?;
                Ok((value, Transition::Stay))
            }
            RequestKind::Control { cmd } => {
                let transition = HoldScheduler::on_control(state, cmd);
                debug!("control id={} {} in {:?} -> {:?}", id, cmd.as_str(), state, transition);
                Ok((Value::Null, transition))
            }
        }
    }
}

/// Encode a response body, degrading to an encode-error response if needed.
///
/// Returns `None` only when even the fallback cannot be encoded.
pub fn encode_response(response: &Response) -> Option<Vec<u8>> {
    match serde_json::to_vec(response) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            let failure = Failure::new(FailureReason::Encode(e.to_string()))
                .context(format!("while encoding response id={}", response.id));
            let fallback = Response::error(response.id.clone(), failure.traceback());
            match serde_json::to_vec(&fallback) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    error!("Dropping unencodable response id={}: {}", response.id, e);
                    None
                }
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
