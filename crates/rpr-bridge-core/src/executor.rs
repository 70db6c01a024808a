//! Call execution against the injected registry.
//!
//! Handles the two marshalling rules that are part of the wire contract:
//!
//! - **Arguments**: a JSON `null` means "argument omitted", not "argument is
//!   null". Trailing omitted arguments are dropped, so `f(1, null)` binds
//!   exactly like `f(1)`.
//! - **Returns**: zero values pack to `null`, one value packs to itself, two
//!   or more pack to an array with absent entries as `null`.

use crate::failure::{panic_message, Failure, FailureReason};
use crate::registry::{CallArgs, Registry, Returns};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Resolves and invokes registry functions.
pub struct CallExecutor {
    registry: Box<dyn Registry>,
    allowed_prefix: Option<String>,
}

impl CallExecutor {
    pub fn new(registry: Box<dyn Registry>) -> Self {
        Self {
            registry,
            allowed_prefix: None,
        }
    }

    /// Restrict callable names to those starting with `prefix`.
    pub fn with_allowed_prefix(mut self, prefix: Option<String>) -> Self {
        self.allowed_prefix = prefix;
        self
    }

    /// Call `name` with wire-level `args` and pack the result.
    pub fn execute(&self, name: &str, args: Vec<Value>) -> Result<Value, Failure> {
        if let Some(prefix) = &self.allowed_prefix {
            if !name.starts_with(prefix.as_str()) {
                return Err(Failure::not_found(name)
                    .context(format!("while resolving {} (allowed prefix {:?})", name, prefix)));
            }
        }

        let function = self
            .registry
            .resolve(name)
            .ok_or_else(|| Failure::not_found(name).context(format!("while resolving {}", name)))?;

        let args = translate_args(args);
        debug!("Invoking {} with {} bound argument(s)", name, args.len());

        match catch_unwind(AssertUnwindSafe(|| function.invoke(&args))) {
            Ok(Ok(values)) => Ok(pack_returns(values)),
            Ok(Err(err)) => Err(Failure::new(FailureReason::CallFailed {
                name: name.to_string(),
                message: err.to_string(),
            })
            .context(format!("while calling {}", name))),
            Err(payload) => Err(Failure::new(FailureReason::Panicked {
                name: name.to_string(),
                message: panic_message(payload.as_ref()),
            })
            .context(format!("while calling {}", name))),
        }
    }
}

impl std::fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallExecutor")
            .field("allowed_prefix", &self.allowed_prefix)
            .finish_non_exhaustive()
    }
}

/// Translate null sentinels to omitted arguments and drop the trailing ones.
pub fn translate_args(args: Vec<Value>) -> CallArgs {
    let mut values: Vec<Option<Value>> = args
        .into_iter()
        .map(|value| match value {
            Value::Null => None,
            other => Some(other),
        })
        .collect();
    while matches!(values.last(), Some(None)) {
        values.pop();
    }
    CallArgs::new(values)
}

/// Pack host return values into the single wire `value`.
pub fn pack_returns(values: Returns) -> Value {
    let mut values = values;
    match values.len() {
        0 => Value::Null,
        1 => values.pop().flatten().unwrap_or(Value::Null),
        _ => Value::Array(
            values
                .into_iter()
                .map(|value| value.unwrap_or(Value::Null))
                .collect(),
        ),
    }
}
