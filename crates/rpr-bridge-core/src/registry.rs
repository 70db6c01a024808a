//! Host function registry.
//!
//! The bridge never hard-wires the functions it exposes. A host hands the
//! server a [`Registry`], and the executor resolves names against it per call.
//! [`FunctionTable`] is the stock implementation backed by a `HashMap`.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Values returned by a host function. `None` marks an absent value.
pub type Returns = Vec<Option<Value>>;

/// Error raised by a host function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallError {
    message: String,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn missing_argument(index: usize) -> Self {
        Self::new(format!("missing required argument #{}", index + 1))
    }

    pub fn invalid_argument(index: usize, expected: &str, actual: &Value) -> Self {
        Self::new(format!(
            "argument #{} must be {}, got {}",
            index + 1,
            expected,
            actual
        ))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Positional arguments of a call, after null-sentinel translation.
///
/// `None` means the caller omitted the argument. Trailing omitted arguments
/// have already been dropped, so `len()` is the number of positions the
/// caller actually bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    values: Vec<Option<Value>>,
}

impl CallArgs {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Option<Value>] {
        &self.values
    }

    /// The argument at `index`, or `None` if omitted or out of range.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn is_omitted(&self, index: usize) -> bool {
        self.get(index).is_none()
    }

    pub fn require(&self, index: usize) -> Result<&Value, CallError> {
        self.get(index)
            .ok_or_else(|| CallError::missing_argument(index))
    }

    pub fn i64(&self, index: usize) -> Result<i64, CallError> {
        let value = self.require(index)?;
        // Integral floats count as integers.
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| CallError::invalid_argument(index, "an integer", value))
    }

    pub fn f64(&self, index: usize) -> Result<f64, CallError> {
        let value = self.require(index)?;
        value
            .as_f64()
            .ok_or_else(|| CallError::invalid_argument(index, "a number", value))
    }

    pub fn str(&self, index: usize) -> Result<&str, CallError> {
        let value = self.require(index)?;
        value
            .as_str()
            .ok_or_else(|| CallError::invalid_argument(index, "a string", value))
    }

    pub fn bool(&self, index: usize) -> Result<bool, CallError> {
        let value = self.require(index)?;
        value
            .as_bool()
            .ok_or_else(|| CallError::invalid_argument(index, "a boolean", value))
    }
}

/// Something the executor can call.
pub trait Invocable {
    fn invoke(&self, args: &CallArgs) -> Result<Returns, CallError>;
}

impl<F> Invocable for F
where
    F: Fn(&CallArgs) -> Result<Returns, CallError>,
{
    fn invoke(&self, args: &CallArgs) -> Result<Returns, CallError> {
        self(args)
    }
}

/// Name → function lookup consumed by the executor.
pub trait Registry {
    fn resolve(&self, name: &str) -> Option<&dyn Invocable>;
}

/// `HashMap`-backed registry.
#[derive(Default)]
pub struct FunctionTable {
    functions: HashMap<String, Box<dyn Invocable>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&CallArgs) -> Result<Returns, CallError> + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    /// Register an already-boxed invocable.
    pub fn register_boxed(&mut self, name: impl Into<String>, invocable: Box<dyn Invocable>) -> &mut Self {
        self.functions.insert(name.into(), invocable);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Registry for FunctionTable {
    fn resolve(&self, name: &str) -> Option<&dyn Invocable> {
        self.functions.get(name).map(|f| f.as_ref())
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.names())
            .finish()
    }
}
