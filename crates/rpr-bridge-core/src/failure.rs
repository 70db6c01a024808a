//! Request-level failures and their rendered tracebacks.
//!
//! A [`Failure`] never tears down the connection. The dispatcher turns each
//! one into an `error` response whose `traceback` is [`Failure::traceback`].

use std::fmt;
use thiserror::Error;

/// What went wrong while handling a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("DecodeError: {0}")]
    Decode(String),

    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("FunctionNotFound: function not allowed or not found: {name}")]
    FunctionNotFound { name: String },

    #[error("CallError: {name} failed: {message}")]
    CallFailed { name: String, message: String },

    #[error("Panic: {name} panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("EncodeError: {0}")]
    Encode(String),
}

/// A failure plus the chain of contexts it passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    reason: FailureReason,
    /// Innermost first.
    frames: Vec<String>,
}

impl Failure {
    pub fn new(reason: FailureReason) -> Self {
        Self {
            reason,
            frames: Vec::new(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Decode(message.into()))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureReason::InvalidRequest(message.into()))
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(FailureReason::FunctionNotFound { name: name.into() })
    }

    /// Add an outer context frame.
    pub fn context(mut self, frame: impl Into<String>) -> Self {
        self.frames.push(frame.into());
        self
    }

    pub fn reason(&self) -> &FailureReason {
        &self.reason
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Render the traceback string sent to the client.
    ///
    /// ```text
    /// Traceback (most recent context last):
    ///   0: while handling call request id=7
    ///   1: while calling DoesNotExist
    /// FunctionNotFound: function not allowed or not found: DoesNotExist
    /// ```
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent context last):\n");
        for (index, frame) in self.frames.iter().rev().enumerate() {
            out.push_str(&format!("  {}: {}\n", index, frame));
        }
        out.push_str(&self.reason.to_string());
        out
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reason, f)
    }
}

impl std::error::Error for Failure {}

impl From<FailureReason> for Failure {
    fn from(reason: FailureReason) -> Self {
        Self::new(reason)
    }
}

/// Extract a readable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traceback_orders_frames_outermost_first() {
        let failure = Failure::not_found("DoesNotExist")
            .context("while calling DoesNotExist")
            .context("while handling call request id=7");

        let tb = failure.traceback();
        let outer = tb.find("request id=7").unwrap();
        let inner = tb.find("while calling").unwrap();
        assert!(outer < inner);
        assert!(tb.ends_with("FunctionNotFound: function not allowed or not found: DoesNotExist"));
    }

    #[test]
    fn test_traceback_without_frames() {
        let tb = Failure::decode("expected value at line 1 column 1").traceback();
        assert_eq!(
            tb,
            "Traceback (most recent context last):\nDecodeError: expected value at line 1 column 1"
        );
    }

    #[test]
    fn test_panic_message_downcasts() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
