//! Lazy messages and error messages
//!
//! A [`MessageSupplier`] is a capability that produces a structured message
//! on demand. Suppliers are captured on the hot path but only evaluated at
//! serialization time, so building the message text can be arbitrarily
//! expensive without affecting instrumented code.

use crate::stack_trace::CapturedStackTrace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Structured message: display text plus an arbitrary nested detail map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    /// Nested detail for display; not indexed.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub detail: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a plain text message with no detail.
    pub fn text(text: impl Into<String>) -> Self {
        Message {
            text: text.into(),
            detail: serde_json::Map::new(),
        }
    }

    /// Attach a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.detail.insert(key.into(), value);
        self
    }
}

/// Produces a [`Message`] on demand.
///
/// Never evaluated on the hot path; only at snapshot/serialization time.
pub trait MessageSupplier: Send + Sync {
    fn get(&self) -> Message;
}

impl<F> MessageSupplier for F
where
    F: Fn() -> Message + Send + Sync,
{
    fn get(&self) -> Message {
        self()
    }
}

/// Supplier wrapping an already-built message.
#[derive(Debug, Clone)]
pub struct ConstantMessageSupplier(Message);

impl ConstantMessageSupplier {
    pub fn new(message: Message) -> Self {
        Self(message)
    }
}

impl MessageSupplier for ConstantMessageSupplier {
    fn get(&self) -> Message {
        self.0.clone()
    }
}

/// Convenience constructor for the common fixed-text case.
pub fn constant_message(text: impl Into<String>) -> Arc<dyn MessageSupplier> {
    Arc::new(ConstantMessageSupplier(Message::text(text)))
}

/// Details of a host-application exception attached to an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error type as reported by the host, e.g. `io::Error`.
    pub type_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<CapturedStackTrace>,
}

/// An error recorded on an entry or transaction.
///
/// Errors are data, not control flow: they ride along on entries and are
/// reported via snapshots and aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
}

impl ErrorMessage {
    /// Error with a display message and no underlying exception.
    pub fn text(message: impl Into<String>) -> Self {
        ErrorMessage {
            message: message.into(),
            exception: None,
        }
    }

    /// Error built from a host error value.
    pub fn from_error(type_name: impl Into<String>, err: &dyn std::error::Error) -> Self {
        let message = err.to_string();
        ErrorMessage {
            message: message.clone(),
            exception: Some(ExceptionInfo {
                type_name: type_name.into(),
                message,
                stack_trace: None,
            }),
        }
    }

    /// True when there is neither a message nor an exception to report.
    pub fn is_empty(&self) -> bool {
        self.message.is_empty() && self.exception.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_message_supplier() {
        let supplier = constant_message("GET /users");
        assert_eq!(supplier.get().text, "GET /users");
    }

    #[test]
    fn test_closure_supplier_is_lazy() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let evaluations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evaluations);
        let supplier: Arc<dyn MessageSupplier> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Message::text("expensive")
        });
        assert_eq!(evaluations.load(Ordering::SeqCst), 0);
        supplier.get();
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_detail_roundtrip() {
        let message = Message::text("SELECT")
            .with_detail("rows", serde_json::json!(42))
            .with_detail("sql", serde_json::json!("select * from users"));
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_error_message_from_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = ErrorMessage::from_error("io::Error", &io);
        assert_eq!(error.message, "disk on fire");
        assert_eq!(error.exception.as_ref().unwrap().type_name, "io::Error");
    }

    #[test]
    fn test_error_message_is_empty() {
        assert!(ErrorMessage::text("").is_empty());
        assert!(!ErrorMessage::text("boom").is_empty());
    }
}
