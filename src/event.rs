//! The `Event` capability boundary (§3, §9 "duck-typed event objects").
//!
//! The core never inspects an event beyond four operations: its type tag,
//! an optional timestamp, a validation predicate, and a JSON serialization.
//! Concrete event catalogues (the application's actual domain events) are
//! external collaborators; this module ships only the two variants the
//! core itself needs for its own tests and as a default for callers who
//! don't have a richer catalogue yet.

use crate::error::PipelineError;
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// An event the pipeline can validate, timestamp, and serialize.
///
/// Implementors are expected to be cheap to clone behind an `Arc` — the
/// pipeline moves `Arc<dyn Event>` between stages rather than cloning the
/// underlying data.
pub trait Event: Send + Sync + fmt::Debug {
    /// The type tag carried in the SSE `event:` field.
    fn event_type(&self) -> &str;

    /// Milliseconds since epoch, if the event carries one.
    fn timestamp(&self) -> Option<i64>;

    /// Reject malformed events before they enter the pipeline.
    fn validate(&self) -> Result<(), PipelineError>;

    /// JSON-serialize the event body (not including wire framing).
    fn serialize(&self) -> Result<Vec<u8>, PipelineError>;
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// An event carrying an arbitrary JSON payload with no type-specific
/// validation beyond "is this valid JSON" (enforced at construction).
#[derive(Debug, Clone)]
pub struct RawEvent {
    payload: Value,
    timestamp_ms: i64,
}

impl RawEvent {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            timestamp_ms: now_millis(),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

impl Event for RawEvent {
    fn event_type(&self) -> &str {
        "RAW"
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp_ms)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}

/// An event with an application-supplied type tag and JSON body.
///
/// Validation requires a non-empty type tag and an object- or array-shaped
/// body (mirrors the common "typed envelope" shape the catalogue real
/// callers plug in would use).
#[derive(Debug, Clone)]
pub struct CustomEvent {
    type_tag: String,
    payload: Value,
    timestamp_ms: i64,
}

impl CustomEvent {
    pub fn new(type_tag: impl Into<String>, payload: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
            timestamp_ms: now_millis(),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

impl Event for CustomEvent {
    fn event_type(&self) -> &str {
        &self.type_tag
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp_ms)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.type_tag.trim().is_empty() {
            return Err(PipelineError::Validation(
                "event type tag must not be empty".into(),
            ));
        }
        if !self.payload.is_object() && !self.payload.is_array() {
            return Err(PipelineError::Validation(
                "event payload must be a JSON object or array".into(),
            ));
        }
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_always_validates() {
        let e = RawEvent::new(serde_json::json!({"a": 1}));
        assert!(e.validate().is_ok());
        assert_eq!(e.event_type(), "RAW");
    }

    #[test]
    fn custom_event_rejects_empty_type() {
        let e = CustomEvent::new("", serde_json::json!({}));
        assert!(e.validate().is_err());
    }

    #[test]
    fn custom_event_rejects_scalar_payload() {
        let e = CustomEvent::new("A", serde_json::json!("just a string"));
        assert!(e.validate().is_err());
    }

    #[test]
    fn custom_event_serializes_payload_only() {
        let e = CustomEvent::new("A", serde_json::json!({"hi": true}));
        let bytes = e.serialize().unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v, serde_json::json!({"hi": true}));
    }
}
