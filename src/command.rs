//! The task execution command wire envelope.

use crate::error::TaskError;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;

/// Format used for the `when` message attribute: `dd/mm/yy HH:MM:SS`, UTC.
const WHEN_FORMAT: &str = "%d/%m/%y %H:%M:%S";

/// Render an instant the way the queue expects it in the `when` attribute.
pub fn format_when(when: DateTime<Utc>) -> String {
    when.format(WHEN_FORMAT).to_string()
}

/// Parse a `when` attribute value back into a UTC instant.
pub fn parse_when(raw: &str) -> Result<DateTime<Utc>, TaskError> {
    NaiveDateTime::parse_from_str(raw, WHEN_FORMAT)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| TaskError::InvalidWhen(format!("{raw}: {e}")))
}

/// Generate a fresh execution id (UUIDv4).
pub fn new_exec_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A message retrieved from a [`crate::queue::QueueAdapter`].
///
/// Mirrors what the queue actually hands back: an opaque receipt handle for
/// delete/change-visibility, the raw body, and the attributes the Consumer
/// needs to classify and schedule the command.
#[derive(Debug, Clone)]
pub struct Message {
    pub body: String,
    pub message_attributes: HashMap<String, String>,
    pub attributes: HashMap<String, String>,
    pub receipt_handle: String,
}

impl Message {
    pub fn task_name(&self) -> Option<&str> {
        self.message_attributes.get("task_name").map(String::as_str)
    }

    pub fn exec_id(&self) -> Option<&str> {
        self.message_attributes.get("exec_id").map(String::as_str)
    }

    pub fn when(&self) -> Option<&str> {
        self.message_attributes.get("when").map(String::as_str)
    }

    /// The queue-reported delivery count; `1` on first receive.
    pub fn approximate_receive_count(&self) -> u32 {
        self.attributes
            .get("ApproximateReceiveCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }
}
