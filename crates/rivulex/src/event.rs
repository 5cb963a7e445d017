use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The header mapping carried alongside every event.
///
/// `timestamp` and `group` are populated by the codec on encode; `rejected`,
/// `rejected_group` and `rejected_timestamp` are populated by the processor
/// when an event is written to the dead-letter stream. Any other key a
/// publisher sets is preserved verbatim through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    pub timestamp: Option<String>,
    pub group: Option<String>,
    pub rejected: Option<bool>,
    #[serde(rename = "rejectedGroup")]
    pub rejected_group: Option<String>,
    #[serde(rename = "rejectedTimestamp")]
    pub rejected_timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Headers {
    /// True when this record was rejected by a group other than `self_group`,
    /// the condition under which a dead-letter consumer must skip it (§4.e).
    pub fn rejected_by_other_group(&self, self_group: &str) -> bool {
        self.rejected.unwrap_or(false)
            && self
                .rejected_group
                .as_deref()
                .map(|g| g != self_group)
                .unwrap_or(false)
    }
}

/// An event as handed to a subscriber's handler.
///
/// The `ack` capability is kept separate from this struct (see
/// [`crate::processor::Ack`]) and passed alongside it to the handler, rather
/// than embedded, so `Event` stays a plain, cloneable value type.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub stream: String,
    pub action: String,
    pub attempt: u64,
    pub headers: Headers,
    pub payload: Value,
}

/// An entry submitted to the publisher: an optional stream override plus the
/// action/payload/headers the codec will encode.
#[derive(Debug, Clone)]
pub struct PublishEntry {
    pub stream: Option<String>,
    pub action: String,
    pub payload: Value,
    pub headers: Headers,
}
