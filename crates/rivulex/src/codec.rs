use redis::{streams::StreamId, ToRedisArgs, Value};
use serde::de::Error as _;

use rivulex_helpers::time::rfc3339_from_unix_secs;

use crate::errors::RivulexError;
use crate::event::{Event, Headers};

/// The ordered field pairs a codec-encoded record is appended to a stream
/// with, grounded in the teacher's `StreamRedisArgParts` shape.
#[derive(Debug)]
pub struct EncodedRecord {
    pub fields: Vec<(&'static str, String)>,
}

impl EncodedRecord {
    /// Field/value pairs in the shape `xadd` expects.
    pub fn as_redis_args(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

/// Encodes an event for publication: `payload` and `headers` are
/// JSON-serialised, with `headers` augmented with `timestamp = now` and
/// `group` before serialisation (§4.a).
pub fn encode(
    action: &str,
    payload: &serde_json::Value,
    mut headers: Headers,
    group: &str,
    now_unix_secs: u64,
) -> Result<EncodedRecord, RivulexError> {
    headers.timestamp = Some(rfc3339_from_unix_secs(now_unix_secs));
    headers.group = Some(group.to_string());

    let payload_json = serde_json::to_string(payload)?;
    let headers_json = serde_json::to_string(&headers)?;

    Ok(EncodedRecord {
        fields: vec![
            ("action", action.to_string()),
            ("payload", payload_json),
            ("headers", headers_json),
        ],
    })
}

/// Decodes a raw stream record into an in-memory [`Event`].
///
/// Tolerates both the 6-field (no `attempt`) and 8-field (with `attempt`)
/// wire shapes; a missing `attempt` defaults to 0. A parse failure is fatal
/// for the individual event only — callers must skip the record without
/// acknowledging it, letting the pending consumer reclaim it later (§4.a,
/// §7 kind 4).
pub fn decode(stream: &str, stream_id: &StreamId) -> Result<Event, RivulexError> {
    let action = field_as_string(stream_id, "action")?;
    let payload_json = field_as_string(stream_id, "payload")?;
    let headers_json = field_as_string(stream_id, "headers")?;

    let payload: serde_json::Value = serde_json::from_str(&payload_json)?;
    let headers: Headers = serde_json::from_str(&headers_json)?;

    let attempt = match stream_id.map.get("attempt") {
        Some(value) => field_value_to_string("attempt", value)?
            .parse::<u64>()
            .unwrap_or_default(),
        None => 0,
    };

    Ok(Event {
        id: stream_id.id.clone(),
        stream: stream.to_string(),
        action,
        attempt,
        headers,
        payload,
    })
}

fn field_as_string(stream_id: &StreamId, field: &str) -> Result<String, RivulexError> {
    let value = stream_id.map.get(field).ok_or_else(|| {
        RivulexError::Decode(serde_json::Error::custom(format!(
            "missing required field `{field}` on stream record"
        )))
    })?;
    field_value_to_string(field, value)
}

fn field_value_to_string(field: &str, value: &Value) -> Result<String, RivulexError> {
    match value {
        Value::BulkString(data) => Ok(String::from_utf8_lossy(data).into_owned()),
        Value::SimpleString(data) => Ok(data.clone()),
        other => Err(RivulexError::Decode(serde_json::Error::custom(format!(
            "expected field `{field}` to be a string, got {other:?}"
        )))),
    }
}

/// Blanket impl so [`EncodedRecord`] can be passed straight to
/// [`rivulex_helpers::redis::ConnectionWrapper::xadd`].
impl ToRedisArgs for EncodedRecord {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + redis::RedisWrite,
    {
        for (k, v) in &self.fields {
            k.write_redis_args(out);
            v.write_redis_args(out);
        }
    }

    fn is_single_arg(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stream_id(fields: &[(&str, &str)]) -> StreamId {
        let mut map = HashMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), Value::BulkString(v.as_bytes().to_vec()));
        }
        StreamId {
            id: "1700000000000-0".to_string(),
            map,
        }
    }

    #[test]
    fn test_decode_tolerates_missing_attempt_field() {
        let id = stream_id(&[
            ("action", "u_created"),
            ("payload", r#"{"id":"1"}"#),
            ("headers", r#"{"timestamp":"2024-01-01T00:00:00Z","group":"g"}"#),
        ]);

        let event = decode("users", &id).unwrap();
        assert_eq!(event.attempt, 0);
        assert_eq!(event.action, "u_created");
        assert_eq!(event.headers.group.as_deref(), Some("g"));
    }

    #[test]
    fn test_decode_reads_attempt_field_when_present() {
        let id = stream_id(&[
            ("action", "u_created"),
            ("payload", "{}"),
            ("headers", "{}"),
            ("attempt", "2"),
        ]);

        let event = decode("users", &id).unwrap();
        assert_eq!(event.attempt, 2);
    }

    #[test]
    fn test_encode_then_decode_round_trips_modulo_injected_headers() {
        let payload = serde_json::json!({"id": "1"});
        let headers = Headers::default();
        let encoded = encode("u_created", &payload, headers, "my_group", 1_700_000_000).unwrap();

        let mut map = HashMap::new();
        for (k, v) in &encoded.fields {
            map.insert(k.to_string(), Value::BulkString(v.clone().into_bytes()));
        }
        let stream_id = StreamId {
            id: "1700000000000-0".to_string(),
            map,
        };

        let decoded = decode("users", &stream_id).unwrap();
        assert_eq!(decoded.action, "u_created");
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.headers.group.as_deref(), Some("my_group"));
        assert!(decoded.headers.timestamp.is_some());
        assert_eq!(decoded.attempt, 0);
    }

    #[test]
    fn test_decode_errors_on_malformed_json_payload() {
        let id = stream_id(&[("action", "a"), ("payload", "{not json"), ("headers", "{}")]);

        assert!(decode("users", &id).is_err());
    }
}
