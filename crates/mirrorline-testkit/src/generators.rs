//! Proptest generators for property-based testing.

use chrono::{TimeZone, Utc};
use mirrorline_sync::{ResumeCursors, StateRequest};
use proptest::prelude::*;
use serde_json::{json, Value};

/// A non-blank identifier.
pub fn identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}".prop_map(String::from)
}

/// A string that is empty after trimming.
pub fn blank() -> impl Strategy<Value = String> {
    "[ \t]{0,3}".prop_map(String::from)
}

/// A timestamp in either accepted wire form.
pub fn wire_timestamp() -> impl Strategy<Value = Value> {
    (0i64..4_102_444_800_000, any::<bool>()).prop_map(|(ms, as_string)| {
        if as_string {
            let dt = Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);
            Value::String(dt.to_rfc3339())
        } else {
            json!(ms)
        }
    })
}

/// A small JSON object.
pub fn json_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(identifier(), any::<i32>(), 0..4).prop_map(|m| json!(m))
}

/// A delivery envelope that passes validation.
pub fn valid_delivery() -> impl Strategy<Value = Value> {
    (
        identifier(),
        identifier(),
        identifier(),
        wire_timestamp(),
        prop_oneof![json_object(), Just(Value::Null)],
    )
        .prop_map(|(handler, event, cid, ts, data)| {
            json!({
                "handlerId": handler,
                "eventId": event,
                "correlationId": cid,
                "ts": ts,
                "data": data,
            })
        })
}

/// A delivery envelope that must be rejected.
pub fn invalid_delivery() -> impl Strategy<Value = Value> {
    let fields = ["handlerId", "eventId", "correlationId", "ts"];
    (valid_delivery(), 0usize..fields.len(), blank(), 0u8..3).prop_map(move |(mut env, field, blank, how)| {
        let obj = env.as_object_mut().expect("delivery is an object");
        match how {
            0 => {
                obj.remove(fields[field]);
            }
            1 => {
                obj.insert(fields[field].to_owned(), Value::String(blank));
            }
            _ => {
                obj.insert("data".to_owned(), json!([1, 2, 3]));
            }
        }
        env
    })
}

pub fn resume_cursors() -> impl Strategy<Value = ResumeCursors> {
    (0u64..50, 0u64..50).prop_map(|(l, n)| ResumeCursors::new(l, n))
}

/// A handshake request over a small set of contexts.
pub fn state_request() -> impl Strategy<Value = StateRequest> {
    (
        prop_oneof![Just(None), Just(Some("ctx-a".to_owned())), Just(Some("ctx-b".to_owned()))],
        resume_cursors(),
        any::<bool>(),
    )
        .prop_map(|(context, cursors, full)| {
            if full {
                StateRequest::full(context, None)
            } else {
                StateRequest::resume(context, cursors, None)
            }
        })
}
