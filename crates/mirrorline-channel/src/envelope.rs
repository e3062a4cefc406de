//! Envelope formats crossing the channel boundary.
//!
//! Outbound calls are wrapped in an [`OutboundEnvelope`]; every inbound
//! delivery must pass [`InboundDelivery::validate`] before a subscriber sees
//! it. Request/response replies are normalized into a [`RequestResult`].

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{ChannelError, Result};

/// A plain JSON object.
pub type JsonObject = serde_json::Map<String, Value>;

/// Validation failures for inbound deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("delivery is not a JSON object")]
    NotAnObject,

    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),

    #[error("timestamp does not parse: {0}")]
    InvalidTimestamp(String),

    #[error("`data` is not a JSON object")]
    NonObjectData,
}

/// Per-call envelope options.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Use this correlation id instead of generating one.
    pub correlation_id: Option<String>,
    /// Prefix for a generated correlation id.
    pub correlation_prefix: Option<String>,
    /// Only these server handlers should receive the call.
    pub include_handlers: Option<Vec<String>>,
    /// These server handlers should not receive the call.
    pub exclude_handlers: Option<Vec<String>>,
    /// Session ids to exclude from any fan-out.
    pub exclude_sids: Option<Vec<String>>,
    /// Reply deadline for requests. `None` uses the channel default,
    /// `Some(Duration::ZERO)` waits forever.
    pub timeout: Option<Duration>,
}

impl EmitOptions {
    /// Options with an explicit correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Options with a correlation id prefix.
    pub fn with_correlation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.correlation_prefix = Some(prefix.into());
        self
    }

    /// Restrict delivery to the given handlers.
    pub fn include_handlers(mut self, handlers: Vec<String>) -> Self {
        self.include_handlers = Some(handlers);
        self
    }

    /// Skip the given handlers.
    pub fn exclude_handlers(mut self, handlers: Vec<String>) -> Self {
        self.exclude_handlers = Some(handlers);
        self
    }

    /// Set the reply deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Generate a UUIDv4 correlation id, optionally prefixed.
pub fn generate_correlation_id(prefix: Option<&str>) -> String {
    let id = uuid::Uuid::new_v4();
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}-{id}"),
        _ => id.to_string(),
    }
}

/// Canonical wrapper around every outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub ts: DateTime<Utc>,
    pub data: JsonObject,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_handlers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_handlers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_sids: Option<Vec<String>>,
}

impl OutboundEnvelope {
    /// Build an envelope for `data` stamped with the current time.
    ///
    /// `data` must serialize to a JSON object; `null` becomes `{}`.
    pub fn build<T: Serialize + ?Sized>(data: &T, options: &EmitOptions) -> Result<Self> {
        if options.include_handlers.is_some() && options.exclude_handlers.is_some() {
            return Err(ChannelError::InvalidOptions(
                "includeHandlers and excludeHandlers are mutually exclusive".into(),
            ));
        }

        let data = match serde_json::to_value(data)? {
            Value::Object(map) => map,
            Value::Null => JsonObject::new(),
            _ => {
                return Err(ChannelError::InvalidOptions(
                    "envelope data must be a JSON object".into(),
                ))
            }
        };

        let correlation_id = match &options.correlation_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => generate_correlation_id(options.correlation_prefix.as_deref()),
        };

        Ok(Self {
            ts: Utc::now(),
            data,
            correlation_id,
            include_handlers: options.include_handlers.clone(),
            exclude_handlers: options.exclude_handlers.clone(),
            exclude_sids: options.exclude_sids.clone(),
        })
    }

    /// Serialize to canonical JSON.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Byte length of the serialized envelope.
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }

    /// Fail with [`ChannelError::PayloadTooLarge`] when over `limit` bytes.
    pub fn check_size(&self, limit: usize) -> Result<usize> {
        let size = self.serialized_size()?;
        if size > limit {
            return Err(ChannelError::PayloadTooLarge { size, limit });
        }
        Ok(size)
    }
}

/// A validated server delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundDelivery {
    pub handler_id: String,
    pub event_id: String,
    pub correlation_id: String,
    pub ts: DateTime<Utc>,
    pub data: JsonObject,
}

impl InboundDelivery {
    /// Validate a raw delivery against the strict envelope schema.
    ///
    /// Identifiers must be non-empty strings, `ts` must be an RFC 3339
    /// string or epoch milliseconds, and `data` must be an object when
    /// present (absent or `null` yields `{}`).
    pub fn validate(raw: &Value) -> std::result::Result<Self, EnvelopeError> {
        let obj = raw.as_object().ok_or(EnvelopeError::NotAnObject)?;

        let handler_id = required_str(obj, "handlerId")?;
        let event_id = required_str(obj, "eventId")?;
        let correlation_id = required_str(obj, "correlationId")?;
        let ts = parse_timestamp(obj.get("ts"))?;

        let data = match obj.get("data") {
            None | Some(Value::Null) => JsonObject::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(EnvelopeError::NonObjectData),
        };

        Ok(Self {
            handler_id,
            event_id,
            correlation_id,
            ts,
            data,
        })
    }
}

fn required_str(obj: &JsonObject, field: &'static str) -> std::result::Result<String, EnvelopeError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(EnvelopeError::MissingField(field)),
    }
}

fn parse_timestamp(value: Option<&Value>) -> std::result::Result<DateTime<Utc>, EnvelopeError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| EnvelopeError::InvalidTimestamp(format!("{s:?}: {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| EnvelopeError::InvalidTimestamp(n.to_string())),
        _ => Err(EnvelopeError::MissingField("ts")),
    }
}

/// Error detail attached to a failed handler result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerErrorInfo {
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One handler's reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub handler_id: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HandlerErrorInfo>,
}

impl HandlerResult {
    fn malformed(message: String) -> Self {
        Self {
            ok: false,
            handler_id: String::new(),
            correlation_id: String::new(),
            data: None,
            error: Some(HandlerErrorInfo {
                code: MALFORMED_RESULT_CODE.to_owned(),
                message: Some(message),
            }),
        }
    }
}

/// Error code given to reply entries that are not handler results.
pub const MALFORMED_RESULT_CODE: &str = "malformed_result";

/// Normalized reply to a request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResult {
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub results: Vec<HandlerResult>,
}

impl RequestResult {
    /// Normalize a raw transport reply.
    ///
    /// Accepts `{correlationId, results: [...]}` or a bare results array.
    /// Entries that are not handler results keep their position as failed
    /// results with code [`MALFORMED_RESULT_CODE`]. A missing correlation id
    /// falls back to the one the request was sent with.
    pub fn normalize(raw: Value, sent_correlation_id: &str) -> Self {
        let (correlation_id, entries) = match raw {
            Value::Object(mut obj) => {
                let cid = obj
                    .remove("correlationId")
                    .and_then(|v| v.as_str().map(str::to_owned));
                let entries = match obj.remove("results") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                (cid, entries)
            }
            Value::Array(items) => (None, items),
            _ => (None, Vec::new()),
        };

        let results = entries
            .into_iter()
            .map(|item| match serde_json::from_value::<HandlerResult>(item) {
                Ok(result) => result,
                Err(e) => {
                    tracing::debug!(error = %e, "malformed handler result");
                    HandlerResult::malformed(e.to_string())
                }
            })
            .collect();

        Self {
            correlation_id: correlation_id.or_else(|| Some(sent_correlation_id.to_owned())),
            results,
        }
    }

    /// The first result, if it reports success.
    pub fn first_ok(&self) -> Option<&HandlerResult> {
        self.results.first().filter(|r| r.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_raw() -> Value {
        json!({
            "handlerId": "state",
            "eventId": "ev-1",
            "correlationId": "c-1",
            "ts": "2024-05-01T12:00:00Z",
            "data": { "seq": 4 }
        })
    }

    #[test]
    fn validate_accepts_complete_delivery() {
        let d = InboundDelivery::validate(&valid_raw()).unwrap();
        assert_eq!(d.handler_id, "state");
        assert_eq!(d.event_id, "ev-1");
        assert_eq!(d.correlation_id, "c-1");
        assert_eq!(d.data.get("seq"), Some(&json!(4)));
    }

    #[test]
    fn validate_defaults_data() {
        let mut raw = valid_raw();
        raw.as_object_mut().unwrap().remove("data");
        assert!(InboundDelivery::validate(&raw).unwrap().data.is_empty());

        raw["data"] = Value::Null;
        assert!(InboundDelivery::validate(&raw).unwrap().data.is_empty());
    }

    #[test]
    fn validate_rejects_bad_fields() {
        for field in ["handlerId", "eventId", "correlationId"] {
            let mut raw = valid_raw();
            raw[field] = json!("");
            assert_eq!(
                InboundDelivery::validate(&raw),
                Err(EnvelopeError::MissingField(field))
            );
        }

        let mut raw = valid_raw();
        raw["ts"] = json!("yesterday");
        assert!(matches!(
            InboundDelivery::validate(&raw),
            Err(EnvelopeError::InvalidTimestamp(_))
        ));

        let mut raw = valid_raw();
        raw["data"] = json!([1, 2]);
        assert_eq!(
            InboundDelivery::validate(&raw),
            Err(EnvelopeError::NonObjectData)
        );

        assert_eq!(
            InboundDelivery::validate(&json!("x")),
            Err(EnvelopeError::NotAnObject)
        );
    }

    #[test]
    fn validate_accepts_epoch_millis() {
        let mut raw = valid_raw();
        raw["ts"] = json!(1_714_564_800_000i64);
        let d = InboundDelivery::validate(&raw).unwrap();
        assert_eq!(d.ts.timestamp(), 1_714_564_800);
    }

    #[test]
    fn build_rejects_conflicting_handler_filters() {
        let opts = EmitOptions::default()
            .include_handlers(vec!["a".into()])
            .exclude_handlers(vec!["b".into()]);
        let err = OutboundEnvelope::build(&json!({}), &opts).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidOptions(_)));
    }

    #[test]
    fn build_rejects_non_object_data() {
        let err = OutboundEnvelope::build(&json!([1]), &EmitOptions::default()).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidOptions(_)));
    }

    #[test]
    fn build_generates_prefixed_correlation_id() {
        let opts = EmitOptions::default().with_correlation_prefix("hs");
        let env = OutboundEnvelope::build(&json!({"a": 1}), &opts).unwrap();
        assert!(env.correlation_id.starts_with("hs-"));
        assert_eq!(env.correlation_id.len(), "hs-".len() + 36);

        let opts = EmitOptions::default().with_correlation_id("fixed");
        let env = OutboundEnvelope::build(&Value::Null, &opts).unwrap();
        assert_eq!(env.correlation_id, "fixed");
        assert!(env.data.is_empty());
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let opts = EmitOptions::default()
            .with_correlation_id("c")
            .include_handlers(vec!["h".into()]);
        let value = OutboundEnvelope::build(&json!({}), &opts)
            .unwrap()
            .to_value()
            .unwrap();
        assert_eq!(value["correlationId"], json!("c"));
        assert_eq!(value["includeHandlers"], json!(["h"]));
        assert!(value.get("excludeHandlers").is_none());
    }

    #[test]
    fn size_ceiling_is_enforced() {
        let env = OutboundEnvelope::build(&json!({"blob": "x".repeat(256)}), &EmitOptions::default())
            .unwrap();
        let size = env.serialized_size().unwrap();
        assert!(env.check_size(size).is_ok());
        assert!(matches!(
            env.check_size(size - 1),
            Err(ChannelError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn normalize_reply_shapes() {
        let reply = RequestResult::normalize(
            json!({
                "correlationId": "srv",
                "results": [
                    { "ok": true, "handlerId": "state", "correlationId": "srv", "data": { "seq_base": 3 } },
                    "garbage"
                ]
            }),
            "sent",
        );
        assert_eq!(reply.correlation_id.as_deref(), Some("srv"));
        assert_eq!(reply.results.len(), 2);
        assert!(reply.first_ok().is_some());
        assert!(!reply.results[1].ok);

        let reply = RequestResult::normalize(
            json!([{ "ok": false, "handlerId": "state", "error": { "code": "busy" } }]),
            "sent",
        );
        assert_eq!(reply.correlation_id.as_deref(), Some("sent"));
        assert!(reply.first_ok().is_none());
        assert_eq!(reply.results[0].error.as_ref().unwrap().code, "busy");

        assert!(RequestResult::normalize(json!(null), "sent").results.is_empty());
    }

    #[test]
    fn malformed_first_result_is_not_ok() {
        let reply = RequestResult::normalize(
            json!([
                "x",
                { "ok": true, "handlerId": "h", "data": { "runtime_epoch": "e", "seq_base": 1 } }
            ]),
            "sent",
        );
        assert_eq!(reply.results.len(), 2);
        assert!(reply.first_ok().is_none());
        let error = reply.results[0].error.as_ref().unwrap();
        assert_eq!(error.code, MALFORMED_RESULT_CODE);
        assert!(reply.results[1].ok);
    }
}
