//! Sync protocol message types.
//!
//! These ride inside channel envelopes: `state_request` (handshake),
//! `state_push` (server snapshot) and `server_restart` (UX hint).

use mirrorline_channel::{JsonObject, RequestResult, MALFORMED_RESULT_CODE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandshakeFailure;

/// Resumption cursors. Lower values ask for more history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResumeCursors {
    pub log_from: u64,
    pub notifications_from: u64,
}

impl ResumeCursors {
    /// Cursors requesting everything from the start.
    pub const FULL: ResumeCursors = ResumeCursors {
        log_from: 0,
        notifications_from: 0,
    };

    pub const fn new(log_from: u64, notifications_from: u64) -> Self {
        Self {
            log_from,
            notifications_from,
        }
    }

    /// True if `self` asks for at least as much history as `other` on both axes.
    pub fn covers(&self, other: &ResumeCursors) -> bool {
        self.log_from <= other.log_from && self.notifications_from <= other.notifications_from
    }

    /// Smallest window covering both.
    pub fn union(&self, other: &ResumeCursors) -> ResumeCursors {
        ResumeCursors {
            log_from: self.log_from.min(other.log_from),
            notifications_from: self.notifications_from.min(other.notifications_from),
        }
    }
}

/// Payload of a `state_request` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    /// Target context (task or conversation) being synchronized.
    #[serde(default)]
    pub context_id: Option<String>,
    pub log_from: u64,
    pub notifications_from: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Full reset: the server must resend everything and the client drops its baseline.
    #[serde(default)]
    pub full: bool,
}

impl StateRequest {
    /// A request resuming from `cursors`.
    pub fn resume(context_id: Option<String>, cursors: ResumeCursors, timezone: Option<String>) -> Self {
        Self {
            context_id,
            log_from: cursors.log_from,
            notifications_from: cursors.notifications_from,
            timezone,
            full: false,
        }
    }

    /// A forced full resynchronization.
    pub fn full(context_id: Option<String>, timezone: Option<String>) -> Self {
        Self {
            full: true,
            ..Self::resume(context_id, ResumeCursors::FULL, timezone)
        }
    }

    pub fn cursors(&self) -> ResumeCursors {
        ResumeCursors::new(self.log_from, self.notifications_from)
    }

    pub fn same_context(&self, other: &StateRequest) -> bool {
        self.context_id == other.context_id
    }

    /// True if answering `self` also answers `other`.
    ///
    /// Requires the same context, a window at least as wide, and a full
    /// reset whenever `other` demands one.
    pub fn covers(&self, other: &StateRequest) -> bool {
        self.same_context(other)
            && (self.full || !other.full)
            && self.cursors().covers(&other.cursors())
    }

    /// Combine two same-context requests into one covering both.
    pub fn merged(&self, other: &StateRequest) -> StateRequest {
        let cursors = self.cursors().union(&other.cursors());
        StateRequest {
            context_id: other.context_id.clone(),
            log_from: cursors.log_from,
            notifications_from: cursors.notifications_from,
            timezone: other.timezone.clone().or_else(|| self.timezone.clone()),
            full: self.full || other.full,
        }
    }
}

/// Consistency baseline established by a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub runtime_epoch: String,
    pub seq_base: u64,
    /// Snapshot delivered with the handshake reply, if any.
    pub snapshot: Option<JsonObject>,
}

impl Baseline {
    /// Extract the baseline from a handshake reply.
    pub fn from_reply(reply: &RequestResult) -> Result<Self, HandshakeFailure> {
        let first = reply
            .results
            .first()
            .ok_or_else(|| HandshakeFailure::Malformed("reply carried no results".into()))?;

        if !first.ok {
            if first.error.as_ref().map_or(false, |e| e.code == MALFORMED_RESULT_CODE) {
                return Err(HandshakeFailure::Malformed("first result is not a handler result".into()));
            }
            let code = first
                .error
                .as_ref()
                .map(|e| e.code.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "unknown".into());
            return Err(HandshakeFailure::Rejected { code });
        }

        let data = first
            .data
            .as_ref()
            .ok_or_else(|| HandshakeFailure::Malformed("reply carried no data".into()))?;

        let runtime_epoch = data
            .get("runtime_epoch")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandshakeFailure::Malformed("missing runtime_epoch".into()))?
            .to_owned();

        let seq_base = data
            .get("seq_base")
            .and_then(Value::as_u64)
            .ok_or_else(|| HandshakeFailure::Malformed("missing seq_base".into()))?;

        let snapshot = data.get("snapshot").and_then(Value::as_object).cloned();

        Ok(Self {
            runtime_epoch,
            seq_base,
            snapshot,
        })
    }
}

/// Why a `state_push` payload could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushParseError {
    MissingEpoch,
    MissingSeq,
}

/// A decoded `state_push`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePush {
    pub runtime_epoch: String,
    pub seq: u64,
    pub snapshot: JsonObject,
}

impl StatePush {
    pub fn parse(data: &JsonObject) -> Result<Self, PushParseError> {
        let runtime_epoch = data
            .get("runtime_epoch")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(PushParseError::MissingEpoch)?
            .to_owned();
        let seq = data
            .get("seq")
            .and_then(Value::as_u64)
            .ok_or(PushParseError::MissingSeq)?;
        let snapshot = data
            .get("snapshot")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            runtime_epoch,
            seq,
            snapshot,
        })
    }
}

/// Runtime id announced by a `server_restart` delivery.
pub fn restart_runtime_id(data: &JsonObject) -> Option<String> {
    ["runtime_id", "runtime_epoch"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> JsonObject {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn cursor_coverage() {
        let wide = ResumeCursors::new(0, 5);
        let narrow = ResumeCursors::new(3, 5);
        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
        assert!(wide.covers(&wide));

        let a = ResumeCursors::new(1, 9);
        let b = ResumeCursors::new(4, 2);
        assert!(!a.covers(&b) && !b.covers(&a));
        assert_eq!(a.union(&b), ResumeCursors::new(1, 2));
    }

    #[test]
    fn request_coverage_respects_context_and_full() {
        let ctx = Some("task-1".to_string());
        let full = StateRequest::full(ctx.clone(), None);
        let partial = StateRequest::resume(ctx.clone(), ResumeCursors::new(10, 10), None);
        let zero_partial = StateRequest::resume(ctx.clone(), ResumeCursors::FULL, None);

        assert!(full.covers(&partial));
        assert!(full.covers(&full));
        assert!(!partial.covers(&full));
        assert!(!zero_partial.covers(&full));

        let other = StateRequest::full(Some("task-2".into()), None);
        assert!(!full.covers(&other));
    }

    #[test]
    fn merged_request_covers_both() {
        let ctx = Some("c".to_string());
        let a = StateRequest::resume(ctx.clone(), ResumeCursors::new(1, 9), None);
        let b = StateRequest::resume(ctx.clone(), ResumeCursors::new(4, 2), Some("UTC".into()));
        let m = a.merged(&b);
        assert!(m.covers(&a) && m.covers(&b));
        assert_eq!(m.timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn request_wire_shape() {
        let req = StateRequest::resume(Some("t".into()), ResumeCursors::new(7, 3), Some("Europe/Oslo".into()));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["context_id"], json!("t"));
        assert_eq!(v["log_from"], json!(7));
        assert_eq!(v["notifications_from"], json!(3));
        assert_eq!(v["timezone"], json!("Europe/Oslo"));
        assert_eq!(v["full"], json!(false));
    }

    #[test]
    fn baseline_from_reply() {
        let reply = RequestResult::normalize(
            json!({ "results": [ { "ok": true, "handlerId": "state", "correlationId": "c",
                "data": { "runtime_epoch": "e1", "seq_base": 10, "snapshot": { "logs": [] } } } ] }),
            "c",
        );
        let baseline = Baseline::from_reply(&reply).unwrap();
        assert_eq!(baseline.runtime_epoch, "e1");
        assert_eq!(baseline.seq_base, 10);
        assert!(baseline.snapshot.is_some());
    }

    #[test]
    fn baseline_failures_are_classified() {
        let empty = RequestResult::default();
        assert!(matches!(Baseline::from_reply(&empty), Err(HandshakeFailure::Malformed(_))));

        let rejected = RequestResult::normalize(
            json!([{ "ok": false, "handlerId": "state", "error": { "code": "context_not_found" } }]),
            "c",
        );
        assert_eq!(
            Baseline::from_reply(&rejected),
            Err(HandshakeFailure::Rejected { code: "context_not_found".into() })
        );

        let no_seq = RequestResult::normalize(
            json!([{ "ok": true, "handlerId": "state", "data": { "runtime_epoch": "e1" } }]),
            "c",
        );
        assert!(matches!(Baseline::from_reply(&no_seq), Err(HandshakeFailure::Malformed(_))));
    }

    #[test]
    fn malformed_first_result_fails_even_if_later_ok() {
        let reply = RequestResult::normalize(
            json!([
                "x",
                { "ok": true, "handlerId": "h", "data": { "runtime_epoch": "e", "seq_base": 1 } }
            ]),
            "c",
        );
        assert!(matches!(Baseline::from_reply(&reply), Err(HandshakeFailure::Malformed(_))));
    }

    #[test]
    fn push_parsing() {
        let push = StatePush::parse(&obj(json!({ "runtime_epoch": "e1", "seq": 11, "snapshot": { "a": 1 } }))).unwrap();
        assert_eq!(push.seq, 11);
        assert_eq!(push.snapshot.get("a"), Some(&json!(1)));

        assert_eq!(StatePush::parse(&obj(json!({ "seq": 1 }))), Err(PushParseError::MissingEpoch));
        assert_eq!(
            StatePush::parse(&obj(json!({ "runtime_epoch": "e1", "seq": -1 }))),
            Err(PushParseError::MissingSeq)
        );
    }

    #[test]
    fn restart_id_lookup() {
        assert_eq!(restart_runtime_id(&obj(json!({ "runtime_id": "r9" }))).as_deref(), Some("r9"));
        assert_eq!(restart_runtime_id(&obj(json!({ "runtime_epoch": "e2" }))).as_deref(), Some("e2"));
        assert_eq!(restart_runtime_id(&obj(json!({}))), None);
    }
}
