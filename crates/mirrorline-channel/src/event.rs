//! Typed event kinds carried over a channel.
//!
//! Wire names are plain strings; inside the client every event is an
//! [`EventKind`] so the subscription registry can be keyed by an enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire name of the handshake request.
pub const STATE_REQUEST: &str = "state_request";
/// Wire name of a server-initiated state push.
pub const STATE_PUSH: &str = "state_push";
/// Wire name of the server restart hint.
pub const SERVER_RESTART: &str = "server_restart";

/// An event kind exchanged on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Client-to-server handshake (request/response).
    StateRequest,
    /// Server-to-client snapshot delivery.
    StatePush,
    /// Server announces it is restarting.
    ServerRestart,
    /// Any other application event.
    Custom(String),
}

impl EventKind {
    /// The canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::StateRequest => STATE_REQUEST,
            EventKind::StatePush => STATE_PUSH,
            EventKind::ServerRestart => SERVER_RESTART,
            EventKind::Custom(name) => name,
        }
    }

    /// Create a custom event kind, mapping known names onto their variants.
    pub fn custom(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            STATE_REQUEST => EventKind::StateRequest,
            STATE_PUSH => EventKind::StatePush,
            SERVER_RESTART => EventKind::ServerRestart,
            _ => EventKind::Custom(name),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventKind::custom(s))
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::custom(s)
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventKind::custom(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_map_to_variants() {
        assert_eq!(EventKind::custom("state_push"), EventKind::StatePush);
        assert_eq!(EventKind::from("state_request"), EventKind::StateRequest);
        assert_eq!(
            "log_line".parse::<EventKind>().unwrap(),
            EventKind::Custom("log_line".into())
        );
    }

    #[test]
    fn serializes_as_wire_name() {
        let json = serde_json::to_string(&EventKind::ServerRestart).unwrap();
        assert_eq!(json, "\"server_restart\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventKind::ServerRestart);
    }
}
