use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Correlates a request with its response or request-error.
///
/// Generated by the originator and echoed verbatim by the answering side.
/// Only needs to be unique among the originator's outstanding requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        RequestId(id.into())
    }

    /// Random v4 UUID in hyphenated form.
    pub fn random() -> Self {
        RequestId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId(id)
    }
}

/// Ties together every log and observer event of one causal chain.
///
/// Unlike [RequestId] it survives relaying and retries of the same logical request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTrackingId(String);

impl EventTrackingId {
    pub fn new() -> Self {
        EventTrackingId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventTrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for EventTrackingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventTrackingId {
    fn from(id: &str) -> Self {
        EventTrackingId(id.to_owned())
    }
}

/// Message type discriminator, e.g. `Heartbeat` or `SetChargingProfile`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub fn new(action: impl Into<String>) -> Self {
        Action(action.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Action {
    fn from(action: &str) -> Self {
        Action(action.to_owned())
    }
}

impl PartialEq<str> for Action {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_differ() {
        let a = RequestId::random();
        let b = RequestId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_ne!(EventTrackingId::new(), EventTrackingId::new());
    }
}
