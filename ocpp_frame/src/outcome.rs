//! Terminal dispatcher-level outcomes for requests that never reached a handler.
//!
//! Both are answered with a CallError, never with a business response.

use crate::frame::{RequestErrorFrame, Routing};
use crate::ids::{Action, RequestId};
use crate::result::ResultCode;
use serde_json::{Value, json};

/// Payload of a request was readable JSON but did not form a valid request of its action.
#[derive(Clone, Debug, PartialEq)]
pub struct CouldNotParse {
    pub request_id: RequestId,
    pub action: Action,
    pub payload: Value,
    pub reason: String,
}

/// Parsing a request failed unexpectedly (the parser itself broke), likely a bug.
#[derive(Clone, Debug, PartialEq)]
pub struct FormationViolation {
    pub request_id: RequestId,
    pub action: Action,
    pub payload: Value,
    pub exception: String,
}

impl CouldNotParse {
    pub fn into_request_error(self, routing: Option<Routing>) -> RequestErrorFrame {
        RequestErrorFrame::new(
            self.request_id,
            ResultCode::FormationViolation,
            format!(
                "Processing the given '{}' request could not be parsed!",
                self.action
            ),
        )
        .with_details(json!({
            "request": self.payload,
            "reason": self.reason,
        }))
        .with_routing(routing)
    }
}

impl FormationViolation {
    pub fn into_request_error(self, routing: Option<Routing>) -> RequestErrorFrame {
        RequestErrorFrame::new(
            self.request_id,
            ResultCode::FormationViolation,
            format!(
                "Processing the given '{}' request led to an exception!",
                self.action
            ),
        )
        .with_details(json!({
            "request": self.payload,
            "exception": self.exception,
        }))
        .with_routing(routing)
    }
}
