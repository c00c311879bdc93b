pub mod frame;
pub mod identity;
pub mod ids;
pub mod outcome;
pub mod result;

pub use frame::{
    Frame, FrameError, FrameHeader, MessageTypeId, RequestErrorFrame, RequestFrame, ResponseFrame, Routing,
};
pub use identity::{NetworkPath, NodeId};
pub use ids::{Action, EventTrackingId, RequestId};
pub use outcome::{CouldNotParse, FormationViolation};
pub use result::{ResponseResult, ResultCode, ResultKind};

pub use serde_json::Value;

/// Request id used in a CallError when the id of the offending frame could not be read.
pub const UNKNOWN_REQUEST_ID: &str = "-1";
