//! Typed requests and responses, and the contract payload types implement to take part in dispatch.

use chrono::{DateTime, Utc};
use ocpp_frame::{
    Action, EventTrackingId, NetworkPath, NodeId, RequestId, ResponseFrame, ResponseResult,
    ResultKind, Value,
};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Addressing of a request being parsed, for payload types whose validation depends on it.
#[derive(Copy, Clone, Debug)]
pub struct ParseContext<'a> {
    pub request_id: &'a RequestId,
    pub destination: &'a NodeId,
    pub path: &'a NetworkPath,
}

/// Response payload of one action.
///
/// The default methods go through serde, override them for custom validation or encoding.
pub trait OcppResponse: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    fn try_parse(payload: &Value) -> Result<Self, String> {
        Self::deserialize(payload).map_err(|e| e.to_string())
    }

    fn to_json(&self) -> Value {
        to_json_or_null(self)
    }
}

/// Request payload of one action, tied to its response type.
pub trait OcppRequest: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    const ACTION: &'static str;
    type Response: OcppResponse;

    fn try_parse(payload: &Value, _context: &ParseContext<'_>) -> Result<Self, String> {
        Self::deserialize(payload).map_err(|e| e.to_string())
    }

    fn to_json(&self) -> Value {
        to_json_or_null(self)
    }
}

fn to_json_or_null<T: Serialize + Debug>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to serialize {value:?}: {e}");
            Value::Null
        }
    }
}

#[derive(Clone, Debug)]
pub struct Request<T> {
    pub id: RequestId,
    pub action: Action,
    pub destination: NodeId,
    /// Hops traversed so far, the first one is the originator.
    pub path: NetworkPath,
    pub timestamp: DateTime<Utc>,
    pub timeout: Duration,
    pub event_tracking_id: EventTrackingId,
    /// Handlers should observe it, the pipeline never aborts them.
    pub cancellation: CancellationToken,
    pub payload: T,
}

impl<T: OcppRequest> Request<T> {
    /// New request with a random id, originating at the first hop of `path`.
    pub fn new(destination: NodeId, path: NetworkPath, timeout: Duration, payload: T) -> Self {
        Request {
            id: RequestId::random(),
            action: Action::new(T::ACTION),
            destination,
            path,
            timestamp: Utc::now(),
            timeout,
            event_tracking_id: EventTrackingId::new(),
            cancellation: CancellationToken::new(),
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_tracking_id(mut self, event_tracking_id: EventTrackingId) -> Self {
        self.event_tracking_id = event_tracking_id;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn source(&self) -> &NodeId {
        self.path.source()
    }
}

#[derive(Clone, Debug)]
pub struct Response<R> {
    pub request_id: RequestId,
    /// Originator of the request being answered.
    pub destination: NodeId,
    /// Starts at the answering node.
    pub path: NetworkPath,
    pub timestamp: DateTime<Utc>,
    pub result: ResponseResult,
    /// Present iff the result is Ok.
    pub payload: Option<R>,
}

impl<R: OcppResponse> Response<R> {
    pub fn ok<T>(request: &Request<T>, payload: R) -> Self {
        Self::with_result(request, ResponseResult::ok(), Some(payload))
    }

    /// Explicit negative business outcome.
    pub fn failed<T>(request: &Request<T>, description: impl Into<String>) -> Self {
        Self::with_result(
            request,
            ResponseResult::with(ResultKind::Failed, description),
            None,
        )
    }

    pub fn signature_error<T>(request: &Request<T>, description: impl Into<String>) -> Self {
        Self::with_result(
            request,
            ResponseResult::with(ResultKind::SignatureError, description),
            None,
        )
    }

    pub fn exception_occurred<T>(request: &Request<T>, description: impl Into<String>) -> Self {
        Self::with_result(
            request,
            ResponseResult::with(ResultKind::ExceptionOccurred, description),
            None,
        )
    }

    fn with_result<T>(request: &Request<T>, result: ResponseResult, payload: Option<R>) -> Self {
        Response {
            request_id: request.id.clone(),
            destination: request.path.source().clone(),
            path: NetworkPath::new(request.destination.clone()),
            timestamp: Utc::now(),
            result,
            payload,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok() && self.payload.is_some()
    }

    /// Points the response back at the originator of `request`, starting the path at `local`.
    pub(crate) fn address_to<T>(&mut self, request: &Request<T>, local: &NodeId) {
        self.request_id = request.id.clone();
        self.destination = request.path.source().clone();
        self.path = NetworkPath::new(local.clone());
    }

    /// Payload JSON as it goes on the wire: the response data, or the result discriminator if not Ok.
    pub fn payload_json(&self) -> Value {
        match (&self.payload, self.result.is_ok()) {
            (Some(payload), true) => payload.to_json(),
            _ => self.result.to_payload(),
        }
    }

    /// Interprets a received CallResult as the answer to `request`.
    pub fn from_frame<T>(request: &Request<T>, frame: ResponseFrame) -> Result<Self, String> {
        let path = match frame.routing {
            Some(routing) => routing.path,
            None => NetworkPath::new(request.destination.clone()),
        };
        let (result, payload) = match ResponseResult::from_payload(&frame.payload) {
            Some(result) if !result.is_ok() => (result, None),
            _ => (ResponseResult::ok(), Some(R::try_parse(&frame.payload)?)),
        };
        Ok(Response {
            request_id: frame.id,
            destination: request.path.source().clone(),
            path,
            timestamp: Utc::now(),
            result,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Pong {
        seq: u32,
    }

    impl OcppResponse for Pong {}

    impl OcppRequest for Ping {
        const ACTION: &'static str = "Ping";
        type Response = Pong;
    }

    fn relayed_ping() -> Request<Ping> {
        let path = NetworkPath::new(NodeId::from("CP1")).append(NodeId::from("LC1"));
        Request::new(
            NodeId::from("CSMS"),
            path,
            Duration::from_secs(30),
            Ping { seq: 1 },
        )
        .with_id("R1")
    }

    #[test]
    fn response_goes_back_to_the_source() {
        let request = relayed_ping();
        assert_eq!(request.action, Action::from("Ping"));
        assert_eq!(request.source(), &NodeId::from("CP1"));

        let response = Response::ok(&request, Pong { seq: 1 });
        assert!(response.is_ok());
        assert_eq!(response.request_id, RequestId::from("R1"));
        assert_eq!(response.destination, NodeId::from("CP1"));
        assert_eq!(response.path.hops(), &[NodeId::from("CSMS")]);
        assert_eq!(response.payload_json(), json!({"seq": 1}));
    }

    #[test]
    fn negative_results_are_encoded_in_the_payload() {
        let request = relayed_ping();
        let response = Response::<Pong>::exception_occurred(&request, "boom");
        assert!(!response.is_ok());
        assert_eq!(
            response.payload_json(),
            json!({"result": {"code": "ExceptionOccured", "description": "boom"}})
        );
    }

    #[test]
    fn response_from_frame() {
        let request = relayed_ping();
        let frame = ResponseFrame {
            id: RequestId::from("R1"),
            payload: json!({"seq": 1}),
            routing: None,
        };
        let response = Response::<Pong>::from_frame(&request, frame).unwrap();
        assert_eq!(response.payload, Some(Pong { seq: 1 }));
        assert_eq!(response.path.source(), &NodeId::from("CSMS"));

        let failed = ResponseFrame {
            id: RequestId::from("R1"),
            payload: json!({"result": {"code": "Failed", "description": "Undefined handler"}}),
            routing: None,
        };
        let response = Response::<Pong>::from_frame(&request, failed).unwrap();
        assert_eq!(response.result.code, ResultKind::Failed);
        assert_eq!(response.payload, None);

        let garbage = ResponseFrame {
            id: RequestId::from("R1"),
            payload: json!({"seq": "one"}),
            routing: None,
        };
        assert!(Response::<Pong>::from_frame(&request, garbage).is_err());
    }
}
