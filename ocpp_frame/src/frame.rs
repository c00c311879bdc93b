//! OCPP-J frames as they travel over a WebSocket text message.
//!
//! ```text
//! Call       [2, "<id>", "<action>", {payload}]
//! CallResult [3, "<id>", {payload}]
//! CallError  [4, "<id>", "<code>", "<description>", {details}]
//! ```
//!
//! In relayed topologies every frame additionally carries the destination node and
//! the network path traversed so far, appended after the standard elements:
//!
//! ```text
//! [2, "<id>", "<action>", {payload}, "<destination>", ["<source>", "<hop>", ...]]
//! ```

use crate::identity::{NetworkPath, NodeId};
use crate::ids::{Action, RequestId};
use crate::result::ResultCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageTypeId {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageTypeId {
    pub fn from_u64(id: u64) -> Option<Self> {
        match id {
            2 => Some(MessageTypeId::Call),
            3 => Some(MessageTypeId::CallResult),
            4 => Some(MessageTypeId::CallError),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {}", .0)]
    NotJson(String),
    #[error("Frame is not a JSON array")]
    NotAnArray,
    #[error("Frame has {} elements, expected {}", .got, .expected)]
    WrongLength { got: usize, expected: &'static str },
    #[error("Unsupported message type id {}", .0)]
    UnsupportedMessageType(Value),
    #[error("Element '{}' must be {}", .name, .expected)]
    InvalidElement {
        name: &'static str,
        expected: &'static str,
    },
    #[error("Request id must not be empty")]
    EmptyRequestId,
}

/// Destination and traversed path of a relayed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Routing {
    pub destination: NodeId,
    pub path: NetworkPath,
}

impl Routing {
    pub fn new(destination: NodeId, path: NetworkPath) -> Self {
        Routing { destination, path }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestFrame {
    pub id: RequestId,
    pub action: Action,
    pub payload: Value,
    pub routing: Option<Routing>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseFrame {
    pub id: RequestId,
    pub payload: Value,
    pub routing: Option<Routing>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestErrorFrame {
    pub id: RequestId,
    pub code: ResultCode,
    pub description: String,
    pub details: Value,
    pub routing: Option<Routing>,
}

impl RequestErrorFrame {
    pub fn new(id: RequestId, code: ResultCode, description: impl Into<String>) -> Self {
        RequestErrorFrame {
            id,
            code,
            description: description.into(),
            details: Value::Object(Map::new()),
            routing: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_routing(mut self, routing: Option<Routing>) -> Self {
        self.routing = routing;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
    RequestError(RequestErrorFrame),
}

/// Whatever could be read from the head of a frame, even a malformed one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameHeader {
    pub message_type: Option<MessageTypeId>,
    pub request_id: Option<RequestId>,
    /// Only read for CALL frames.
    pub action: Option<Action>,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Frame, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::NotJson(e.to_string()))?;
        Frame::from_json(value)
    }

    pub fn from_json(value: Value) -> Result<Frame, FrameError> {
        let Value::Array(elements) = value else {
            return Err(FrameError::NotAnArray);
        };
        let Some(message_type) = elements.first() else {
            return Err(FrameError::WrongLength {
                got: 0,
                expected: "at least 3",
            });
        };
        match message_type.as_u64().and_then(MessageTypeId::from_u64) {
            Some(MessageTypeId::Call) => parse_call(elements),
            Some(MessageTypeId::CallResult) => parse_call_result(elements),
            Some(MessageTypeId::CallError) => parse_call_error(elements),
            None => Err(FrameError::UnsupportedMessageType(message_type.clone())),
        }
    }

    /// Best effort look at the message type and request id, used to answer frames that fail to parse.
    pub fn peek_header(text: &str) -> FrameHeader {
        let Ok(Value::Array(elements)) = serde_json::from_str::<Value>(text) else {
            return FrameHeader::default();
        };
        let message_type = elements
            .first()
            .and_then(Value::as_u64)
            .and_then(MessageTypeId::from_u64);
        let action = match message_type {
            Some(MessageTypeId::Call) => elements.get(2).and_then(Value::as_str).map(Action::from),
            _ => None,
        };
        FrameHeader {
            message_type,
            request_id: elements
                .get(1)
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(RequestId::from),
            action,
        }
    }

    pub fn message_type(&self) -> MessageTypeId {
        match self {
            Frame::Request(_) => MessageTypeId::Call,
            Frame::Response(_) => MessageTypeId::CallResult,
            Frame::RequestError(_) => MessageTypeId::CallError,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Frame::Request(f) => &f.id,
            Frame::Response(f) => &f.id,
            Frame::RequestError(f) => &f.id,
        }
    }

    pub fn routing(&self) -> Option<&Routing> {
        match self {
            Frame::Request(f) => f.routing.as_ref(),
            Frame::Response(f) => f.routing.as_ref(),
            Frame::RequestError(f) => f.routing.as_ref(),
        }
    }

    pub fn to_json(&self) -> Value {
        let (mut elements, routing) = match self {
            Frame::Request(f) => (
                vec![
                    json!(MessageTypeId::Call as u8),
                    json!(f.id),
                    json!(f.action),
                    f.payload.clone(),
                ],
                &f.routing,
            ),
            Frame::Response(f) => (
                vec![
                    json!(MessageTypeId::CallResult as u8),
                    json!(f.id),
                    f.payload.clone(),
                ],
                &f.routing,
            ),
            Frame::RequestError(f) => (
                vec![
                    json!(MessageTypeId::CallError as u8),
                    json!(f.id),
                    json!(f.code),
                    json!(f.description),
                    f.details.clone(),
                ],
                &f.routing,
            ),
        };
        if let Some(routing) = routing {
            elements.push(json!(routing.destination));
            elements.push(json!(routing.path));
        }
        Value::Array(elements)
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}

impl From<RequestFrame> for Frame {
    fn from(f: RequestFrame) -> Self {
        Frame::Request(f)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(f: ResponseFrame) -> Self {
        Frame::Response(f)
    }
}

impl From<RequestErrorFrame> for Frame {
    fn from(f: RequestErrorFrame) -> Self {
        Frame::RequestError(f)
    }
}

fn check_len(len: usize, direct: usize, expected: &'static str) -> Result<(), FrameError> {
    if len == direct || len == direct + 2 {
        Ok(())
    } else {
        Err(FrameError::WrongLength { got: len, expected })
    }
}

fn parse_call(elements: Vec<Value>) -> Result<Frame, FrameError> {
    check_len(elements.len(), 4, "4 or 6")?;
    let mut it = elements.into_iter().skip(1);
    let id = request_id(it.next())?;
    let action = string(it.next(), "action")?;
    let payload = object(it.next(), "payload")?;
    let routing = routing(&mut it)?;
    Ok(Frame::Request(RequestFrame {
        id,
        action: Action::new(action),
        payload,
        routing,
    }))
}

fn parse_call_result(elements: Vec<Value>) -> Result<Frame, FrameError> {
    check_len(elements.len(), 3, "3 or 5")?;
    let mut it = elements.into_iter().skip(1);
    let id = request_id(it.next())?;
    let payload = object(it.next(), "payload")?;
    let routing = routing(&mut it)?;
    Ok(Frame::Response(ResponseFrame {
        id,
        payload,
        routing,
    }))
}

fn parse_call_error(elements: Vec<Value>) -> Result<Frame, FrameError> {
    check_len(elements.len(), 5, "5 or 7")?;
    let mut it = elements.into_iter().skip(1);
    let id = request_id(it.next())?;
    let code = string(it.next(), "errorCode")?;
    let description = string(it.next(), "errorDescription")?;
    let details = match it.next() {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(details) => details,
    };
    let routing = routing(&mut it)?;
    Ok(Frame::RequestError(RequestErrorFrame {
        id,
        code: ResultCode::from(code),
        description,
        details,
        routing,
    }))
}

fn request_id(element: Option<Value>) -> Result<RequestId, FrameError> {
    let id = string(element, "messageId")?;
    if id.is_empty() {
        return Err(FrameError::EmptyRequestId);
    }
    Ok(RequestId::new(id))
}

fn string(element: Option<Value>, name: &'static str) -> Result<String, FrameError> {
    match element {
        Some(Value::String(s)) => Ok(s),
        _ => Err(FrameError::InvalidElement {
            name,
            expected: "a string",
        }),
    }
}

fn object(element: Option<Value>, name: &'static str) -> Result<Value, FrameError> {
    match element {
        Some(v @ Value::Object(_)) => Ok(v),
        _ => Err(FrameError::InvalidElement {
            name,
            expected: "an object",
        }),
    }
}

fn routing(it: &mut impl Iterator<Item = Value>) -> Result<Option<Routing>, FrameError> {
    let Some(destination) = it.next() else {
        return Ok(None);
    };
    let destination = string(Some(destination), "destination")?;
    if destination.is_empty() {
        return Err(FrameError::InvalidElement {
            name: "destination",
            expected: "a non-empty string",
        });
    }
    let path = it.next().ok_or(FrameError::InvalidElement {
        name: "networkPath",
        expected: "an array of node ids",
    })?;
    let path = NetworkPath::deserialize(&path).map_err(|_| FrameError::InvalidElement {
        name: "networkPath",
        expected: "a non-empty array of node ids",
    })?;
    Ok(Some(Routing {
        destination: NodeId::new(destination),
        path,
    }))
}
