use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Error code carried by a CallError (request-error) frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResultCode {
    /// Requested action is not known by the receiver.
    NotImplemented,
    /// Requested action is recognized but not supported by the receiver.
    NotSupported,
    /// An internal error occurred and the receiver was not able to process the requested action.
    InternalError,
    /// Payload for action is incomplete.
    ProtocolError,
    /// During the processing of action a security issue occurred.
    SecurityError,
    /// Payload for action is syntactically incorrect or not conform the PDU structure for action.
    FormationViolation,
    /// Payload is syntactically correct but at least one field contains an invalid value.
    PropertyConstraintViolation,
    /// Payload is syntactically correct but at least one of the fields violates occurrence constraints.
    OccurrenceConstraintViolation,
    /// Payload is syntactically correct but at least one of the fields violates data type constraints.
    TypeConstraintViolation,
    /// Any other error not covered by the previous ones.
    GenericError,
    /// A message with a message type id is received that is not supported.
    MessageTypeNotSupported,
    /// Content of the frame is not a valid RPC frame.
    RpcFrameworkError,
    /// Code not known to this implementation, preserved as received.
    Unknown(String),
}

impl ResultCode {
    pub fn as_str(&self) -> &str {
        match self {
            ResultCode::NotImplemented => "NotImplemented",
            ResultCode::NotSupported => "NotSupported",
            ResultCode::InternalError => "InternalError",
            ResultCode::ProtocolError => "ProtocolError",
            ResultCode::SecurityError => "SecurityError",
            ResultCode::FormationViolation => "FormationViolation",
            ResultCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ResultCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ResultCode::TypeConstraintViolation => "TypeConstraintViolation",
            ResultCode::GenericError => "GenericError",
            ResultCode::MessageTypeNotSupported => "MessageTypeNotSupported",
            ResultCode::RpcFrameworkError => "RpcFrameworkError",
            ResultCode::Unknown(code) => code,
        }
    }
}

impl From<&str> for ResultCode {
    fn from(code: &str) -> Self {
        match code {
            "NotImplemented" => ResultCode::NotImplemented,
            "NotSupported" => ResultCode::NotSupported,
            "InternalError" => ResultCode::InternalError,
            "ProtocolError" => ResultCode::ProtocolError,
            "SecurityError" => ResultCode::SecurityError,
            // OCPP 2.x renamed it, both spellings are seen in the field
            "FormationViolation" | "FormatViolation" => ResultCode::FormationViolation,
            "PropertyConstraintViolation" => ResultCode::PropertyConstraintViolation,
            // 1.6 misspelling
            "OccurrenceConstraintViolation" | "OccurenceConstraintViolation" => {
                ResultCode::OccurrenceConstraintViolation
            }
            "TypeConstraintViolation" => ResultCode::TypeConstraintViolation,
            "GenericError" => ResultCode::GenericError,
            "MessageTypeNotSupported" => ResultCode::MessageTypeNotSupported,
            "RpcFrameworkError" => ResultCode::RpcFrameworkError,
            other => ResultCode::Unknown(other.to_owned()),
        }
    }
}

impl From<String> for ResultCode {
    fn from(code: String) -> Self {
        ResultCode::from(code.as_str())
    }
}

impl From<ResultCode> for String {
    fn from(code: ResultCode) -> Self {
        code.as_str().to_owned()
    }
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-level outcome of a request, carried inside a normal response payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResultKind {
    Ok,
    /// Signature policy rejected the request.
    SignatureError,
    /// No handler, or an explicit negative business outcome.
    Failed,
    /// A handler failed while processing the request.
    ExceptionOccurred,
    Timeout,
    Cancelled,
    Rejected,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Ok => "Ok",
            ResultKind::SignatureError => "SignatureError",
            ResultKind::Failed => "Failed",
            ResultKind::ExceptionOccurred => "ExceptionOccured",
            ResultKind::Timeout => "Timeout",
            ResultKind::Cancelled => "Cancelled",
            ResultKind::Rejected => "Rejected",
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown result kind '{}'", .0)]
pub struct UnknownResultKind(pub String);

impl FromStr for ResultKind {
    type Err = UnknownResultKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ok" => Ok(ResultKind::Ok),
            "SignatureError" => Ok(ResultKind::SignatureError),
            "Failed" => Ok(ResultKind::Failed),
            "ExceptionOccured" | "ExceptionOccurred" => Ok(ResultKind::ExceptionOccurred),
            "Timeout" => Ok(ResultKind::Timeout),
            "Cancelled" => Ok(ResultKind::Cancelled),
            "Rejected" => Ok(ResultKind::Rejected),
            other => Err(UnknownResultKind(other.to_owned())),
        }
    }
}

impl TryFrom<String> for ResultKind {
    type Error = UnknownResultKind;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResultKind> for String {
    fn from(kind: ResultKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl Display for ResultKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result discriminator of a response plus an optional human-readable description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub code: ResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResponseResult {
    pub fn ok() -> Self {
        ResponseResult {
            code: ResultKind::Ok,
            description: None,
        }
    }

    pub fn with(code: ResultKind, description: impl Into<String>) -> Self {
        ResponseResult {
            code,
            description: Some(description.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultKind::Ok
    }

    /// Payload of a response that carries no business data, only a non-Ok result.
    pub fn to_payload(&self) -> Value {
        json!({ "result": self })
    }

    /// Inverse of [to_payload](ResponseResult::to_payload).
    ///
    /// Returns None unless `payload` is an object whose only member is a well-formed `result`.
    pub fn from_payload(payload: &Value) -> Option<ResponseResult> {
        let object = payload.as_object()?;
        if object.len() != 1 {
            return None;
        }
        let result = object.get("result")?;
        ResponseResult::deserialize(result).ok()
    }
}

impl Display for ResponseResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_spellings() {
        assert_eq!(
            ResultCode::from("FormatViolation"),
            ResultCode::FormationViolation
        );
        assert_eq!(
            ResultCode::from("OccurenceConstraintViolation"),
            ResultCode::OccurrenceConstraintViolation
        );
        assert_eq!(
            ResultCode::from("VendorSpecific"),
            ResultCode::Unknown("VendorSpecific".into())
        );
        assert_eq!(ResultCode::from("VendorSpecific").as_str(), "VendorSpecific");
    }

    #[test]
    fn result_payload() {
        let failed = ResponseResult::with(ResultKind::ExceptionOccurred, "boom");
        let payload = failed.to_payload();
        assert_eq!(payload["result"]["code"], "ExceptionOccured");
        assert_eq!(ResponseResult::from_payload(&payload), Some(failed));

        // regular payloads are not mistaken for a result
        assert_eq!(
            ResponseResult::from_payload(&json!({"currentTime": "2024-01-01T00:00:00Z"})),
            None
        );
        assert_eq!(
            ResponseResult::from_payload(&json!({"result": {"code": "Nope"}})),
            None
        );
    }
}
