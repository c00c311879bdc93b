pub mod adapter_in;
pub mod adapter_out;
pub mod config;
pub mod connection;
pub mod listeners;
pub mod message;
pub mod node;
pub mod pending;
pub mod signature;
mod timeout;
pub mod trace_event;

pub use adapter_in::{
    ActionDispatcher, DispatchResult, HandlerContext, HandlerError, HandlerResult, InboundFrame,
    RequestReceived, ResponseSent, UNDEFINED_HANDLER,
};
pub use adapter_out::{OutboundDispatcher, ReceivedAnswer, RequestSent, ResponseReceived};
pub use config::{NodeConfig, NodeContext};
pub use connection::{Connection, ConnectionId, OutgoingFrame};
pub use listeners::{ErrorReport, ErrorSink, ListenerError, ListenerId};
pub use message::{OcppRequest, OcppResponse, ParseContext, Request, Response};
pub use node::{NetworkingNode, NodeBuilder};
pub use ocpp_frame;
pub use pending::{PendingAnswer, PendingHandle, PendingRequests};
pub use signature::{MessageInfo, NoSignatures, SignaturePolicy};
pub use timeout::Timeout;
pub use trace_event::TraceEvent;

use ocpp_frame::{NodeId, RequestId, ResultCode, Value};

/// Failures seen by the originator of a request.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Timeout")]
    Timeout,
    #[error("Request was cancelled")]
    Cancelled,
    #[error("Remote node returned {}: {}", .code, .description)]
    RemoteError {
        code: ResultCode,
        description: String,
        details: Value,
    },
    #[error("Request id '{}' is already pending", .0)]
    DuplicateRequestId(RequestId),
    #[error("Signing the request failed: {}", .0)]
    SignatureError(String),
    #[error("Response signature verification failed: {}", .0)]
    ResponseSignature(String),
    #[error("Could not parse response: {}", .0)]
    CouldNotParseResponse(String),
    #[error("No route to '{}'", .0)]
    NoRoute(NodeId),
    #[error("Connection was closed before an answer arrived")]
    Disconnected,
    #[error("Transport of connection {} is closed", .0)]
    TransportClosed(ConnectionId),
}

/// Wiring mistakes, reported once when the node is assembled.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Action '{}' is already registered", .0)]
    DuplicateAction(&'static str),
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
