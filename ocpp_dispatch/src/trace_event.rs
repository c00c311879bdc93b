use crate::connection::ConnectionId;
use ocpp_frame::NodeId;

/// Frame level observations of a transport, published on an optional trace channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    /// Request originated by this node being written to a connection
    RequestSent {
        connection: ConnectionId,
        text: String,
    },

    /// Any text frame read from a connection
    FrameReceived {
        connection: ConnectionId,
        text: String,
    },

    /// CallResult or CallError produced for an inbound or relayed frame
    ReplySent {
        connection: ConnectionId,
        text: String,
    },

    Connected {
        connection: ConnectionId,
        remote: NodeId,
    },

    Disconnected {
        connection: ConnectionId,
        reason: String,
    },

    Error {
        reason: String,
    },
}

impl TraceEvent {
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            TraceEvent::RequestSent { connection, .. }
            | TraceEvent::FrameReceived { connection, .. }
            | TraceEvent::ReplySent { connection, .. }
            | TraceEvent::Connected { connection, .. }
            | TraceEvent::Disconnected { connection, .. } => Some(*connection),
            TraceEvent::Error { .. } => None,
        }
    }
}
