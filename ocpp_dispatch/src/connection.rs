use crate::Error;
use ocpp_frame::{EventTrackingId, NetworkPath, NodeId, RequestId};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Frame handed to the transport for delivery over one connection.
#[derive(Clone, Debug)]
pub struct OutgoingFrame {
    pub destination: NodeId,
    pub path: NetworkPath,
    pub request_id: RequestId,
    /// Does not go on the wire, in-process links hand it to the next node.
    pub event_tracking_id: EventTrackingId,
    pub text: String,
}

/// Handle of one transport connection to a neighbouring node.
///
/// Cheap to clone, all clones feed the same outgoing queue.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    remote: NodeId,
    outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        remote: NodeId,
        outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    ) -> Self {
        Connection {
            id,
            remote,
            outgoing,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Neighbour on the other end of this connection.
    pub fn remote(&self) -> &NodeId {
        &self.remote
    }

    pub fn send(&self, frame: OutgoingFrame) -> Result<(), Error> {
        self.outgoing
            .send(frame)
            .map_err(|_| Error::TransportClosed(self.id))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outgoing.is_closed()
    }

    /// Marks the connection as gone, tokens handed out by [child_token](Self::child_token) fire.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token that fires when the connection is closed, given to handlers of requests received over it.
    pub fn child_token(&self) -> CancellationToken {
        self.closed.child_token()
    }
}
