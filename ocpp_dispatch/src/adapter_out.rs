//! Adapter OUT: requests originated by this node.

use crate::config::NodeContext;
use crate::connection::{Connection, ConnectionId, OutgoingFrame};
use crate::listeners::{Listener, ListenerError, ListenerId, Registry};
use crate::message::{OcppRequest, Request, Response};
use crate::pending::{PendingAnswer, PendingRequests};
use crate::signature::MessageInfo;
use crate::Error;
use chrono::{DateTime, Utc};
use ocpp_frame::{Frame, NodeId, RequestErrorFrame, RequestFrame, RequestId, ResponseFrame, Routing};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq)]
pub enum ReceivedAnswer {
    Response(ResponseFrame),
    RequestError(RequestErrorFrame),
}

#[derive(Debug)]
pub struct RequestSent {
    pub timestamp: DateTime<Utc>,
    pub local: NodeId,
    pub connection: ConnectionId,
    /// Signed frame, as handed to the transport.
    pub frame: RequestFrame,
}

#[derive(Debug)]
pub struct ResponseReceived {
    pub timestamp: DateTime<Utc>,
    pub local: NodeId,
    pub request: RequestFrame,
    pub answer: ReceivedAnswer,
    pub runtime: Duration,
}

pub struct OutboundDispatcher {
    ctx: Arc<NodeContext>,
    pending: PendingRequests,
    on_request_sent: Registry<Listener<RequestSent>>,
    on_response_received: Registry<Listener<ResponseReceived>>,
}

impl OutboundDispatcher {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        OutboundDispatcher {
            ctx,
            pending: PendingRequests::new(),
            on_request_sent: Registry::default(),
            on_response_received: Registry::default(),
        }
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn on_request_sent<L, Fut>(&self, listener: L) -> ListenerId
    where
        L: Fn(Arc<RequestSent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.on_request_sent.subscribe(listener)
    }

    pub fn remove_request_sent_listener(&self, id: ListenerId) -> bool {
        self.on_request_sent.remove(id)
    }

    /// Also invoked for CallErrors, not invoked for timed out or cancelled requests.
    pub fn on_response_received<L, Fut>(&self, listener: L) -> ListenerId
    where
        L: Fn(Arc<ResponseReceived>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.on_response_received.subscribe(listener)
    }

    pub fn remove_response_received_listener(&self, id: ListenerId) -> bool {
        self.on_response_received.remove(id)
    }

    /// Signs and sends `request` over `connection`, then waits for the answer, the request's
    /// deadline or its cancellation, whichever comes first.
    pub async fn send<T: OcppRequest>(
        &self,
        connection: &Connection,
        request: Request<T>,
    ) -> Result<Response<T::Response>, Error> {
        let started = Instant::now();
        let action = T::ACTION;

        let mut payload = request.payload.to_json();
        let info = MessageInfo {
            action,
            request_id: &request.id,
            source: request.source(),
        };
        self.ctx
            .signature_policy
            .sign_request(&info, &mut payload)
            .map_err(Error::SignatureError)?;

        let routing = self
            .needs_routing(connection, &request)
            .then(|| Routing::new(request.destination.clone(), request.path.clone()));
        let frame = RequestFrame {
            id: request.id.clone(),
            action: request.action.clone(),
            payload,
            routing,
        };

        let deadline = tokio::time::Instant::now() + request.timeout;
        let handle = self.pending.insert(
            request.id.clone(),
            request.action.clone(),
            connection.id(),
            deadline,
        )?;
        let text = Frame::Request(frame.clone()).to_text();
        trace!("{action} '{}' -> {}: {text}", request.id, connection.remote());
        connection.send(OutgoingFrame {
            destination: request.destination.clone(),
            path: request.path.clone(),
            request_id: request.id.clone(),
            event_tracking_id: request.event_tracking_id.clone(),
            text,
        })?;
        debug!(
            "{action} '{}' sent to {} over {}",
            request.id,
            request.destination,
            connection.id()
        );

        let sent = RequestSent {
            timestamp: Utc::now(),
            local: self.ctx.local.clone(),
            connection: connection.id(),
            frame: frame.clone(),
        };
        self.on_request_sent
            .notify(
                Arc::new(sent),
                &self.ctx.errors,
                &format!("{action}.OnRequestSent"),
            )
            .await;

        let answer = match handle.wait(&request.cancellation).await? {
            PendingAnswer::Response(response) => ReceivedAnswer::Response(response),
            PendingAnswer::RequestError(error) => ReceivedAnswer::RequestError(error),
            PendingAnswer::Disconnected => return Err(Error::Disconnected),
        };
        let received = ResponseReceived {
            timestamp: Utc::now(),
            local: self.ctx.local.clone(),
            request: frame,
            answer: answer.clone(),
            runtime: started.elapsed(),
        };
        self.on_response_received
            .notify(
                Arc::new(received),
                &self.ctx.errors,
                &format!("{action}.OnResponseReceived"),
            )
            .await;

        match answer {
            ReceivedAnswer::Response(response) => {
                let info = MessageInfo {
                    action,
                    request_id: &response.id,
                    source: &request.destination,
                };
                self.ctx
                    .signature_policy
                    .verify_response(&info, &response.payload)
                    .map_err(Error::ResponseSignature)?;
                Response::from_frame(&request, response).map_err(Error::CouldNotParseResponse)
            }
            ReceivedAnswer::RequestError(error) => Err(Error::RemoteError {
                code: error.code,
                description: error.description,
                details: error.details,
            }),
        }
    }

    /// Hands an answer that arrived for one of our requests to its waiter.
    pub fn complete(&self, id: &RequestId, answer: PendingAnswer) -> bool {
        self.pending.complete(id, answer)
    }

    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let cancelled = self.pending.cancel_connection(connection);
        if cancelled > 0 {
            debug!("{connection} closed, {cancelled} pending request(s) failed");
        }
        cancelled
    }

    fn needs_routing<T>(&self, connection: &Connection, request: &Request<T>) -> bool {
        self.ctx.network_extension
            || request.path.len() > 1
            || &request.destination != connection.remote()
    }
}
