//! A networking node: the action table, its neighbours and the relay logic between them.
//!
//! ```text
//! text ──> Frame::parse ──┬─ Call, destination == local ──> ActionDispatcher<T> ──> CallResult / CallError
//!                         ├─ Call, destination elsewhere ──> forwarded to the neighbour routing to it
//!                         ├─ CallResult / CallError for a relayed request ──> back towards its source
//!                         └─ CallResult / CallError for our request ──> pending request table
//! ```

use crate::adapter_in::{ActionDispatcher, InboundAction, InboundFrame, UNDEFINED_HANDLER};
use crate::adapter_out::OutboundDispatcher;
use crate::config::{NodeConfig, NodeContext};
use crate::connection::{Connection, ConnectionId, OutgoingFrame};
use crate::listeners::ErrorSink;
use crate::message::{OcppRequest, Request, Response};
use crate::pending::PendingAnswer;
use crate::signature::MessageInfo;
use crate::{Error, RegistrationError};
use chrono::Utc;
use ocpp_frame::{
    Action, CouldNotParse, EventTrackingId, Frame, FrameError, MessageTypeId, NetworkPath,
    NodeId, RequestErrorFrame, RequestFrame, RequestId, ResponseFrame, ResponseResult,
    ResultCode, ResultKind, Routing, UNKNOWN_REQUEST_ID, Value,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

struct RegisteredAction {
    erased: Arc<dyn InboundAction>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Collects the actions a node understands. Wiring mistakes surface here, not per request.
pub struct NodeBuilder {
    config: NodeConfig,
    actions: HashMap<&'static str, RegisteredAction>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        NodeBuilder {
            config,
            actions: HashMap::new(),
        }
    }

    /// Adds the pipeline for `T::ACTION` and returns it for handler and listener registration.
    pub fn register<T: OcppRequest>(
        &mut self,
    ) -> Result<Arc<ActionDispatcher<T>>, RegistrationError> {
        if self.actions.contains_key(T::ACTION) {
            return Err(RegistrationError::DuplicateAction(T::ACTION));
        }
        let dispatcher = Arc::new(ActionDispatcher::<T>::new());
        self.actions.insert(
            T::ACTION,
            RegisteredAction {
                erased: dispatcher.clone(),
                typed: dispatcher.clone(),
            },
        );
        debug!("{}: action registered", T::ACTION);
        Ok(dispatcher)
    }

    pub fn build(self) -> Arc<NetworkingNode> {
        let ctx = Arc::new(NodeContext::new(self.config));
        info!(
            "node '{}' ready, {} action(s), default timeout {:?}",
            ctx.local,
            self.actions.len(),
            ctx.default_timeout
        );
        Arc::new(NetworkingNode {
            outbound: OutboundDispatcher::new(ctx.clone()),
            ctx,
            actions: self.actions,
            neighbours: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            forwarded: Arc::new(Mutex::new(HashMap::new())),
            next_connection_id: AtomicU64::new(1),
        })
    }
}

struct ForwardedRequest {
    origin: Connection,
    event_tracking_id: EventTrackingId,
    expires: Instant,
}

/// Request ids are only unique per originator, forwarded requests are keyed by both.
type ForwardedKey = (NodeId, RequestId);

type ForwardedRequests = Arc<Mutex<HashMap<ForwardedKey, ForwardedRequest>>>;

pub struct NetworkingNode {
    ctx: Arc<NodeContext>,
    actions: HashMap<&'static str, RegisteredAction>,
    outbound: OutboundDispatcher,
    neighbours: RwLock<HashMap<NodeId, Connection>>,
    /// destination -> neighbour the destination is reachable through
    routes: RwLock<HashMap<NodeId, NodeId>>,
    forwarded: ForwardedRequests,
    next_connection_id: AtomicU64,
}

impl NetworkingNode {
    pub fn local_id(&self) -> &NodeId {
        &self.ctx.local
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn errors(&self) -> &ErrorSink {
        &self.ctx.errors
    }

    pub fn outbound(&self) -> &OutboundDispatcher {
        &self.outbound
    }

    /// Pipeline registered for `T`, if any.
    pub fn action<T: OcppRequest>(&self) -> Option<Arc<ActionDispatcher<T>>> {
        let registered = self.actions.get(T::ACTION)?;
        registered
            .typed
            .clone()
            .downcast::<ActionDispatcher<T>>()
            .ok()
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.actions.keys().copied()
    }

    /// New connection to neighbour `remote`. Frames to send come out of the returned receiver.
    ///
    /// A previous connection to the same neighbour is replaced.
    pub fn attach_connection(
        &self,
        remote: NodeId,
    ) -> (Connection, mpsc::UnboundedReceiver<OutgoingFrame>) {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new(id, remote.clone(), tx);
        let previous = self
            .neighbours
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(remote.clone(), connection.clone());
        if let Some(previous) = previous {
            warn!(
                "'{remote}' connected again, connection {} replaced by {id}",
                previous.id()
            );
        }
        info!("'{remote}' attached as {id}");
        (connection, rx)
    }

    /// Forgets `connection`, fails the requests waiting for an answer over it and fires the
    /// cancellation of handlers still working on requests received over it.
    pub fn detach_connection(&self, connection: &Connection) {
        connection.close();
        {
            let mut neighbours = self
                .neighbours
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if neighbours
                .get(connection.remote())
                .is_some_and(|c| c.id() == connection.id())
            {
                neighbours.remove(connection.remote());
            }
        }
        self.outbound.cancel_connection(connection.id());
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, f| f.origin.id() != connection.id());
        info!("'{}' detached ({})", connection.remote(), connection.id());
    }

    /// Makes `destination` reachable through the directly connected neighbour `via`.
    pub fn add_route(&self, destination: impl Into<NodeId>, via: impl Into<NodeId>) {
        let (destination, via) = (destination.into(), via.into());
        debug!("route {destination} via {via}");
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(destination, via);
    }

    pub fn remove_route(&self, destination: &NodeId) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(destination)
            .is_some()
    }

    /// Connection frames for `destination` leave over: a direct neighbour first, then routes.
    pub fn connection_to(&self, destination: &NodeId) -> Option<Connection> {
        let neighbours = self
            .neighbours
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = neighbours.get(destination) {
            return Some(connection.clone());
        }
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let via = routes.get(destination)?;
        neighbours.get(via).cloned()
    }

    /// New request originating here, with the default timeout.
    pub fn request<T: OcppRequest>(&self, destination: impl Into<NodeId>, payload: T) -> Request<T> {
        Request::new(
            destination.into(),
            NetworkPath::new(self.ctx.local.clone()),
            self.ctx.default_timeout,
            payload,
        )
    }

    pub async fn send<T: OcppRequest>(
        &self,
        request: Request<T>,
    ) -> Result<Response<T::Response>, Error> {
        let Some(connection) = self.connection_to(&request.destination) else {
            return Err(Error::NoRoute(request.destination));
        };
        self.outbound.send(&connection, request).await
    }

    /// Handles one text frame received over `connection`, returns the text to send back over it.
    pub async fn handle_text(&self, connection: &Connection, text: &str) -> Option<String> {
        self.dispatch_text(connection, text, EventTrackingId::new()).await
    }

    /// Like [handle_text](Self::handle_text) for a frame another node in this process sent,
    /// requests keep the event tracking id they were sent with.
    pub async fn handle_outgoing(
        &self,
        connection: &Connection,
        frame: &OutgoingFrame,
    ) -> Option<String> {
        self.dispatch_text(connection, &frame.text, frame.event_tracking_id.clone())
            .await
    }

    pub async fn handle_frame(&self, connection: &Connection, frame: Frame) -> Option<Frame> {
        self.route_frame(connection, frame, EventTrackingId::new()).await
    }

    async fn dispatch_text(
        &self,
        connection: &Connection,
        text: &str,
        event_tracking_id: EventTrackingId,
    ) -> Option<String> {
        trace!("{} <- {text}", connection.id());
        let reply = match Frame::parse(text) {
            Ok(frame) => self.route_frame(connection, frame, event_tracking_id).await,
            Err(e) => self.malformed(connection, text, e),
        };
        reply.map(|frame| frame.to_text())
    }

    async fn route_frame(
        &self,
        connection: &Connection,
        frame: Frame,
        event_tracking_id: EventTrackingId,
    ) -> Option<Frame> {
        match frame {
            Frame::Request(request) => {
                self.handle_request(connection, request, event_tracking_id)
                    .await
            }
            answer => {
                self.handle_answer(answer);
                None
            }
        }
    }

    fn malformed(&self, connection: &Connection, text: &str, e: FrameError) -> Option<Frame> {
        let header = Frame::peek_header(text);
        if matches!(
            header.message_type,
            Some(MessageTypeId::CallResult | MessageTypeId::CallError)
        ) {
            warn!("{}: dropping malformed answer: {e}", connection.id());
            return None;
        }
        let request_id = header
            .request_id
            .unwrap_or_else(|| RequestId::from(UNKNOWN_REQUEST_ID));
        warn!("{}: malformed frame '{request_id}': {e}", connection.id());
        let error = match e {
            FrameError::UnsupportedMessageType(_) => {
                RequestErrorFrame::new(request_id, ResultCode::MessageTypeNotSupported, e.to_string())
            }
            e => CouldNotParse {
                request_id,
                action: header.action.unwrap_or_else(|| Action::from("Unknown")),
                payload: Value::String(text.to_owned()),
                reason: e.to_string(),
            }
            .into_request_error(None),
        };
        Some(error.into())
    }

    async fn handle_request(
        &self,
        connection: &Connection,
        frame: RequestFrame,
        event_tracking_id: EventTrackingId,
    ) -> Option<Frame> {
        let routed = frame.routing.is_some();
        let (destination, path) = match frame.routing {
            Some(routing) => (routing.destination, routing.path),
            None => (
                self.ctx.local.clone(),
                NetworkPath::new(connection.remote().clone()),
            ),
        };
        if destination != self.ctx.local {
            let frame = RequestFrame {
                routing: Some(Routing::new(destination, path)),
                ..frame
            };
            return self.forward_request(connection, frame, event_tracking_id);
        }

        let reply_routing = routed.then(|| {
            Routing::new(
                path.source().clone(),
                NetworkPath::new(self.ctx.local.clone()),
            )
        });
        let Some(action) = self.actions.get(frame.action.as_str()) else {
            warn!(
                "{}: '{}' from {} has no registered action",
                connection.id(),
                frame.action,
                path.source()
            );
            let mut payload =
                ResponseResult::with(ResultKind::Failed, UNDEFINED_HANDLER).to_payload();
            let info = MessageInfo {
                action: frame.action.as_str(),
                request_id: &frame.id,
                source: &self.ctx.local,
            };
            if let Err(e) = self.ctx.signature_policy.sign_response(&info, &mut payload) {
                self.ctx
                    .errors
                    .report(&format!("{}.SignResponse", frame.action), e);
            }
            return Some(
                ResponseFrame {
                    id: frame.id,
                    payload,
                    routing: reply_routing,
                }
                .into(),
            );
        };
        let inbound = InboundFrame {
            timestamp: Utc::now(),
            connection: connection.id(),
            request_id: frame.id,
            destination,
            path,
            event_tracking_id,
            payload: frame.payload,
            cancellation: connection.child_token(),
            timeout: self.ctx.default_timeout,
            routed,
        };
        let result = action.erased.dispatch(&self.ctx, inbound).await;
        Some(result.into_frame(reply_routing))
    }

    /// Passes a Call addressed to another node one hop further, answering it here only if that fails.
    fn forward_request(
        &self,
        origin: &Connection,
        frame: RequestFrame,
        event_tracking_id: EventTrackingId,
    ) -> Option<Frame> {
        let Some(routing) = frame.routing.clone() else {
            return None;
        };
        let source = routing.path.source().clone();
        let reply_routing = Routing::new(source.clone(), NetworkPath::new(self.ctx.local.clone()));
        if routing.path.contains(&self.ctx.local) {
            warn!(
                "{} '{}' already passed through {}: {}",
                frame.action, frame.id, self.ctx.local, routing.path
            );
            return Some(
                RequestErrorFrame::new(frame.id, ResultCode::RpcFrameworkError, "Routing loop detected")
                    .with_routing(Some(reply_routing))
                    .into(),
            );
        }
        let Some(next) = self.connection_to(&routing.destination) else {
            warn!(
                "{} '{}': no route to '{}'",
                frame.action, frame.id, routing.destination
            );
            return Some(
                RequestErrorFrame::new(frame.id, ResultCode::GenericError, "No route to destination")
                    .with_routing(Some(reply_routing))
                    .into(),
            );
        };

        let id = frame.id.clone();
        let key = (source, id.clone());
        let path = routing.path.append(self.ctx.local.clone());
        let text = Frame::Request(RequestFrame {
            routing: Some(Routing::new(routing.destination.clone(), path.clone())),
            ..frame
        })
        .to_text();
        self.remember_forwarded(key.clone(), origin.clone(), event_tracking_id.clone());
        debug!(
            "forwarding '{id}' from {} to '{}' over {}",
            key.0,
            routing.destination,
            next.id()
        );
        let sent = next.send(OutgoingFrame {
            destination: routing.destination,
            path,
            request_id: id.clone(),
            event_tracking_id,
            text,
        });
        if let Err(e) = sent {
            self.take_forwarded(&key);
            warn!("forwarding '{id}' failed: {e}");
            return Some(
                RequestErrorFrame::new(id, ResultCode::GenericError, "No route to destination")
                    .with_routing(Some(reply_routing))
                    .into(),
            );
        }
        None
    }

    /// Answers routed to another node are relayed, all others belong to our own requests.
    fn handle_answer(&self, answer: Frame) {
        let id = answer.request_id().clone();
        let foreign = answer
            .routing()
            .map(|routing| routing.destination.clone())
            .filter(|destination| *destination != self.ctx.local);
        if let Some(destination) = foreign {
            let forwarded = self.take_forwarded(&(destination, id));
            self.relay_answer(answer, forwarded);
            return;
        }
        let answer = match answer {
            Frame::Response(response) => PendingAnswer::Response(response),
            Frame::RequestError(error) => PendingAnswer::RequestError(error),
            Frame::Request(_) => return,
        };
        self.outbound.complete(&id, answer);
    }

    fn relay_answer(&self, answer: Frame, forwarded: Option<ForwardedRequest>) {
        let Some(routing) = answer.routing().cloned() else {
            return;
        };
        let id = answer.request_id().clone();
        let destination = routing.destination;
        let path = routing.path.append(self.ctx.local.clone());
        let (target, event_tracking_id) = match forwarded {
            Some(forwarded) => (Some(forwarded.origin), forwarded.event_tracking_id),
            None => (self.connection_to(&destination), EventTrackingId::new()),
        };
        let Some(target) = target else {
            warn!("answer '{id}' for '{destination}' dropped, no route");
            return;
        };
        let routing = Some(Routing::new(destination.clone(), path.clone()));
        let answer = match answer {
            Frame::Response(response) => Frame::Response(ResponseFrame { routing, ..response }),
            Frame::RequestError(error) => Frame::RequestError(error.with_routing(routing)),
            Frame::Request(_) => return,
        };
        debug!("relaying answer '{id}' to '{destination}' over {}", target.id());
        if let Err(e) = target.send(OutgoingFrame {
            destination,
            path,
            request_id: id.clone(),
            event_tracking_id,
            text: answer.to_text(),
        }) {
            warn!("relaying answer '{id}' failed: {e}");
        }
    }

    fn remember_forwarded(
        &self,
        key: ForwardedKey,
        origin: Connection,
        event_tracking_id: EventTrackingId,
    ) {
        let expires = Instant::now() + self.ctx.default_timeout;
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                ForwardedRequest {
                    origin,
                    event_tracking_id,
                    expires,
                },
            );
        let forwarded = Arc::downgrade(&self.forwarded);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires).await;
            let Some(forwarded) = forwarded.upgrade() else {
                return;
            };
            let mut forwarded = forwarded.lock().unwrap_or_else(PoisonError::into_inner);
            if forwarded.get(&key).is_some_and(|f| f.expires <= Instant::now()) {
                trace!("request '{}' forwarded for '{}' expired without an answer", key.1, key.0);
                forwarded.remove(&key);
            }
        });
    }

    fn take_forwarded(&self, key: &ForwardedKey) -> Option<ForwardedRequest> {
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}
