//! Adapter IN: one generic request pipeline, instantiated once per action.
//!
//! ```text
//! InboundFrame
//!   1. parse            --err--> CouldNotParse       (CallError FormationViolation)
//!                       --panic--> FormationViolation (CallError FormationViolation)
//!   2. verify signature --err--> response = SignatureError, handlers skipped
//!   3. notify request received
//!   4. handlers, all concurrently, all awaited, first Some in registration order wins
//!   5. address + sign response (signing failure is reported, reply still goes out)
//!   6. notify response sent
//!   7. CallResult back to the source of the request
//! ```

use crate::config::NodeContext;
use crate::connection::ConnectionId;
use crate::listeners::{Listener, ListenerId, Registry};
use crate::message::{OcppRequest, ParseContext, Request, Response};
use crate::panic_message;
use crate::signature::MessageInfo;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use ocpp_frame::{
    Action, CouldNotParse, EventTrackingId, Frame, FormationViolation, NetworkPath, NodeId,
    RequestId, ResponseFrame, Routing, Value,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub const UNDEFINED_HANDLER: &str = "Undefined handler";

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// `Ok(None)` means the handler had nothing to say, another handler may answer.
pub type HandlerResult<R> = Result<Option<Response<R>>, HandlerError>;

type ResponseOf<T> = Response<<T as OcppRequest>::Response>;

type RequestHandler<T> = dyn Fn(HandlerContext, Arc<Request<T>>) -> BoxFuture<'static, HandlerResult<<T as OcppRequest>::Response>>
    + Send
    + Sync;

type CustomParser<T> = dyn Fn(&Value, &ParseContext<'_>) -> Result<T, String> + Send + Sync;

/// Gets the response data and its default JSON, returns the JSON to put on the wire.
type CustomSerializer<R> = dyn Fn(&R, Value) -> Value + Send + Sync;

#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub timestamp: DateTime<Utc>,
    pub local: NodeId,
    pub connection: ConnectionId,
    pub cancellation: CancellationToken,
}

#[derive(Debug)]
pub struct RequestReceived<T> {
    pub timestamp: DateTime<Utc>,
    pub local: NodeId,
    pub connection: ConnectionId,
    pub request: Arc<Request<T>>,
}

#[derive(Debug)]
pub struct ResponseSent<T: OcppRequest> {
    pub timestamp: DateTime<Utc>,
    pub local: NodeId,
    pub connection: ConnectionId,
    pub request: Arc<Request<T>>,
    pub response: ResponseOf<T>,
    /// Time spent in the pipeline up to this point.
    pub runtime: Duration,
}

/// A CALL frame as delivered by the transport, already resolved to this action.
#[derive(Clone, Debug)]
pub struct InboundFrame {
    pub timestamp: DateTime<Utc>,
    pub connection: ConnectionId,
    pub request_id: RequestId,
    pub destination: NodeId,
    pub path: NetworkPath,
    pub event_tracking_id: EventTrackingId,
    pub payload: Value,
    pub cancellation: CancellationToken,
    pub timeout: Duration,
    /// Frame came with destination and network path, the reply must carry them too.
    pub routed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchResult {
    Reply(ResponseFrame),
    CouldNotParse(CouldNotParse),
    FormationViolation(FormationViolation),
}

impl DispatchResult {
    /// Frame to send back to the requester, `routing` is used for the CallError outcomes.
    pub fn into_frame(self, routing: Option<Routing>) -> Frame {
        match self {
            DispatchResult::Reply(reply) => reply.into(),
            DispatchResult::CouldNotParse(e) => e.into_request_error(routing).into(),
            DispatchResult::FormationViolation(e) => e.into_request_error(routing).into(),
        }
    }
}

/// Handlers, observers and codec hooks of one action.
pub struct ActionDispatcher<T: OcppRequest> {
    on_request_received: Registry<Listener<RequestReceived<T>>>,
    handlers: Registry<RequestHandler<T>>,
    on_response_sent: Registry<Listener<ResponseSent<T>>>,
    custom_parser: RwLock<Option<Arc<CustomParser<T>>>>,
    custom_serializer: RwLock<Option<Arc<CustomSerializer<T::Response>>>>,
}

impl<T: OcppRequest> Default for ActionDispatcher<T> {
    fn default() -> Self {
        ActionDispatcher {
            on_request_received: Registry::default(),
            handlers: Registry::default(),
            on_response_sent: Registry::default(),
            custom_parser: RwLock::new(None),
            custom_serializer: RwLock::new(None),
        }
    }
}

impl<T: OcppRequest> ActionDispatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(&self) -> &'static str {
        T::ACTION
    }

    /// Adds a business handler. Handlers are ranked by registration order.
    pub fn on_request<H, Fut>(&self, handler: H) -> ListenerId
    where
        H: Fn(HandlerContext, Arc<Request<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<T::Response>> + Send + 'static,
    {
        debug!("{}: handler registered", T::ACTION);
        self.handlers.add(Arc::new(
            move |context: HandlerContext,
                  request: Arc<Request<T>>|
                  -> BoxFuture<'static, HandlerResult<T::Response>> {
                Box::pin(handler(context, request))
            },
        ))
    }

    pub fn remove_handler(&self, id: ListenerId) -> bool {
        self.handlers.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn on_request_received<L, Fut>(&self, listener: L) -> ListenerId
    where
        L: Fn(Arc<RequestReceived<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), crate::ListenerError>> + Send + 'static,
    {
        self.on_request_received.subscribe(listener)
    }

    pub fn remove_request_received_listener(&self, id: ListenerId) -> bool {
        self.on_request_received.remove(id)
    }

    pub fn on_response_sent<L, Fut>(&self, listener: L) -> ListenerId
    where
        L: Fn(Arc<ResponseSent<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), crate::ListenerError>> + Send + 'static,
    {
        self.on_response_sent.subscribe(listener)
    }

    pub fn remove_response_sent_listener(&self, id: ListenerId) -> bool {
        self.on_response_sent.remove(id)
    }

    /// Replaces [OcppRequest::try_parse] for this action.
    pub fn set_custom_parser(
        &self,
        parser: impl Fn(&Value, &ParseContext<'_>) -> Result<T, String> + Send + Sync + 'static,
    ) {
        *self
            .custom_parser
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(parser));
    }

    pub fn clear_custom_parser(&self) {
        *self
            .custom_parser
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Post-processes the JSON of Ok responses before they are signed.
    pub fn set_custom_serializer(
        &self,
        serializer: impl Fn(&T::Response, Value) -> Value + Send + Sync + 'static,
    ) {
        *self
            .custom_serializer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(serializer));
    }

    pub fn clear_custom_serializer(&self) {
        *self
            .custom_serializer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Runs the whole pipeline for one inbound request.
    pub async fn process(&self, ctx: &NodeContext, frame: InboundFrame) -> DispatchResult {
        let started = Instant::now();
        let action = T::ACTION;
        let connection = frame.connection;
        let routed = frame.routed;
        trace!("{action} '{}': received over {connection}", frame.request_id);

        let parsed = {
            let parse_context = ParseContext {
                request_id: &frame.request_id,
                destination: &frame.destination,
                path: &frame.path,
            };
            let custom_parser = self.custom_parser();
            std::panic::catch_unwind(AssertUnwindSafe(|| match &custom_parser {
                Some(parser) => parser(&frame.payload, &parse_context),
                None => T::try_parse(&frame.payload, &parse_context),
            }))
        };
        let payload = match parsed {
            Ok(Ok(payload)) => payload,
            Ok(Err(reason)) => {
                warn!("{action} '{}' could not be parsed: {reason}", frame.request_id);
                return DispatchResult::CouldNotParse(CouldNotParse {
                    request_id: frame.request_id,
                    action: Action::new(action),
                    payload: frame.payload,
                    reason,
                });
            }
            Err(panic) => {
                let exception = panic_message(panic);
                ctx.errors
                    .report(&format!("{action}.Parse"), exception.clone());
                return DispatchResult::FormationViolation(FormationViolation {
                    request_id: frame.request_id,
                    action: Action::new(action),
                    payload: frame.payload,
                    exception,
                });
            }
        };

        let request = Arc::new(Request {
            id: frame.request_id,
            action: Action::new(action),
            destination: frame.destination,
            path: frame.path,
            timestamp: frame.timestamp,
            timeout: frame.timeout,
            event_tracking_id: frame.event_tracking_id,
            cancellation: frame.cancellation,
            payload,
        });

        let info = MessageInfo {
            action,
            request_id: &request.id,
            source: request.source(),
        };
        let rejected = match ctx
            .signature_policy
            .verify_request(&info, &request.payload.to_json())
        {
            Ok(()) => None,
            Err(e) => {
                warn!("{action} '{}': signature rejected: {e}", request.id);
                Some(ResponseOf::<T>::signature_error(&*request, e))
            }
        };

        let received = RequestReceived {
            timestamp: Utc::now(),
            local: ctx.local.clone(),
            connection,
            request: request.clone(),
        };
        self.on_request_received
            .notify(
                Arc::new(received),
                &ctx.errors,
                &format!("{action}.OnRequestReceived"),
            )
            .await;

        let mut response = match rejected {
            Some(response) => response,
            None => self.invoke_handlers(ctx, &request, connection).await,
        };

        response.address_to(&*request, &ctx.local);
        let mut payload = response.payload_json();
        if let (true, Some(data), Some(serializer)) = (
            response.result.is_ok(),
            response.payload.as_ref(),
            self.custom_serializer(),
        ) {
            payload = serializer(data, payload);
        }
        let info = MessageInfo {
            action,
            request_id: &response.request_id,
            source: &ctx.local,
        };
        if let Err(e) = ctx.signature_policy.sign_response(&info, &mut payload) {
            ctx.errors.report(&format!("{action}.SignResponse"), e);
        }

        let reply = ResponseFrame {
            id: response.request_id.clone(),
            payload,
            routing: routed
                .then(|| Routing::new(response.destination.clone(), response.path.clone())),
        };

        let sent = ResponseSent {
            timestamp: Utc::now(),
            local: ctx.local.clone(),
            connection,
            request,
            response,
            runtime: started.elapsed(),
        };
        self.on_response_sent
            .notify(Arc::new(sent), &ctx.errors, &format!("{action}.OnResponseSent"))
            .await;

        trace!("{action} '{}': replying", reply.id);
        DispatchResult::Reply(reply)
    }

    async fn invoke_handlers(
        &self,
        ctx: &NodeContext,
        request: &Arc<Request<T>>,
        connection: ConnectionId,
    ) -> ResponseOf<T> {
        let handlers = self.handlers.snapshot();
        if handlers.is_empty() {
            debug!("{}: no handler registered", T::ACTION);
            return ResponseOf::<T>::failed(&**request, UNDEFINED_HANDLER);
        }
        let context = HandlerContext {
            timestamp: Utc::now(),
            local: ctx.local.clone(),
            connection,
            cancellation: request.cancellation.clone(),
        };
        let results = join_all(handlers.into_iter().map(|handler| {
            let context = context.clone();
            let request = request.clone();
            AssertUnwindSafe(async move { handler(context, request).await }).catch_unwind()
        }))
        .await;

        let origin = format!("{}.OnRequest", T::ACTION);
        let mut winner = None;
        let mut failure = None;
        for result in results {
            let outcome = match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    let message = e.to_string();
                    ctx.errors.report(&origin, message.clone());
                    failure.get_or_insert(message);
                    None
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    ctx.errors.report(&origin, message.clone());
                    failure.get_or_insert(message);
                    None
                }
            };
            if winner.is_none() {
                winner = outcome;
            }
        }
        if let Some(message) = failure {
            return ResponseOf::<T>::exception_occurred(&**request, message);
        }
        winner.unwrap_or_else(|| ResponseOf::<T>::failed(&**request, UNDEFINED_HANDLER))
    }

    fn custom_parser(&self) -> Option<Arc<CustomParser<T>>> {
        self.custom_parser
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn custom_serializer(&self) -> Option<Arc<CustomSerializer<T::Response>>> {
        self.custom_serializer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Type-erased view of an [ActionDispatcher], what the node keeps per action name.
pub(crate) trait InboundAction: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a NodeContext,
        frame: InboundFrame,
    ) -> BoxFuture<'a, DispatchResult>;
}

impl<T: OcppRequest> InboundAction for ActionDispatcher<T> {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a NodeContext,
        frame: InboundFrame,
    ) -> BoxFuture<'a, DispatchResult> {
        Box::pin(self.process(ctx, frame))
    }
}
