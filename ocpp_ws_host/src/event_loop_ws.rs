use futures_util::{SinkExt, StreamExt};
use ocpp_dispatch::ocpp_frame::{Frame, MessageTypeId, NodeId};
use ocpp_dispatch::{Connection, NetworkingNode, OutgoingFrame, TraceEvent};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum WsError {
    #[error("Outgoing frame queue was closed")]
    CmdTxDropped,
    #[error("ws io error {}", .0)]
    Io(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Other end disconnected?")]
    UnexpectedDisconnect,
    #[error("Handshake request did not name a node id")]
    MissingNodeId,
}

/// Drives one WebSocket connection to neighbour `remote` until it closes.
///
/// Every text frame is handed to `node` on its own task, so requests received over the same
/// connection are processed concurrently. Frames the node wants to send over this connection
/// (own requests, forwarded frames and relayed answers) are written as they come.
/// When the loop ends the connection is detached from the node: pending requests sent over it fail
/// and handlers of requests received over it see their cancellation fire.
pub async fn serve_connection<S>(
    node: Arc<NetworkingNode>,
    remote: NodeId,
    ws_stream: WebSocketStream<S>,
    trace_tx: Option<mpsc::UnboundedSender<TraceEvent>>,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (connection, mut outgoing_rx) = node.attach_connection(remote.clone());
    debug!("ws event loop for '{remote}' ({}) started", connection.id());
    publish(
        &trace_tx,
        TraceEvent::Connected {
            connection: connection.id(),
            remote,
        },
    );

    let r = event_loop(&node, &connection, ws_stream, &mut outgoing_rx, &trace_tx).await;

    node.detach_connection(&connection);
    let reason = match &r {
        Ok(()) => "closed".to_owned(),
        Err(e) => e.to_string(),
    };
    info!("ws event loop for {} exited: {reason}", connection.id());
    publish(
        &trace_tx,
        TraceEvent::Disconnected {
            connection: connection.id(),
            reason,
        },
    );
    r
}

async fn event_loop<S>(
    node: &Arc<NetworkingNode>,
    connection: &Connection,
    ws_stream: WebSocketStream<S>,
    outgoing_rx: &mut mpsc::UnboundedReceiver<OutgoingFrame>,
    trace_tx: &Option<mpsc::UnboundedSender<TraceEvent>>,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut tx, mut rx) = ws_stream.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    loop {
        tokio::select! {
            message = rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str().to_owned();
                        publish(trace_tx, TraceEvent::FrameReceived { connection: connection.id(), text: text.clone() });
                        let node = node.clone();
                        let connection = connection.clone();
                        let reply_tx = reply_tx.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = node.handle_text(&connection, &text).await {
                                _ = reply_tx.send(reply);
                            }
                        });
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        warn!("{}: ignoring {} byte binary frame, OCPP-J is text only", connection.id(), bytes.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("{}: close frame {frame:?}", connection.id());
                        return Ok(());
                    }
                    Some(Ok(other)) => {
                        trace!("{}: {other:?}", connection.id());
                    }
                    Some(Err(e)) => {
                        return Err(e.into());
                    }
                    None => {
                        debug!("got None from rx");
                        return Err(WsError::UnexpectedDisconnect);
                    }
                }
            }
            reply = reply_rx.recv() => {
                let Some(reply) = reply else {
                    continue;
                };
                publish(trace_tx, TraceEvent::ReplySent { connection: connection.id(), text: reply.clone() });
                tx.send(Message::Text(reply.into())).await?;
            }
            frame = outgoing_rx.recv() => {
                let Some(frame) = frame else {
                    info!("{}: outgoing queue closed, exiting", connection.id());
                    tx.send(Message::Close(None)).await?;
                    return Err(WsError::CmdTxDropped);
                };
                let event = match Frame::peek_header(&frame.text).message_type {
                    Some(MessageTypeId::Call) => TraceEvent::RequestSent { connection: connection.id(), text: frame.text.clone() },
                    _ => TraceEvent::ReplySent { connection: connection.id(), text: frame.text.clone() },
                };
                publish(trace_tx, event);
                trace!("{} -> {}: {}", connection.id(), frame.destination, frame.text);
                tx.send(Message::Text(frame.text.into())).await?;
            }
        }
    }
}

fn publish(trace_tx: &Option<mpsc::UnboundedSender<TraceEvent>>, event: TraceEvent) {
    if let Some(tx) = trace_tx {
        _ = tx.send(event);
    }
}
