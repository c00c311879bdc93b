use crate::event_loop_ws::{WsError, serve_connection};
use ocpp_dispatch::ocpp_frame::NodeId;
use ocpp_dispatch::{NetworkingNode, TraceEvent};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderValue, StatusCode};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async, connect_async};
use tracing::{debug, info, warn};

/// Subprotocols accepted during the handshake, most preferred first.
pub const OCPP_SUBPROTOCOLS: &[&str] = &["ocpp2.0.1", "ocpp2.0", "ocpp1.6"];

/// Accepts connections forever. The last path segment of the handshake URL names the connecting node,
/// e.g. `ws://csms:9000/ocpp/CP1` attaches neighbour `CP1`.
pub async fn listen(
    node: Arc<NetworkingNode>,
    listener: TcpListener,
    trace_tx: Option<mpsc::UnboundedSender<TraceEvent>>,
) {
    loop {
        match listener.accept().await {
            Ok((tcp_stream, remote_addr)) => {
                info!("Got new connection from: {remote_addr}");
                let node = node.clone();
                let trace_tx = trace_tx.clone();
                tokio::spawn(async move {
                    let (remote, ws_stream) = match accept(tcp_stream).await {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("websocket handshake with {remote_addr} failed: {e}");
                            return;
                        }
                    };
                    if let Err(e) = serve_connection(node, remote, ws_stream, trace_tx).await {
                        debug!("{remote_addr}: {e}");
                    }
                });
            }
            Err(e) => {
                warn!("{e:?}");
            }
        }
    }
}

async fn accept(tcp_stream: TcpStream) -> Result<(NodeId, WebSocketStream<TcpStream>), WsError> {
    let mut remote = None;
    let callback = |request: &Request, mut response: Response| {
        let id = request
            .uri()
            .path()
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty());
        let Some(id) = id else {
            let mut error = ErrorResponse::new(Some("Node id missing from the URL".to_owned()));
            *error.status_mut() = StatusCode::NOT_FOUND;
            return Err(error);
        };
        remote = Some(NodeId::from(id));
        if let Some(protocol) = select_subprotocol(request.headers()) {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
        }
        Ok(response)
    };
    let ws_stream = accept_hdr_async(tcp_stream, callback).await?;
    let remote = remote.ok_or(WsError::MissingNodeId)?;
    Ok((remote, ws_stream))
}

/// First subprotocol offered by the client that is also in [OCPP_SUBPROTOCOLS].
fn select_subprotocol(headers: &HeaderMap) -> Option<&'static str> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find_map(|offered| OCPP_SUBPROTOCOLS.iter().copied().find(|p| *p == offered))
}

/// Connects to `url` as a client and serves the connection on a new task.
///
/// `remote` is the node id of the server, frames addressed to it leave over this connection.
pub async fn connect(
    node: Arc<NetworkingNode>,
    remote: NodeId,
    url: &str,
    trace_tx: Option<mpsc::UnboundedSender<TraceEvent>>,
) -> Result<JoinHandle<Result<(), WsError>>, WsError> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(OCPP_SUBPROTOCOLS[0]),
    );
    let (ws_stream, _response) = connect_async(request).await?;
    debug!("connected to {url}");
    Ok(tokio::spawn(serve_connection(node, remote, ws_stream, trace_tx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocol_negotiation() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("ocpp1.6, ocpp2.0.1"),
        );
        assert_eq!(select_subprotocol(&headers), Some("ocpp1.6"));

        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("wamp"));
        assert_eq!(select_subprotocol(&headers), None);
        assert_eq!(select_subprotocol(&HeaderMap::new()), None);
    }
}
