mod event_loop_ws;
mod server;

pub use event_loop_ws::{WsError, serve_connection};
pub use server::{OCPP_SUBPROTOCOLS, connect, listen};
