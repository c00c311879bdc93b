#![allow(dead_code)]

use chrono::Utc;
use ocpp_dispatch::{
    Connection, HandlerResult, NetworkingNode, NodeBuilder, NodeConfig, OutgoingFrame, Response,
};
use ocpp_frame::Value;
use ocpp_messages::{
    BootNotificationRequest, BootNotificationResponse, BootReason, ChargingStation,
    HeartbeatRequest, HeartbeatResponse, RegistrationStatus, ResetRequest, ResetResponse,
    ResetStatus,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn init_tracing() {
    _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Central system: accepts every BootNotification and answers Heartbeats.
pub fn csms(config: NodeConfig) -> Arc<NetworkingNode> {
    let mut builder = NodeBuilder::new(config);
    builder
        .register::<HeartbeatRequest>()
        .unwrap()
        .on_request(|_, request| async move {
            HandlerResult::Ok(Some(Response::ok(&*request, HeartbeatResponse::now())))
        });
    builder
        .register::<BootNotificationRequest>()
        .unwrap()
        .on_request(|_, request| async move {
            HandlerResult::Ok(Some(Response::ok(
                &*request,
                BootNotificationResponse {
                    current_time: Utc::now(),
                    interval: 300,
                    status: RegistrationStatus::Accepted,
                },
            )))
        });
    builder.build()
}

/// Charging station: accepts Reset.
pub fn charging_station(id: &str) -> Arc<NetworkingNode> {
    let mut builder = NodeBuilder::new(NodeConfig::new(id));
    builder
        .register::<ResetRequest>()
        .unwrap()
        .on_request(|_, request| async move {
            HandlerResult::Ok(Some(Response::ok(
                &*request,
                ResetResponse {
                    status: ResetStatus::Scheduled,
                },
            )))
        });
    builder.build()
}

pub fn boot_notification() -> BootNotificationRequest {
    BootNotificationRequest {
        charging_station: ChargingStation {
            model: "SingleSocketCharger".into(),
            vendor_name: "VendorX".into(),
            serial_number: Some("SN-0001".into()),
            firmware_version: None,
        },
        reason: BootReason::PowerUp,
    }
}

pub fn json(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

pub async fn next_json(rx: &mut UnboundedReceiver<OutgoingFrame>) -> Value {
    let frame = rx.recv().await.expect("a frame");
    json(&frame.text)
}

/// Connects `a` and `b` in memory, every frame one of them sends is handled by the other.
///
/// Returns the connection of `a` to `b` and the one of `b` to `a`.
pub fn link(a: &Arc<NetworkingNode>, b: &Arc<NetworkingNode>) -> (Connection, Connection) {
    let (a_to_b, a_rx) = a.attach_connection(b.local_id().clone());
    let (b_to_a, b_rx) = b.attach_connection(a.local_id().clone());
    pump(a_rx, b.clone(), b_to_a.clone(), a.clone(), a_to_b.clone());
    pump(b_rx, a.clone(), a_to_b.clone(), b.clone(), b_to_a.clone());
    (a_to_b, b_to_a)
}

/// Frames leaving `from` are handled by `to` as if received over `to_conn`, replies go back the same way.
fn pump(
    mut rx: UnboundedReceiver<OutgoingFrame>,
    to: Arc<NetworkingNode>,
    to_conn: Connection,
    from: Arc<NetworkingNode>,
    from_conn: Connection,
) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let to = to.clone();
            let to_conn = to_conn.clone();
            let from = from.clone();
            let from_conn = from_conn.clone();
            tokio::spawn(async move {
                if let Some(reply) = to.handle_outgoing(&to_conn, &frame).await {
                    from.handle_text(&from_conn, &reply).await;
                }
            });
        }
    });
}
