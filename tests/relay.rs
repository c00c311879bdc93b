mod common;

use common::*;
use ocpp_dispatch::ocpp_frame::{NodeId, ResultCode};
use ocpp_dispatch::{Error, HandlerResult, NodeBuilder, NodeConfig, Response};
use ocpp_messages::{HeartbeatRequest, HeartbeatResponse, RegistrationStatus, ResetStatus};
use std::sync::{Arc, Mutex};

/// CP1 <-> LC1 <-> CSMS, with CP1 and CSMS knowing the other is behind LC1.
fn topology() -> (
    Arc<ocpp_dispatch::NetworkingNode>,
    Arc<ocpp_dispatch::NetworkingNode>,
    Arc<ocpp_dispatch::NetworkingNode>,
) {
    let csms = csms(NodeConfig::new("CSMS"));
    let lc1 = NodeBuilder::new(NodeConfig::new("LC1")).build();
    let cp1 = charging_station("CP1");
    link(&cp1, &lc1);
    link(&lc1, &csms);
    cp1.add_route("CSMS", "LC1");
    csms.add_route("CP1", "LC1");
    (cp1, lc1, csms)
}

#[tokio::test]
async fn request_crosses_local_controller_both_ways() {
    init_tracing();
    let (cp1, lc1, csms) = topology();

    let paths = Arc::new(Mutex::new(Vec::new()));
    let p = paths.clone();
    csms.action::<ocpp_messages::BootNotificationRequest>()
        .unwrap()
        .on_request_received(move |event| {
            p.lock().unwrap().push(event.request.path.to_string());
            async { Ok::<(), ocpp_dispatch::ListenerError>(()) }
        });

    let boot = cp1
        .send(cp1.request("CSMS", boot_notification()))
        .await
        .unwrap();
    assert_eq!(boot.payload.unwrap().status, RegistrationStatus::Accepted);
    assert_eq!(boot.path.hops(), &[NodeId::from("CSMS"), NodeId::from("LC1")]);
    assert_eq!(*paths.lock().unwrap(), vec!["CP1 -> LC1".to_owned()]);

    let reset = csms
        .send(csms.request("CP1", reset_request()))
        .await
        .unwrap();
    assert_eq!(reset.payload.unwrap().status, ResetStatus::Scheduled);

    assert!(lc1.outbound().pending().is_empty());
}

#[tokio::test]
async fn local_controller_answers_its_own_requests() {
    let csms = csms(NodeConfig::new("CSMS"));
    let mut builder = NodeBuilder::new(NodeConfig::new("LC1"));
    builder
        .register::<HeartbeatRequest>()
        .unwrap()
        .on_request(|_, request| async move {
            HandlerResult::Ok(Some(Response::ok(&*request, HeartbeatResponse::now())))
        });
    let lc1 = builder.build();
    let cp1 = charging_station("CP1");
    link(&cp1, &lc1);
    link(&lc1, &csms);

    let heartbeat = cp1
        .send(cp1.request("LC1", HeartbeatRequest {}))
        .await
        .unwrap();
    assert!(heartbeat.is_ok());
    assert_eq!(heartbeat.path.hops(), &[NodeId::from("LC1")]);
}

#[tokio::test]
async fn unknown_destination_is_reported_back() {
    let (cp1, _lc1, _csms) = topology();
    cp1.add_route("CSMS2", "LC1");
    let r = cp1.send(cp1.request("CSMS2", boot_notification())).await;
    match r {
        Err(Error::RemoteError {
            code, description, ..
        }) => {
            assert_eq!(code, ResultCode::GenericError);
            assert_eq!(description, "No route to destination");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

fn reset_request() -> ocpp_messages::ResetRequest {
    ocpp_messages::ResetRequest {
        kind: ocpp_messages::ResetType::Immediate,
        evse_id: Some(1),
    }
}
