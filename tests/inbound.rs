mod common;

use common::*;
use ocpp_dispatch::ocpp_frame::{NodeId, ResponseResult, ResultKind, Value};
use ocpp_dispatch::{
    HandlerResult, ListenerError, MessageInfo, NodeBuilder, NodeConfig, Response, SignaturePolicy,
};
use ocpp_messages::{
    BootNotificationRequest, BootNotificationResponse, HeartbeatRequest, HeartbeatResponse,
    RegistrationStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

#[tokio::test]
async fn heartbeat_is_answered_to_its_source() {
    init_tracing();
    let csms = csms(NodeConfig::new("CSMS"));
    let (lc1, _rx) = csms.attach_connection(NodeId::from("LC1"));

    let reply = csms
        .handle_text(&lc1, r#"[2,"R1","Heartbeat",{},"CSMS",["CP1","LC1"]]"#)
        .await;
    let reply = json(&reply.unwrap());
    assert_eq!(reply[0], json!(3));
    assert_eq!(reply[1], json!("R1"));
    assert!(reply[2]["currentTime"].is_string());
    assert_eq!(reply[3], json!("CP1"));
    assert_eq!(reply[4], json!(["CSMS"]));

    // direct neighbour, no networking extension on either side
    let (cp2, _rx) = csms.attach_connection(NodeId::from("CP2"));
    let reply = json(&csms.handle_text(&cp2, r#"[2,"R2","Heartbeat",{}]"#).await.unwrap());
    assert_eq!(reply.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn boot_notification_accepted() {
    let csms = csms(NodeConfig::new("CSMS"));
    let (cp1, _rx) = csms.attach_connection(NodeId::from("CP1"));
    let request = serde_json::to_string(&json!([
        2,
        "R1",
        "BootNotification",
        serde_json::to_value(boot_notification()).unwrap()
    ]))
    .unwrap();
    let reply = json(&csms.handle_text(&cp1, &request).await.unwrap());
    let response: BootNotificationResponse = serde_json::from_value(reply[2].clone()).unwrap();
    assert_eq!(response.status, RegistrationStatus::Accepted);
    assert_eq!(response.interval, 300);
}

#[tokio::test]
async fn unregistered_action_fails_with_undefined_handler() {
    let csms = csms(NodeConfig::new("CSMS"));
    let (cp1, _rx) = csms.attach_connection(NodeId::from("CP1"));
    let reply = json(
        &csms
            .handle_text(&cp1, r#"[2,"R9","Authorize",{"idToken":{}}]"#)
            .await
            .unwrap(),
    );
    let result = ResponseResult::from_payload(&reply[2]).unwrap();
    assert_eq!(result.code, ResultKind::Failed);
    assert_eq!(result.description.as_deref(), Some("Undefined handler"));
}

#[tokio::test]
async fn malformed_payload_reaches_no_handler_or_observer() {
    let mut builder = NodeBuilder::new(NodeConfig::new("CSMS"));
    let boot = builder.register::<BootNotificationRequest>().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    boot.on_request(move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
        async { HandlerResult::<BootNotificationResponse>::Ok(None) }
    });
    let c = calls.clone();
    boot.on_request_received(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        async { Ok::<(), ListenerError>(()) }
    });
    let c = calls.clone();
    boot.on_response_sent(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        async { Ok::<(), ListenerError>(()) }
    });
    let node = builder.build();
    let (cp1, _rx) = node.attach_connection(NodeId::from("CP1"));

    let reply = json(
        &node
            .handle_text(&cp1, r#"[2,"R3","BootNotification",{"reason":"PowerUp"}]"#)
            .await
            .unwrap(),
    );
    assert_eq!(reply[0], json!(4));
    assert_eq!(reply[1], json!("R3"));
    assert_eq!(reply[2], json!("FormationViolation"));
    assert_eq!(reply[4]["request"], json!({"reason": "PowerUp"}));
    assert!(reply[4]["reason"].as_str().unwrap().contains("chargingStation"));

    let reply = json(&node.handle_text(&cp1, "[2,\"R4\",").await.unwrap());
    assert_eq!(reply[1], json!("-1"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct RejectAll;

impl SignaturePolicy for RejectAll {
    fn verify_request(&self, info: &MessageInfo<'_>, _: &Value) -> Result<(), String> {
        Err(format!("unsigned {} from {}", info.action, info.source))
    }

    fn verify_response(&self, _: &MessageInfo<'_>, _: &Value) -> Result<(), String> {
        Err("unsigned".into())
    }

    fn sign_request(&self, _: &MessageInfo<'_>, _: &mut Value) -> Result<(), String> {
        Ok(())
    }

    fn sign_response(&self, _: &MessageInfo<'_>, _: &mut Value) -> Result<(), String> {
        Err("no key".into())
    }
}

#[tokio::test]
async fn failed_signature_check_skips_handlers() {
    let mut builder =
        NodeBuilder::new(NodeConfig::new("CSMS").with_signature_policy(RejectAll));
    let heartbeat = builder.register::<HeartbeatRequest>().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    heartbeat.on_request(move |_, request| {
        c.fetch_add(1, Ordering::SeqCst);
        async move { HandlerResult::Ok(Some(Response::ok(&*request, HeartbeatResponse::now()))) }
    });
    let node = builder.build();
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    node.errors().subscribe(move |report| {
        assert_eq!(report.origin, "Heartbeat.SignResponse");
        e.fetch_add(1, Ordering::SeqCst);
    });
    let (cp1, _rx) = node.attach_connection(NodeId::from("CP1"));

    let reply = json(&node.handle_text(&cp1, r#"[2,"R5","Heartbeat",{}]"#).await.unwrap());
    assert_eq!(
        reply[2],
        json!({"result": {"code": "SignatureError", "description": "unsigned Heartbeat from CP1"}})
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // signing the reply failed, it went out anyway
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_handler_runs_first_registered_answers() {
    let mut builder = NodeBuilder::new(NodeConfig::new("CSMS"));
    let boot = builder.register::<BootNotificationRequest>().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    for (interval, delay_ms) in [(10, 30), (20, 0), (30, 10)] {
        let calls = calls.clone();
        boot.on_request(move |_, request| {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                calls.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(Some(Response::ok(
                    &*request,
                    BootNotificationResponse {
                        current_time: chrono::Utc::now(),
                        interval,
                        status: RegistrationStatus::Pending,
                    },
                )))
            }
        });
    }
    let node = builder.build();
    let (cp1, _rx) = node.attach_connection(NodeId::from("CP1"));
    let request = json!([2, "R6", "BootNotification", boot_notification()]).to_string();
    let reply = json(&node.handle_text(&cp1, &request).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(reply[2]["interval"], json!(10));
}

#[tokio::test]
async fn handler_error_becomes_exception_occurred() {
    let mut builder = NodeBuilder::new(NodeConfig::new("CSMS"));
    builder
        .register::<HeartbeatRequest>()
        .unwrap()
        .on_request(|_, _| async {
            HandlerResult::<HeartbeatResponse>::Err("clock not synchronized".into())
        });
    let node = builder.build();
    let (cp1, _rx) = node.attach_connection(NodeId::from("CP1"));
    let reply = json(&node.handle_text(&cp1, r#"[2,"R7","Heartbeat",{}]"#).await.unwrap());
    assert_eq!(
        reply[2],
        json!({"result": {"code": "ExceptionOccured", "description": "clock not synchronized"}})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_on_one_connection_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let mut builder = NodeBuilder::new(NodeConfig::new("CSMS"));
    let b = barrier.clone();
    builder
        .register::<HeartbeatRequest>()
        .unwrap()
        .on_request(move |_, request| {
            let b = b.clone();
            async move {
                b.wait().await;
                HandlerResult::Ok(Some(Response::ok(&*request, HeartbeatResponse::now())))
            }
        });
    let b = barrier.clone();
    builder
        .register::<BootNotificationRequest>()
        .unwrap()
        .on_request(move |_, request| {
            let b = b.clone();
            async move {
                b.wait().await;
                HandlerResult::Ok(Some(Response::ok(
                    &*request,
                    BootNotificationResponse {
                        current_time: chrono::Utc::now(),
                        interval: 60,
                        status: RegistrationStatus::Accepted,
                    },
                )))
            }
        });
    let node = builder.build();
    let (cp1, _rx) = node.attach_connection(NodeId::from("CP1"));

    // each handler only finishes once the other one started
    let r1 = {
        let (node, cp1) = (node.clone(), cp1.clone());
        tokio::spawn(async move { node.handle_text(&cp1, r#"[2,"R1","Heartbeat",{}]"#).await })
    };
    let r2 = {
        let (node, cp1) = (node.clone(), cp1.clone());
        let request = json!([2, "R2", "BootNotification", boot_notification()]).to_string();
        tokio::spawn(async move { node.handle_text(&cp1, &request).await })
    };
    let (r1, r2) = tokio::time::timeout(Duration::from_secs(5), async {
        (r1.await.unwrap(), r2.await.unwrap())
    })
    .await
    .expect("both requests complete");
    assert_eq!(json(&r1.unwrap())[1], json!("R1"));
    assert_eq!(json(&r2.unwrap())[1], json!("R2"));
}
