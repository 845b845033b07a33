use firewatch_core::backend::DocumentBackend;
use firewatch_core::error::BackendError;
use firewatch_core::types::{ChangeKind, CollectionQuery, Document, FIRE_REPORTS};
use firewatch_ws::{GatewayConfig, WsBackend};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Minimal gateway: acks auth and listen, serves one create and rejects
/// every update.
async fn fake_gateway(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let frame: Value = serde_json::from_str(&text).unwrap();
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        let req_id = frame["req_id"].clone();

        let mut replies = Vec::new();
        match method.as_str() {
            "auth" => {
                assert_eq!(frame["params"]["api_key"], "secret");
                replies.push(json!({ "method": "auth", "req_id": req_id, "success": true }));
            }
            "listen" => {
                assert_eq!(frame["params"]["collection"], FIRE_REPORTS);
                assert_eq!(frame["params"]["direction"], "desc");
                replies.push(json!({ "method": "listen", "req_id": req_id, "success": true }));
                replies.push(json!({
                    "channel": "changes",
                    "collection": FIRE_REPORTS,
                    "resume_token": "t1",
                    "data": [
                        { "type": "added", "id": "r1", "data": { "location": "Oak St", "status": "Pending" } }
                    ]
                }));
            }
            "create" => {
                assert_eq!(frame["params"]["data"]["location"], "Elm St");
                replies.push(json!({
                    "method": "create",
                    "req_id": req_id,
                    "success": true,
                    "result": { "id": "srv-1" }
                }));
            }
            "update" => {
                replies.push(json!({
                    "method": "update",
                    "req_id": req_id,
                    "success": false,
                    "error": { "code": "permission-denied", "message": "read only" }
                }));
            }
            _ => {}
        }

        for reply in replies {
            ws.send(Message::Text(reply.to_string())).await.unwrap();
        }
    }
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_backend_against_gateway() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(fake_gateway(listener));

    let backend = WsBackend::spawn(GatewayConfig::new(
        format!("ws://{}", addr),
        "secret",
        "fire-project",
    ));

    let mut stream = backend
        .subscribe_ordered_collection(&CollectionQuery::fire_reports(FIRE_REPORTS))
        .await
        .unwrap();
    let batch = timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("no batch from gateway")
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].kind, ChangeKind::Added);
    assert_eq!(batch[0].id, "r1");

    let id = timeout(
        Duration::from_secs(5),
        backend.create_document(FIRE_REPORTS, doc(json!({ "location": "Elm St" }))),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(id, "srv-1");

    let err = timeout(
        Duration::from_secs(5),
        backend.update_document(FIRE_REPORTS, "r1", doc(json!({ "status": "Resolved" }))),
    )
    .await
    .unwrap();
    match err {
        Err(BackendError::Rejected { code, .. }) => assert_eq!(code, "permission-denied"),
        other => panic!("expected rejection, got {:?}", other),
    }
}

fn reply(frame: &Value, extra: Value) -> Message {
    let mut reply = json!({ "method": frame["method"], "req_id": frame["req_id"] });
    if let (Some(reply), Some(extra)) = (reply.as_object_mut(), extra.as_object()) {
        reply.extend(extra.clone());
    }
    Message::Text(reply.to_string())
}

fn snapshot(changes: Value) -> Message {
    Message::Text(
        json!({ "channel": "changes", "collection": FIRE_REPORTS, "data": changes }).to_string(),
    )
}

/// Serves two connections. The first delivers r1 and r2 then closes the
/// socket; the second answers the re-listen with a snapshot where r1 changed,
/// r2 is gone and r3 is new. No resume token is ever issued.
async fn flaky_gateway(listener: TcpListener) {
    for round in 0..2 {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(&text).unwrap();
            match frame["method"].as_str().unwrap_or_default() {
                "auth" => ws.send(reply(&frame, json!({ "success": true }))).await.unwrap(),
                "listen" if round == 0 => {
                    ws.send(reply(&frame, json!({ "success": true }))).await.unwrap();
                    ws.send(snapshot(json!([
                        { "type": "added", "id": "r1", "data": { "location": "Oak St" } },
                        { "type": "added", "id": "r2", "data": { "location": "Elm St" } }
                    ])))
                    .await
                    .unwrap();
                    ws.send(Message::Close(None)).await.unwrap();
                    break;
                }
                "listen" => {
                    assert!(frame["params"].get("resume_token").is_none());
                    ws.send(reply(&frame, json!({ "success": true }))).await.unwrap();
                    ws.send(snapshot(json!([
                        { "type": "added", "id": "r1", "data": { "location": "Oak Street" } },
                        { "type": "added", "id": "r3", "data": { "location": "Pine Ave" } }
                    ])))
                    .await
                    .unwrap();
                }
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn test_reconnect_reconciles_snapshot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(flaky_gateway(listener));

    let backend = WsBackend::spawn(GatewayConfig::new(format!("ws://{}", addr), "secret", "fire-project"));
    let mut stream = backend
        .subscribe_ordered_collection(&CollectionQuery::fire_reports(FIRE_REPORTS))
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(5), stream.recv()).await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|c| c.kind == ChangeKind::Added));

    let second = timeout(Duration::from_secs(10), stream.recv())
        .await
        .expect("no batch after reconnect")
        .unwrap();
    let kinds: Vec<_> = second.iter().map(|c| (c.id.as_str(), c.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("r1", ChangeKind::Modified),
            ("r3", ChangeKind::Added),
            ("r2", ChangeKind::Removed),
        ]
    );
    assert_eq!(second[0].data.get("location"), Some(&json!("Oak Street")));
}

#[tokio::test]
async fn test_zero_ping_interval_keeps_connection_alive() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(fake_gateway(listener));

    let mut config = GatewayConfig::new(format!("ws://{}", addr), "secret", "fire-project");
    config.ping_interval = Duration::ZERO;
    let backend = WsBackend::spawn(config);

    let mut stream = backend
        .subscribe_ordered_collection(&CollectionQuery::fire_reports(FIRE_REPORTS))
        .await
        .unwrap();
    let batch = timeout(Duration::from_secs(5), stream.recv()).await.unwrap().unwrap();
    assert_eq!(batch[0].id, "r1");

    let id = timeout(
        Duration::from_secs(5),
        backend.create_document(FIRE_REPORTS, doc(json!({ "location": "Elm St" }))),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(id, "srv-1");
}
