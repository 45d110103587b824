//! End-to-end tests: reports go in through staging and the writer, queries
//! come out through the HTTP router, and a live agent session exercises the
//! WebSocket handshake, ack and disconnect handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeDelta, Utc};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use nodewatch_collector::{CollectorConfig, CollectorServer, CollectorState, IngestWriter, LivenessMonitor, create_router};
use nodewatch_proto::{CpuInfo, GpuInfo, NodeIdentity, Report};
use tokio_tungstenite::tungstenite::{self, Message};
use tower::ServiceExt;

const GB: u64 = 1_000_000_000;

const SCENARIO_A_QUERY: &str = "/get_device?cpu_count=4&max_cpu_percent=50&sum_gpu_count=2\
    &gpu_memory_total=16GB&gpu_memory_free=8GB&max_gpu_utilization=20&only_one=true";

fn gpu(index: u32) -> GpuInfo {
    GpuInfo {
        index,
        fan_speed: Some(25),
        temperature: 41,
        gpu_utilization: 5,
        memory_total: 24 * GB,
        memory_used: 4 * GB,
        memory_free: 20 * GB,
    }
}

fn gpu_box_report() -> Report {
    Report::new(
        "gpu-box-1",
        CpuInfo {
            cpu_percent: 10.0,
            cpu_count: 8,
        },
        // Reported out of order on purpose.
        vec![gpu(1), gpu(0)],
    )
}

fn make_state() -> Arc<CollectorState> {
    Arc::new(CollectorState::new(CollectorConfig::default()))
}

/// Stage a report from `ip` and let the writer persist it.
fn ingest(state: &CollectorState, report: &Report, ip: &str) -> NodeIdentity {
    let (_, identity) = state.stage(&report.to_json().unwrap(), ip).unwrap();
    IngestWriter::for_state(state).drain_one().unwrap().unwrap();
    identity
}

async fn get_json(state: &Arc<CollectorState>, uri: &str) -> serde_json::Value {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = create_router(Arc::clone(state)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn scenario_a_idle_gpu_box_is_matched() {
    let state = make_state();
    ingest(&state, &gpu_box_report(), "10.0.0.7");

    let json = get_json(&state, SCENARIO_A_QUERY).await;
    let results = json.as_array().unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["host_name"], "gpu-box-1");
    assert_eq!(results[0]["ip"], "10.0.0.7");
    assert_eq!(results[0]["cpu_info"]["cpu_count"], 8);

    let gpus = results[0]["gpus_info"].as_array().unwrap();
    assert_eq!(gpus.len(), 2);
    assert_eq!(gpus[0]["index"], 0);
    assert_eq!(gpus[1]["index"], 1);
    assert_eq!(gpus[0]["memory_free"], 20 * GB);
}

#[tokio::test]
async fn scenario_b_silent_node_goes_offline_but_keeps_metrics() {
    let state = make_state();
    let report = gpu_box_report().with_observed_ip("10.0.0.7");
    let identity = state
        .store()
        .upsert_at(&report, Utc::now() - TimeDelta::seconds(11))
        .unwrap()
        .identity;

    let transitions = LivenessMonitor::for_state(&state).sweep_once().unwrap();
    assert_eq!(transitions.len(), 1);

    let json = get_json(&state, "/").await;
    let nodes = json.as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["uid"], identity.to_string());
    assert_eq!(nodes[0]["is_online"], false);
    assert_eq!(nodes[0]["cpu"]["cpu_count"], 8);
    assert_eq!(nodes[0]["gpus"].as_array().unwrap().len(), 2);

    // Offline nodes are never matched.
    let matched = get_json(&state, SCENARIO_A_QUERY).await;
    assert!(matched.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_c_too_few_gpus_returns_empty() {
    let state = make_state();
    ingest(&state, &gpu_box_report(), "10.0.0.7");

    let json = get_json(&state, "/get_device?sum_gpu_count=3").await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn all_matches_returned_when_only_one_is_false() {
    let state = make_state();
    ingest(&state, &gpu_box_report(), "10.0.0.7");
    ingest(&state, &gpu_box_report(), "10.0.0.8");

    let json = get_json(&state, "/get_device?only_one=false").await;
    let ips: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["ip"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ips, ["10.0.0.7", "10.0.0.8"]);
}

async fn start_collector() -> (SocketAddr, Arc<CollectorState>, tokio::sync::oneshot::Sender<()>) {
    let config = CollectorConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_writer_idle(Duration::from_millis(5));
    let server = CollectorServer::new(config);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = server.state();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve_listener(listener, async move {
                let _ = rx.await;
            })
            .await
    });
    (addr, state, tx)
}

async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn live_session_acks_and_marks_offline_on_disconnect() {
    let (addr, state, shutdown) = start_collector().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?key=123456"))
        .await
        .unwrap();

    // The claimed ip must be replaced with the observed one.
    let mut report = gpu_box_report();
    report.host_info.ip = Some("6.6.6.6".to_string());
    ws.send(Message::Text(report.to_json().unwrap().into()))
        .await
        .unwrap();

    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "OK");

    let identity = NodeIdentity::derive("gpu-box-1", "127.0.0.1");
    let store = state.store().clone();
    assert!(wait_for(|| store.get(&identity).unwrap().is_some_and(|s| s.record.is_online())).await);

    // Malformed frames are dropped without closing the session.
    ws.send(Message::Text("{oops".into())).await.unwrap();
    ws.send(Message::Text(gpu_box_report().to_json().unwrap().into()))
        .await
        .unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "OK");

    ws.close(None).await.unwrap();
    assert!(wait_for(|| store.get(&identity).unwrap().is_some_and(|s| !s.record.is_online())).await);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn live_session_rejects_bad_key() {
    let (addr, state, shutdown) = start_collector().await;

    for uri in [format!("ws://{addr}/ws?key=wrong"), format!("ws://{addr}/ws")] {
        let err = tokio_tungstenite::connect_async(uri).await.unwrap_err();
        match err {
            tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            }
            other => panic!("expected HTTP rejection, got {other:?}"),
        }
    }
    assert_eq!(state.store().counts().unwrap(), (0, 0));

    let _ = shutdown.send(());
}
