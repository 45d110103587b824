//! Agent behaviour against a local WebSocket peer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nodewatch_agent::link::LinkConfig;
use nodewatch_agent::{Agent, AgentResult, Sampler};
use nodewatch_proto::{CpuInfo, GpuInfo, Report};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

struct FakeSampler {
    host_name: &'static str,
}

impl Sampler for FakeSampler {
    fn sample(&mut self) -> AgentResult<Report> {
        Ok(Report::new(
            self.host_name,
            CpuInfo {
                cpu_percent: 3.0,
                cpu_count: 16,
            },
            vec![GpuInfo {
                index: 0,
                fan_speed: Some(30),
                temperature: 41,
                gpu_utilization: 0,
                memory_total: 24 << 30,
                memory_used: 0,
                memory_free: 24 << 30,
            }],
        ))
    }
}

fn fast_link() -> LinkConfig {
    LinkConfig::default()
        .with_send_interval(Duration::from_millis(20))
        .with_receive_timeout(Duration::from_millis(300))
        .with_retry_backoff(Duration::from_millis(50))
}

/// A peer that forwards every text frame to `frames` and acks it only when
/// `ack` is set. Returns the URL and the number of handshakes seen.
async fn peer(ack: bool, frames: mpsc::UnboundedSender<String>) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let frames = frames.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        let _ = frames.send(text.as_str().to_string());
                        if ack && ws.send(Message::text("OK")).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (Url::parse(&format!("ws://{addr}/ws?key=123456")).unwrap(), accepted)
}

#[tokio::test]
async fn test_streams_reports_over_one_connection() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (url, accepted) = peer(true, tx).await;

    let agent = Agent::new(url, fast_link(), FakeSampler { host_name: "gpu-01" });
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    for _ in 0..5 {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let report = Report::from_json(&frame).unwrap();
        assert_eq!(report.host_name(), "gpu-01");
        assert_eq!(report.cpu_info.cpu_count, 16);
        assert_eq!(report.gpu_info.len(), 1);
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_silent_collector_triggers_reconnect() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let (url, accepted) = peer(false, tx).await;

    let agent = Agent::new(url, fast_link(), FakeSampler { host_name: "gpu-02" });
    let link = Arc::clone(agent.link());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while link.dials() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(accepted.load(Ordering::SeqCst) >= 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_recovers_after_collector_starts_late() {
    // Reserve a port, release it, and only start the peer afterwards.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/ws?key=123456")).unwrap();
    let agent = Agent::new(url, fast_link(), FakeSampler { host_name: "gpu-03" });
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let listener = TcpListener::bind(addr).await.unwrap();
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let report = Report::from_json(first.to_text().unwrap()).unwrap();
    assert_eq!(report.host_name(), "gpu-03");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
