//! The send and receive loops sharing one [`LinkManager`].

use std::sync::Arc;
use std::time::Duration;

use nodewatch_proto::{ACK, Report};
use parking_lot::Mutex;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::manager::LinkManager;
use crate::error::{AgentError, AgentResult, LinkError, LinkResult};
use crate::sampler::Sampler;

/// Sample the host on the blocking pool.
pub(crate) async fn sample_report<S: Sampler>(sampler: &Arc<Mutex<S>>) -> AgentResult<Report> {
    let sampler = Arc::clone(sampler);
    tokio::task::spawn_blocking(move || sampler.lock().sample())
        .await
        .map_err(|e| AgentError::Sampling(format!("sampling task failed: {e}")))?
}

/// Take one sample and send it over the current link.
///
/// A failed write invalidates the link it was written to.
///
/// # Errors
///
/// Returns the sampling, encoding, dial, or send failure.
pub async fn send_once<S: Sampler>(manager: &LinkManager, sampler: &Arc<Mutex<S>>) -> AgentResult<()> {
    let report = sample_report(sampler).await?;
    let payload = report.to_json()?;

    let link = manager.acquire().await?;
    if let Err(e) = link.send_text(payload).await {
        manager.invalidate(link.generation()).await;
        return Err(e.into());
    }
    trace!(generation = link.generation(), "report sent");
    Ok(())
}

/// Send one report per tick until cancelled.
///
/// Never exits on error: link failures back off and redial, sampling
/// failures skip the tick.
pub async fn send_loop<S: Sampler>(
    manager: Arc<LinkManager>,
    sampler: Arc<Mutex<S>>,
    cancel: CancellationToken,
) {
    let config = *manager.config();
    let mut ticker = interval(config.send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match send_once(&manager, &sampler).await {
            Ok(()) => {}
            Err(AgentError::Link(e)) => {
                let backoff = config.backoff_for(&e);
                log_link_failure(&e, backoff, "failed to send report");
                sleep_or_cancel(backoff, &cancel).await;
            }
            Err(e) => warn!(error = %e, "skipping report"),
        }
    }
    debug!("send loop stopped");
}

/// Read frames from the collector until cancelled.
///
/// If nothing arrives within the receive timeout the link is presumed dead:
/// it is invalidated and the loop redials after the retry backoff.
///
/// # Errors
///
/// Returns the error after a closed connection or a hard transport error,
/// once the link has been invalidated. The caller restarts the loop.
pub async fn receive_loop(manager: Arc<LinkManager>, cancel: CancellationToken) -> LinkResult<()> {
    let config = *manager.config();

    loop {
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            acquired = manager.acquire() => acquired,
        };
        let link = match acquired {
            Ok(link) => link,
            Err(e) => {
                let backoff = config.backoff_for(&e);
                log_link_failure(&e, backoff, "failed to connect to collector");
                sleep_or_cancel(backoff, &cancel).await;
                continue;
            }
        };

        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = timeout(config.receive_timeout, link.recv()) => frame,
        };

        match frame {
            Ok(Ok(Some(text))) if text == ACK => trace!("report acknowledged"),
            Ok(Ok(Some(text))) => debug!(%text, "unexpected message from collector"),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                manager.invalidate(link.generation()).await;
                return Err(e);
            }
            Err(_) => {
                warn!(
                    generation = link.generation(),
                    timeout = ?config.receive_timeout,
                    "no message from collector, reconnecting"
                );
                manager.invalidate(link.generation()).await;
                sleep_or_cancel(config.retry_backoff, &cancel).await;
            }
        }
    }
}

/// Run [`receive_loop`], restarting it after every failure, until
/// cancelled.
pub async fn supervise_receive(manager: Arc<LinkManager>, cancel: CancellationToken) {
    let config = *manager.config();
    loop {
        match receive_loop(Arc::clone(&manager), cancel.clone()).await {
            Ok(()) => break,
            Err(LinkError::Closed) => {
                warn!("collector closed the connection, restarting receive loop");
                sleep_or_cancel(config.retry_backoff, &cancel).await;
            }
            Err(e) => {
                warn!(error = %e, "receive loop failed, restarting");
                sleep_or_cancel(config.backoff_for(&e), &cancel).await;
            }
        }
    }
    debug!("receive loop stopped");
}

/// Auth rejections log at error, everything else at warn.
fn log_link_failure(err: &LinkError, backoff: Duration, what: &str) {
    if err.is_auth() {
        error!(error = %err, ?backoff, "{what}: check the agent key");
    } else {
        warn!(error = %err, ?backoff, "{what}");
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::config::LinkConfig;
    use nodewatch_proto::CpuInfo;
    use url::Url;

    struct FixedSampler;

    impl Sampler for FixedSampler {
        fn sample(&mut self) -> AgentResult<Report> {
            Ok(Report::new(
                "node-a",
                CpuInfo {
                    cpu_percent: 12.5,
                    cpu_count: 8,
                },
                Vec::new(),
            ))
        }
    }

    struct FailingSampler;

    impl Sampler for FailingSampler {
        fn sample(&mut self) -> AgentResult<Report> {
            Err(AgentError::Sampling("no /proc".to_string()))
        }
    }

    fn unreachable_manager() -> LinkManager {
        // Port 1 on loopback refuses connections.
        let url = Url::parse("ws://127.0.0.1:1/ws?key=k").unwrap();
        LinkManager::new(url, LinkConfig::default())
    }

    #[tokio::test]
    async fn test_sample_report_runs_sampler() {
        let sampler = Arc::new(Mutex::new(FixedSampler));
        let report = sample_report(&sampler).await.unwrap();
        assert_eq!(report.host_name(), "node-a");
        assert_eq!(report.cpu_info.cpu_count, 8);
    }

    #[tokio::test]
    async fn test_send_once_sampling_failure_skips_dial() {
        let manager = unreachable_manager();
        let sampler = Arc::new(Mutex::new(FailingSampler));

        let err = send_once(&manager, &sampler).await.unwrap_err();
        assert!(matches!(err, AgentError::Sampling(_)));
        assert_eq!(manager.dials(), 0);
    }

    #[tokio::test]
    async fn test_send_once_dial_failure_is_link_error() {
        let manager = unreachable_manager();
        let sampler = Arc::new(Mutex::new(FixedSampler));

        let err = send_once(&manager, &sampler).await.unwrap_err();
        assert!(matches!(err, AgentError::Link(LinkError::Dial(_))));
    }

    #[tokio::test]
    async fn test_receive_loop_stops_on_cancel() {
        let manager = Arc::new(unreachable_manager());
        let cancel = CancellationToken::new();
        cancel.cancel();

        receive_loop(manager, cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_sleep_or_cancel_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        sleep_or_cancel(Duration::from_secs(60), &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
