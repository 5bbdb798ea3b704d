//! On-demand probes: traceroute, ping and speed test.
//!
//! Every request runs as its own tokio task, independent of the scheduler tick
//! and of other probes. The caller gets a [`ProbeHandle`]; the result is also
//! published to the snapshot store if the store is still alive.

mod ping;
mod speedtest;
mod traceroute;

pub use ping::*;
pub use speedtest::*;
pub use traceroute::*;

use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::{PingConfig, TracerouteConfig};
use crate::graph::RouteGraph;
use crate::model::{ProbeKind, ProbeRecord, ProbeResult};
use crate::store::SnapshotStore;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to launch {0}")]
    Launch(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("probe task aborted: {0}")]
    Aborted(String),
}

impl From<ProbeError> for ProbeResult {
    fn from(e: ProbeError) -> Self {
        ProbeResult::Error {
            message: e.to_string(),
        }
    }
}

/// Reject targets the OS tool would misread.
pub fn validate_target(target: &str) -> Result<(), ProbeError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ProbeError::Config("target is empty".to_string()));
    }
    if target.starts_with('-') {
        return Err(ProbeError::Config(format!("invalid target: {}", target)));
    }
    if target.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProbeError::Config(format!("invalid target: {:?}", target)));
    }
    Ok(())
}

/// Run an external command and return stdout followed by stderr.
///
/// The exit status is only logged: diagnostic tools exit non-zero for
/// unreachable hosts while still printing useful output.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, ProbeError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Launch(format!("{}: {}", program, e)))?;

    if !output.status.success() {
        tracing::debug!("{} exited with {}", program, output.status);
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    Ok(text)
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

/// Pending probe result.
#[derive(Debug)]
pub struct ProbeHandle {
    id: u64,
    kind: ProbeKind,
    task: JoinHandle<ProbeResult>,
}

impl ProbeHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the probe to finish.
    pub async fn result(self) -> ProbeResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => ProbeError::Aborted(e.to_string()).into(),
        }
    }
}

/// Executes probes and publishes their results.
pub struct ProbeRunner {
    traceroute: TracerouteConfig,
    ping: PingConfig,
    speed_test_timeout: Duration,
    meter: Arc<dyn ThroughputMeter>,
    store: Weak<SnapshotStore>,
    next_id: AtomicU64,
}

impl ProbeRunner {
    pub fn new(
        traceroute: TracerouteConfig,
        ping: PingConfig,
        speed_test_timeout: Duration,
        meter: Arc<dyn ThroughputMeter>,
        store: Weak<SnapshotStore>,
    ) -> Self {
        Self {
            traceroute,
            ping,
            speed_test_timeout,
            meter,
            store,
            next_id: AtomicU64::new(1),
        }
    }

    /// Trace the route to `target`.
    pub async fn run_traceroute(&self, target: &str) -> Result<RouteGraph, ProbeError> {
        with_timeout(
            self.traceroute.timeout,
            run_traceroute(&self.traceroute, target),
        )
        .await
    }

    /// Ping `target`; `Ok(None)` means no average could be read.
    pub async fn run_ping(&self, target: &str) -> Result<Option<String>, ProbeError> {
        with_timeout(self.ping.timeout, run_ping(&self.ping, target)).await
    }

    /// Measure download and upload throughput.
    pub async fn run_speed_test(&self) -> Result<Throughput, ProbeError> {
        with_timeout(self.speed_test_timeout, self.meter.measure()).await
    }

    pub fn request_traceroute(self: &Arc<Self>, target: &str) -> ProbeHandle {
        let target = target.trim().to_string();
        self.spawn(ProbeKind::Traceroute, Some(target), |runner, target| async move {
            let target = target.unwrap_or_default();
            match runner.run_traceroute(&target).await {
                Ok(graph) => ProbeResult::Traceroute { graph },
                Err(e) => e.into(),
            }
        })
    }

    pub fn request_ping(self: &Arc<Self>, target: &str) -> ProbeHandle {
        let target = target.trim().to_string();
        self.spawn(ProbeKind::Ping, Some(target), |runner, target| async move {
            let target = target.unwrap_or_default();
            match runner.run_ping(&target).await {
                Ok(average_latency) => ProbeResult::Ping { average_latency },
                Err(e) => e.into(),
            }
        })
    }

    pub fn request_speed_test(self: &Arc<Self>) -> ProbeHandle {
        self.spawn(ProbeKind::SpeedTest, None, |runner, _| async move {
            match runner.run_speed_test().await {
                Ok(t) => ProbeResult::SpeedTest {
                    download_mbps: t.download_mbps(),
                    upload_mbps: t.upload_mbps(),
                },
                Err(e) => e.into(),
            }
        })
    }

    fn spawn<F, Fut>(self: &Arc<Self>, kind: ProbeKind, target: Option<String>, probe: F) -> ProbeHandle
    where
        F: FnOnce(Arc<Self>, Option<String>) -> Fut + Send + 'static,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let runner = self.clone();

        tracing::info!("Probe {} ({}) requested for {:?}", id, kind, target);

        let task = tokio::spawn(async move {
            let result = probe(runner.clone(), target.clone()).await;

            match &result {
                ProbeResult::Error { message } => {
                    tracing::warn!("Probe {} ({}) failed: {}", id, kind, message)
                }
                _ => tracing::info!("Probe {} ({}) completed", id, kind),
            }

            match runner.store.upgrade() {
                Some(store) => {
                    store.publish_probe(ProbeRecord {
                        id,
                        kind,
                        target,
                        result: result.clone(),
                        completed_at: Utc::now(),
                    });
                }
                None => tracing::debug!("Probe {} result discarded, store dropped", id),
            }

            result
        });

        ProbeHandle { id, kind, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HopLabelColumn;
    use async_trait::async_trait;

    struct FakeMeter {
        delay: Duration,
        result: Option<Throughput>,
    }

    #[async_trait]
    impl ThroughputMeter for FakeMeter {
        async fn measure(&self) -> Result<Throughput, ProbeError> {
            tokio::time::sleep(self.delay).await;
            self.result
                .ok_or_else(|| ProbeError::Network("no speed test server reachable".to_string()))
        }
    }

    fn runner(store: &Arc<SnapshotStore>, meter: FakeMeter) -> Arc<ProbeRunner> {
        let traceroute = TracerouteConfig {
            program: "netnav-no-such-traceroute".to_string(),
            args: vec![],
            header_lines: 4,
            label_column: HopLabelColumn::Last,
            timeout: Duration::from_secs(5),
        };
        let ping = PingConfig {
            program: "netnav-no-such-ping".to_string(),
            ..PingConfig::default()
        };
        Arc::new(ProbeRunner::new(
            traceroute,
            ping,
            Duration::from_millis(200),
            Arc::new(meter),
            Arc::downgrade(store),
        ))
    }

    fn fast_meter() -> FakeMeter {
        FakeMeter {
            delay: Duration::from_millis(1),
            result: Some(Throughput {
                download_bps: 50_000_000.0,
                upload_bps: 10_000_000.0,
            }),
        }
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("example.com").is_ok());
        assert!(validate_target("8.8.8.8").is_ok());
        assert!(validate_target("").is_err());
        assert!(validate_target("  ").is_err());
        assert!(validate_target("--help").is_err());
        assert!(validate_target("a b").is_err());
    }

    #[tokio::test]
    async fn test_speed_test_converts_to_mbps_and_publishes() {
        let store = Arc::new(SnapshotStore::new());
        let runner = runner(&store, fast_meter());

        let handle = runner.request_speed_test();
        assert_eq!(handle.kind(), ProbeKind::SpeedTest);
        let result = handle.result().await;
        assert_eq!(
            result,
            ProbeResult::SpeedTest {
                download_mbps: 50.0,
                upload_mbps: 10.0
            }
        );

        let record = store.latest_probe(ProbeKind::SpeedTest).unwrap();
        assert_eq!(record.result, result);
    }

    #[tokio::test]
    async fn test_speed_test_timeout_is_error() {
        let store = Arc::new(SnapshotStore::new());
        let runner = runner(
            &store,
            FakeMeter {
                delay: Duration::from_secs(5),
                result: None,
            },
        );

        let result = runner.request_speed_test().result().await;
        match result {
            ProbeResult::Error { message } => assert!(message.contains("timed out")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_launch_failure_surfaces_as_error_result() {
        let store = Arc::new(SnapshotStore::new());
        let runner = runner(&store, fast_meter());

        let trace = runner.request_traceroute("example.com");
        let ping = runner.request_ping("example.com");
        assert!(trace.id() < ping.id());

        assert!(trace.result().await.is_error());
        assert!(ping.result().await.is_error());
        assert!(store.latest_probe(ProbeKind::Ping).unwrap().result.is_error());
        assert_eq!(
            store.latest_probe(ProbeKind::Traceroute).unwrap().target.as_deref(),
            Some("example.com")
        );
    }

    #[tokio::test]
    async fn test_result_discarded_when_store_dropped() {
        let store = Arc::new(SnapshotStore::new());
        let runner = runner(&store, fast_meter());
        drop(store);

        let result = runner.request_speed_test().result().await;
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn test_concurrent_probes_do_not_serialize() {
        let store = Arc::new(SnapshotStore::new());
        let runner = runner(
            &store,
            FakeMeter {
                delay: Duration::from_millis(100),
                result: Some(Throughput {
                    download_bps: 1_000_000.0,
                    upload_bps: 1_000_000.0,
                }),
            },
        );

        let start = std::time::Instant::now();
        let handles: Vec<_> = (0..5).map(|_| runner.request_speed_test()).collect();
        for handle in handles {
            assert!(!handle.result().await.is_error());
        }
        assert!(start.elapsed() < Duration::from_millis(450));
        assert_eq!(store.latest_probe(ProbeKind::SpeedTest).unwrap().id, 5);
    }
}
