//! The consumer-facing diagnostics engine.

use std::sync::Arc;

use thiserror::Error;

use crate::collector::{ConnectionCollector, InterfaceCollector, SystemConnections, SystemInterfaces};
use crate::config::DiagnosticsConfig;
use crate::geo::{GeoCache, IpInfoSource, LookupError};
use crate::model::{
    ConnectionSummary, DiagnosticsSnapshot, InterfaceStatus, ProbeKind, ProbeRecord, ProbeResult,
};
use crate::probe::{HttpThroughputMeter, ProbeError, ProbeHandle, ProbeRunner, ThroughputMeter};
use crate::scheduler::Scheduler;
use crate::store::SnapshotStore;

/// Engine construction error types.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("geolocation setup failed: {0}")]
    Geo(#[from] LookupError),
    #[error("probe setup failed: {0}")]
    Probe(#[from] ProbeError),
}

/// Owns the snapshot store, the scheduler and the probe runner.
///
/// Getters never block on collection; `request_*` calls return at once with
/// a handle that resolves when the probe finishes.
pub struct Diagnostics {
    config: DiagnosticsConfig,
    store: Arc<SnapshotStore>,
    scheduler: Scheduler,
    probes: Arc<ProbeRunner>,
}

impl Diagnostics {
    /// Build an engine that reads OS state and talks to the configured
    /// geolocation and speed test services.
    pub fn new(config: DiagnosticsConfig) -> Result<Self, EngineError> {
        let source = IpInfoSource::new(&config.geo_endpoint, config.geo_timeout)?;
        let geo = Arc::new(GeoCache::new(Arc::new(source)));
        let meter = HttpThroughputMeter::new(&config.speed_test)?;

        Ok(Self::with_parts(
            config,
            Arc::new(SystemInterfaces),
            Arc::new(SystemConnections::new(geo)),
            Arc::new(meter),
        ))
    }

    /// Build an engine from explicit collaborators.
    pub fn with_parts(
        config: DiagnosticsConfig,
        interfaces: Arc<dyn InterfaceCollector>,
        connections: Arc<dyn ConnectionCollector>,
        meter: Arc<dyn ThroughputMeter>,
    ) -> Self {
        let store = Arc::new(SnapshotStore::new());
        let scheduler = Scheduler::new(interfaces, connections, store.clone());
        let probes = Arc::new(ProbeRunner::new(
            config.traceroute.clone(),
            config.ping.clone(),
            config.speed_test.timeout,
            meter,
            Arc::downgrade(&store),
        ));

        Self {
            config,
            store,
            scheduler,
            probes,
        }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Begin periodic collection at the configured interval.
    pub fn start(&self) -> bool {
        self.scheduler.start(self.config.tick_interval)
    }

    pub fn stop(&self) {
        self.scheduler.stop()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Collect once, outside the periodic cadence.
    pub async fn refresh(&self) {
        self.scheduler.tick().await
    }

    pub fn get_interfaces(&self) -> Arc<Vec<InterfaceStatus>> {
        self.store.interfaces()
    }

    pub fn get_connection_summary(&self) -> Arc<ConnectionSummary> {
        self.store.connection_summary()
    }

    pub fn get_latest_probe_result(&self, kind: ProbeKind) -> Option<ProbeResult> {
        self.store.latest_probe(kind).map(|r| r.result.clone())
    }

    pub fn get_latest_probe_record(&self, kind: ProbeKind) -> Option<Arc<ProbeRecord>> {
        self.store.latest_probe(kind)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.store.snapshot()
    }

    pub fn request_traceroute(&self, target: &str) -> ProbeHandle {
        self.probes.request_traceroute(target)
    }

    pub fn request_ping(&self, target: &str) -> ProbeHandle {
        self.probes.request_ping(target)
    }

    pub fn request_speed_test(&self) -> ProbeHandle {
        self.probes.request_speed_test()
    }
}
