//! Latest-state snapshot store shared by the scheduler, probes and consumers.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::model::{
    ConnectionSummary, DiagnosticsSnapshot, InterfaceStatus, ProbeKind, ProbeRecord,
};

/// Thread-safe holder of the current [`DiagnosticsSnapshot`].
///
/// Every write swaps whole `Arc`s under the lock, so readers see either the
/// previous value of a slot or the new one, never a mix.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    state: RwLock<DiagnosticsSnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only copy of everything. Slots are shared, not deep-copied.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.state.read().clone()
    }

    pub fn interfaces(&self) -> Arc<Vec<InterfaceStatus>> {
        self.state.read().interfaces.clone()
    }

    pub fn connection_summary(&self) -> Arc<ConnectionSummary> {
        self.state.read().connections.clone()
    }

    pub fn latest_probe(&self, kind: ProbeKind) -> Option<Arc<ProbeRecord>> {
        self.state.read().probe(kind).cloned()
    }

    pub fn tick_count(&self) -> u64 {
        self.state.read().tick_count
    }

    /// Publish the results of one tick. A `None` slot keeps its previous value.
    pub fn publish_tick(
        &self,
        interfaces: Option<Vec<InterfaceStatus>>,
        connections: Option<ConnectionSummary>,
    ) {
        let interfaces = interfaces.map(Arc::new);
        let connections = connections.map(Arc::new);

        let mut state = self.state.write();
        if let Some(interfaces) = interfaces {
            state.interfaces = interfaces;
        }
        if let Some(connections) = connections {
            state.connections = connections;
        }
        state.tick_count += 1;
        state.last_tick_at = Some(Utc::now());
    }

    /// Store a probe result unless a newer request of the same kind already
    /// published. Returns whether the record was stored.
    pub fn publish_probe(&self, record: ProbeRecord) -> bool {
        let kind = record.kind;
        let record = Arc::new(record);

        let mut state = self.state.write();
        let slot = state.probe_slot_mut(kind);
        if let Some(current) = slot.as_ref() {
            if current.id > record.id {
                tracing::debug!(
                    "Probe {} ({}) superseded by {}",
                    record.id,
                    kind,
                    current.id
                );
                return false;
            }
        }
        *slot = Some(record);
        true
    }
}
