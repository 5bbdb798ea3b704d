//! Scheduler driving periodic interface and connection collection.

use crate::collector::{CollectionError, ConnectionCollector, InterfaceCollector};
use crate::store::SnapshotStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Runs one collection tick per interval and publishes to the store.
///
/// Ticks never overlap, including across a stop/start cycle: a tick still
/// finishing from a stopped loop holds the tick lock until it publishes.
pub struct Scheduler {
    interfaces: Arc<dyn InterfaceCollector>,
    connections: Arc<dyn ConnectionCollector>,
    store: Arc<SnapshotStore>,
    tick_lock: Arc<Mutex<()>>,
    stop: parking_lot::Mutex<Option<broadcast::Sender<()>>>,
}

impl Scheduler {
    pub fn new(
        interfaces: Arc<dyn InterfaceCollector>,
        connections: Arc<dyn ConnectionCollector>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            interfaces,
            connections,
            store,
            tick_lock: Arc::new(Mutex::new(())),
            stop: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.lock().is_some()
    }

    /// Start ticking every `interval`, the first tick immediately.
    /// Returns `false` if already running.
    pub fn start(&self, interval: Duration) -> bool {
        let mut stop = self.stop.lock();
        if stop.is_some() {
            return false; // Already running
        }

        let (tx, rx) = broadcast::channel(1);
        *stop = Some(tx);
        drop(stop);

        tracing::info!("Scheduler: starting with interval {:?}", interval);

        tokio::spawn(run_tick_loop(self.context(), interval, rx));

        true
    }

    /// Stop ticking. In-flight probes are unaffected. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(tx) = self.stop.lock().take() {
            let _ = tx.send(());
            tracing::info!("Scheduler: stopped");
        }
    }

    /// Run a single tick now, serialized with the periodic ones.
    pub async fn tick(&self) {
        self.context().run().await
    }

    fn context(&self) -> TickContext {
        TickContext {
            interfaces: self.interfaces.clone(),
            connections: self.connections.clone(),
            store: self.store.clone(),
            tick_lock: self.tick_lock.clone(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TickContext {
    interfaces: Arc<dyn InterfaceCollector>,
    connections: Arc<dyn ConnectionCollector>,
    store: Arc<SnapshotStore>,
    tick_lock: Arc<Mutex<()>>,
}

impl TickContext {
    async fn run(&self) {
        let _guard = self.tick_lock.lock().await;
        self.collect_and_publish().await;
    }

    /// Caller must hold `tick_lock`.
    async fn collect_and_publish(&self) {
        let interfaces = self.interfaces.clone();
        let interfaces = contain("interfaces", async move { interfaces.collect().await }).await;

        let connections = self.connections.clone();
        let connections =
            contain("connections", async move { connections.collect().await }).await;

        self.store.publish_tick(interfaces, connections);
    }
}

/// Run a collection step on its own task so that neither an error nor a
/// panic escapes into the tick loop.
async fn contain<T, F>(step: &'static str, fut: F) -> Option<T>
where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T, CollectionError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!("Scheduler: {} collection failed: {}", step, e);
            None
        }
        Err(e) => {
            tracing::error!("Scheduler: {} collection aborted: {}", step, e);
            None
        }
    }
}

async fn run_tick_loop(tick: TickContext, interval: Duration, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Stop wins over a due tick, including one due while waiting for the lock.
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let _guard = tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break,
                    guard = tick.tick_lock.lock() => guard,
                };
                tick.collect_and_publish().await;
            }
        }
    }
}
