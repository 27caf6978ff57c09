//! Periodic pool health monitoring
//!
//! Samples the pool on a fixed interval and publishes a [`HealthSnapshot`]
//! through a `watch` channel, keeping a bounded history of past snapshots.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::HealthConfig;
use crate::models::{HealthSnapshot, Proxy, ProxyScore};

/// Read access to the pool being monitored
pub trait PoolView: Send + Sync {
    /// Every proxy in the pool with its score, if it has one
    fn entries(&self) -> Vec<(Proxy, Option<ProxyScore>)>;
}

/// Publication state shared between the monitor and its tick task
struct Publisher {
    /// Bumped on every start and stop; a tick task only publishes while its
    /// own generation is current
    generation: u64,
    history: VecDeque<HealthSnapshot>,
    latest_tx: watch::Sender<Option<HealthSnapshot>>,
}

impl Publisher {
    fn publish(&mut self, snapshot: HealthSnapshot, capacity: usize) {
        if capacity > 0 {
            while self.history.len() >= capacity {
                self.history.pop_front();
            }
            self.history.push_back(snapshot.clone());
        }
        self.latest_tx.send_replace(Some(snapshot));
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Health monitor for the proxy pool
///
/// `start` and `stop` are idempotent. Once `stop` returns no further
/// periodic snapshot is published, even if a sample was in progress.
pub struct HealthMonitor {
    pool: Arc<dyn PoolView>,
    config: HealthConfig,
    publisher: Arc<Mutex<Publisher>>,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<dyn PoolView>, config: HealthConfig) -> Self {
        let (latest_tx, _) = watch::channel(None);
        Self {
            pool,
            config,
            publisher: Arc::new(Mutex::new(Publisher {
                generation: 0,
                history: VecDeque::new(),
                latest_tx,
            })),
            running: Mutex::new(None),
        }
    }

    /// Start periodic sampling; returns `false` if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Health monitor already running");
            return false;
        }

        let generation = {
            let mut publisher = self.publisher.lock();
            publisher.generation += 1;
            publisher.generation
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = TickTask {
            pool: self.pool.clone(),
            config: self.config.clone(),
            publisher: self.publisher.clone(),
            generation,
        };
        let handle = tokio::spawn(task.run(shutdown_rx));

        *running = Some(Running {
            shutdown_tx,
            handle,
        });
        info!(
            "Health monitor started with {}s interval",
            self.config.interval.as_secs_f64()
        );
        true
    }

    /// Stop periodic sampling; returns `false` if it was not running
    pub fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };

        // Invalidate the task's generation first so nothing publishes after this
        self.publisher.lock().generation += 1;
        let _ = running.shutdown_tx.send(true);
        info!("Health monitor stopped");
        true
    }

    /// Stop and wait for the tick task to exit
    pub async fn stop_and_wait(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        self.publisher.lock().generation += 1;
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            warn!("Health monitor task ended abnormally: {}", e);
        }
        info!("Health monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Compute and publish a snapshot right now
    pub fn sample_now(&self) -> HealthSnapshot {
        let snapshot = compute_snapshot(self.pool.as_ref(), &self.config);
        self.publisher
            .lock()
            .publish(snapshot.clone(), self.config.history_size);
        snapshot
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<HealthSnapshot>> {
        self.publisher.lock().latest_tx.subscribe()
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.publisher.lock().latest_tx.borrow().clone()
    }

    /// Past snapshots, oldest first
    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.publisher.lock().history.iter().cloned().collect()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TickTask {
    pool: Arc<dyn PoolView>,
    config: HealthConfig,
    publisher: Arc<Mutex<Publisher>>,
    generation: u64,
}

impl TickTask {
    fn publish_if_current(&self, snapshot: HealthSnapshot) -> bool {
        let mut publisher = self.publisher.lock();
        if publisher.generation != self.generation {
            return false;
        }
        publisher.publish(snapshot, self.config.history_size);
        true
    }

    #[instrument(skip_all, fields(generation = self.generation))]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = compute_snapshot(self.pool.as_ref(), &self.config);
                    debug!(
                        total = snapshot.total_proxies,
                        healthy = snapshot.healthy_proxies,
                        status = %snapshot.health_status,
                        "Pool health sampled"
                    );
                    if !self.publish_if_current(snapshot) {
                        debug!("Discarding snapshot sampled after stop");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Health monitor task shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn compute_snapshot(pool: &dyn PoolView, config: &HealthConfig) -> HealthSnapshot {
    HealthSnapshot::compute(
        &pool.entries(),
        &config.thresholds,
        config.rank_size,
        Utc::now(),
    )
}
