//! Worker supervision.
//!
//! Local producer tasks implement the small `Worker` capability set; the
//! supervisor owns their lifecycle. A periodic sweep restarts any managed
//! producer whose heartbeat has gone stale, with exponential backoff and a
//! restart budget that moves hopeless producers to `Stopped`.

use crate::registry::{ProducerRegistry, ProducerStatus};
use flipdisc_core::{DiscError, DiscResult, SupervisorSettings};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

/// A locally managed producer task.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Begin producing frames. Must be idempotent.
    async fn start(&self) -> DiscResult<()>;

    /// Stop producing frames.
    async fn stop(&self) -> DiscResult<()>;

    /// Forced termination, used when `stop` exceeds its timeout.
    fn terminate(&self) {}
}

/// Lifecycle notifications for the stats stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started(String),
    Stopped(String),
    Restarting(String),
    Exhausted(String),
}

pub struct Supervisor {
    settings: SupervisorSettings,
    registry: Arc<ProducerRegistry>,
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
    restart_log: Mutex<HashMap<String, VecDeque<Instant>>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, registry: Arc<ProducerRegistry>) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            settings,
            registry,
            workers: RwLock::new(HashMap::new()),
            restart_log: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Register and start a worker.
    pub async fn manage(&self, worker: Arc<dyn Worker>) -> DiscResult<()> {
        let id = worker.id().to_string();
        self.command(worker.as_ref(), true).await?;
        self.registry.heartbeat(&id).await;
        self.workers.write().await.insert(id.clone(), worker);
        log::info!("worker {} started", id);
        let _ = self.events.send(WorkerEvent::Started(id));
        Ok(())
    }

    /// Stop a worker and clear its record.
    pub async fn stop(&self, id: &str) -> DiscResult<()> {
        let worker = self.workers.write().await.remove(id).ok_or_else(|| {
            DiscError::invalid_config(format!("no managed worker '{}'", id))
        })?;
        if let Err(e) = self.command(worker.as_ref(), false).await {
            log::warn!("worker {} stop failed: {}", id, e);
        }
        self.registry.clear(id).await;
        self.restart_log.lock().await.remove(id);
        log::info!("worker {} stopped", id);
        let _ = self.events.send(WorkerEvent::Stopped(id.to_string()));
        Ok(())
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.workers.read().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    pub async fn managed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn the periodic liveness sweep.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let supervisor = self;
        tokio::spawn(async move {
            let period = Duration::from_millis(supervisor.settings.sweep_interval_ms.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                supervisor.sweep().await;
            }
        })
    }

    /// One liveness pass over every running producer.
    pub async fn sweep(&self) {
        let stale = self
            .registry
            .stale_running(self.settings.heartbeat_timeout_ms)
            .await;
        for id in stale {
            let worker = self.workers.read().await.get(&id).cloned();
            match worker {
                Some(worker) => self.restart(&id, worker).await,
                None => {
                    // Not locally managed (e.g. an off-box producer that
                    // went quiet); nothing to restart.
                    log::warn!("producer {} heartbeat stale, marking stopped", id);
                    self.registry
                        .set_status(&id, ProducerStatus::Stopped, Some("heartbeat timeout".into()))
                        .await;
                    let _ = self.events.send(WorkerEvent::Stopped(id));
                }
            }
        }
    }

    async fn restart(&self, id: &str, worker: Arc<dyn Worker>) {
        self.registry
            .set_status(id, ProducerStatus::Restarting, None)
            .await;
        let _ = self.events.send(WorkerEvent::Restarting(id.to_string()));

        if self.budget_exceeded(id).await {
            let err = DiscError::supervisor_exhausted(id);
            log::error!("{}", err);
            self.registry
                .set_status(id, ProducerStatus::Stopped, Some(err.message.clone()))
                .await;
            let _ = self.events.send(WorkerEvent::Exhausted(id.to_string()));
            return;
        }

        let count = self.registry.bump_restart_count(id).await;
        log::warn!("worker {} heartbeat stale, restart #{}", id, count);

        if let Err(e) = self.command(worker.as_ref(), false).await {
            log::warn!("worker {} stop during restart failed: {}", id, e);
        }
        tokio::time::sleep(self.backoff(count)).await;

        match self.command(worker.as_ref(), true).await {
            Ok(()) => {
                self.registry
                    .set_status(id, ProducerStatus::Running, None)
                    .await;
                self.registry.touch(id).await;
                let _ = self.events.send(WorkerEvent::Started(id.to_string()));
            }
            Err(e) => {
                log::error!("worker {} restart failed: {}", id, e);
                self.registry
                    .set_status(id, ProducerStatus::Stopped, Some(e.message))
                    .await;
                let _ = self.events.send(WorkerEvent::Stopped(id.to_string()));
            }
        }
    }

    /// Start or stop with the command timeout; a hung stop escalates to
    /// forced termination.
    async fn command(&self, worker: &dyn Worker, start: bool) -> DiscResult<()> {
        let timeout = Duration::from_millis(self.settings.command_timeout_ms.max(1));
        let action = async {
            if start {
                worker.start().await
            } else {
                worker.stop().await
            }
        };
        match tokio::time::timeout(timeout, action).await {
            Ok(result) => result,
            Err(_) if start => Err(DiscError::transport_transient(format!(
                "worker {} start timed out",
                worker.id()
            ))),
            Err(_) => {
                log::warn!("worker {} stop timed out, terminating", worker.id());
                worker.terminate();
                Ok(())
            }
        }
    }

    async fn budget_exceeded(&self, id: &str) -> bool {
        let now = Instant::now();
        let window = Duration::from_millis(self.settings.restart_window_ms);
        let mut restart_log = self.restart_log.lock().await;
        let attempts = restart_log.entry(id.to_string()).or_default();
        while let Some(first) = attempts.front() {
            if now.duration_since(*first) > window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= self.settings.restart_burst as usize {
            return true;
        }
        attempts.push_back(now);
        false
    }

    fn backoff(&self, restart_count: u32) -> Duration {
        let shift = restart_count.saturating_sub(1).min(16);
        let millis = self
            .settings
            .backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.settings.backoff_cap_ms);
        Duration::from_millis(millis)
    }
}
