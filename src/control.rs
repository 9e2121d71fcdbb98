//! Control plane.
//!
//! Cadence set/clear, active-source switching, buffered-mode and topology
//! publication, and the statistics stream. Mutations swap a fresh runtime
//! snapshot; readers observe either the old or the new configuration,
//! never a mix.

use flipdisc_core::{
    buffer_capacity_for, ConfigHandle, DiscResult, Panel, RefreshMode, RuntimeConfig,
    StatsSnapshot, Topology,
};
use flipdisc_engine::{FrameBuffer, PacerHandle};
use flipdisc_ingest::{Forwarder, ProducerInfo, ProducerRegistry, Supervisor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Optional behaviors the server declares to adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// The RBM `invert` header flag is honored (XOR after decode).
    pub invert_flag: bool,
}

pub struct ControlPlane {
    config: ConfigHandle,
    buffer: Arc<FrameBuffer>,
    pacer: PacerHandle,
    forwarder: Arc<Forwarder>,
    registry: Arc<ProducerRegistry>,
    supervisor: Arc<Supervisor>,
    stats_tx: broadcast::Sender<StatsSnapshot>,
    /// Edge-triggered snapshot requests (fps change, source change, …).
    changed: Notify,
}

impl ControlPlane {
    pub fn new(
        config: ConfigHandle,
        buffer: Arc<FrameBuffer>,
        pacer: PacerHandle,
        forwarder: Arc<Forwarder>,
        registry: Arc<ProducerRegistry>,
        supervisor: Arc<Supervisor>,
    ) -> Arc<Self> {
        let (stats_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            config,
            buffer,
            pacer,
            forwarder,
            registry,
            supervisor,
            stats_tx,
            changed: Notify::new(),
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities { invert_flag: true }
    }

    // ── Reads ─────────────────────────────────────────────────────

    pub async fn runtime(&self) -> Arc<RuntimeConfig> {
        self.config.snapshot().await
    }

    pub async fn fps(&self) -> u8 {
        self.config.snapshot().await.fps
    }

    pub async fn producers(&self) -> Vec<ProducerInfo> {
        self.registry.snapshot().await
    }

    pub async fn active_source(&self) -> Option<String> {
        self.forwarder.active_source().await
    }

    // ── Cadence ───────────────────────────────────────────────────

    /// Set the target cadence, clamped to `[1, fps_max]`. Setting the
    /// current value is a no-op: no buffer resize, no cache invalidation.
    /// Returns the effective fps.
    pub async fn set_fps(&self, fps: u8) -> DiscResult<u8> {
        let current = self.config.snapshot().await;
        let fps = fps.clamp(1, current.fps_max);
        if fps == current.fps {
            return Ok(fps);
        }

        let mut next = (*current).clone();
        next.fps = fps;
        self.config.swap(next).await;

        self.buffer
            .resize(buffer_capacity_for(current.buffer_ms, fps))
            .await;
        self.forwarder.reconfigure_rate(fps).await;
        log::info!("target cadence set to {} fps", fps);
        self.changed.notify_one();
        Ok(fps)
    }

    // ── Active source ─────────────────────────────────────────────

    pub async fn set_active_source(&self, source: Option<String>) {
        self.forwarder.set_active_source(source).await;
        self.changed.notify_one();
    }

    // ── Topology ──────────────────────────────────────────────────

    /// Switch between buffered and instant refresh. Bus command selectors
    /// change with the mode, so every panel is repainted.
    pub async fn set_refresh(&self, refresh: RefreshMode) -> DiscResult<()> {
        let current = self.config.snapshot().await;
        if current.topology.refresh() == refresh {
            return Ok(());
        }
        let topology = Topology::new(
            current.topology.panels().to_vec(),
            refresh,
            current.canvas,
        )?;
        let mut next = (*current).clone();
        next.topology = Arc::new(topology);
        self.config.swap(next).await;
        self.pacer.force_all().await?;
        self.changed.notify_one();
        Ok(())
    }

    /// Publish a new panel layout. All per-panel caches are invalidated
    /// and the next tick performs full writes.
    pub async fn publish_topology(
        &self,
        panels: Vec<Panel>,
        refresh: RefreshMode,
    ) -> DiscResult<()> {
        let current = self.config.snapshot().await;
        let topology = Topology::new(panels, refresh, current.canvas)?;
        let mut next = (*current).clone();
        next.topology = Arc::new(topology);
        self.config.swap(next).await;
        self.pacer.force_all().await?;
        log::info!("topology published, full repaint forced");
        self.changed.notify_one();
        Ok(())
    }

    // ── Transport ─────────────────────────────────────────────────

    pub async fn reset_transport(&self) -> DiscResult<()> {
        self.pacer.reset_transport().await
    }

    /// Downstream back-off signal, relayed to the credit protocol.
    pub async fn apply_cooldown(&self, window_ms: u64) {
        self.forwarder.apply_cooldown(window_ms).await;
    }

    // ── Statistics ────────────────────────────────────────────────

    pub async fn snapshot(&self) -> StatsSnapshot {
        let engine = self.pacer.stats();
        let ingest = self.forwarder.stats();
        let cfg = self.config.snapshot().await;
        StatsSnapshot {
            received: ingest.received(),
            forwarded: self.buffer.popped(),
            dropped_overflow: self.buffer.dropped_overflow(),
            duplicates_suppressed: ingest.duplicates_suppressed(),
            no_token_suppressed: ingest.no_token_suppressed(),
            effective_fps: engine.effective_fps(),
            buffer_level: self.buffer.occupancy(),
            buffer_high_water: self.buffer.take_high_water().await,
            last_tick_ms: engine.last_tick_ms(),
            panels_written: engine.panels_written.load(std::sync::atomic::Ordering::Relaxed),
            degraded: engine.degraded(),
            active_source: self.forwarder.active_source().await,
            fps: cfg.fps,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Subscribe to the stats stream: one snapshot per second plus one on
    /// every fps / active-source / worker / degraded-state change.
    pub fn subscribe(&self) -> broadcast::Receiver<StatsSnapshot> {
        self.stats_tx.subscribe()
    }

    /// Spawn the stats streaming task.
    pub fn spawn_stats_stream(self: Arc<Self>) -> JoinHandle<()> {
        let control = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut pacer_state = control.pacer.subscribe_state();
            let mut worker_events = control.supervisor.subscribe();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = control.changed.notified() => {}
                    changed = pacer_state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    event = worker_events.recv() => {
                        match event {
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                let snapshot = control.snapshot().await;
                let _ = control.stats_tx.send(snapshot);
            }
        })
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane").finish_non_exhaustive()
    }
}
