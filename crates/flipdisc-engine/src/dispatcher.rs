//! Fixed-cadence pacing dispatcher.
//!
//! One owned task drives the display: every tick it pops at most one frame
//! from the buffer (falling back to the hold frame), maps it, suppresses
//! clean panels through the dirty cache, and writes the rest to the bus.
//! The dispatcher is the only task that touches the transport.
//!
//! State machine:
//!
//! ```text
//!   Idle ──start──▶ Running ──stop──▶ Idle
//!    │                 │
//!    │                 └── transport-permanent ──▶ Degraded
//!    └──────────── transport-reset ◀──────────────┘
//! ```
//!
//! `Running` is the only state that writes. `Degraded` keeps draining the
//! buffer so producers don't stall, but silently discards the frames.

use crate::buffer::FrameBuffer;
use crate::dirty::{payload_hash, PanelCache};
use crate::mapper;
use flipdisc_core::{ConfigHandle, DiscError, DiscResult, RuntimeConfig};
use flipdisc_proto::{bus, Bitmap};
use flipdisc_serial::BusTransport;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Smoothing window of the effective-fps moving average, in ticks.
const EMA_WINDOW: f64 = 16.0;

/// Floor for rescheduling after an overrun tick. No drift make-up: an
/// overrun tick never borrows time from the next one.
const MIN_CATCHUP_US: u64 = 1_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Commands and state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub enum PacerCommand {
    /// Begin ticking.
    Start,
    /// Stop ticking and return to `Idle`.
    Stop,
    /// Close and reopen the transport; recovers from `Degraded` and
    /// forces a full repaint.
    ResetTransport,
    /// Forget all panel fingerprints (topology publication).
    ForceAll,
    /// End the dispatcher task.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Idle,
    Running,
    Degraded,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Shared counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counters shared between the dispatcher task and its observers.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub ticks: AtomicU64,
    pub panels_written: AtomicU64,
    pub encode_errors: AtomicU64,
    pub write_errors: AtomicU64,
    /// 1 while the dispatcher holds a popped entry for the current tick.
    in_flight: AtomicUsize,
    effective_fps_milli: AtomicU64,
    last_tick_us: AtomicU64,
    degraded: AtomicBool,
}

impl EngineStats {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Exponential moving average of the realised cadence.
    pub fn effective_fps(&self) -> f64 {
        self.effective_fps_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn last_tick_ms(&self) -> f64 {
        self.last_tick_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    fn observe_interval(&self, interval: Duration) {
        let micros = interval.as_micros() as u64;
        if micros == 0 {
            return;
        }
        let instant_fps = 1_000_000.0 / micros as f64;
        let previous = self.effective_fps_milli.load(Ordering::Relaxed) as f64 / 1000.0;
        let next = if previous == 0.0 {
            instant_fps
        } else {
            previous + (instant_fps - previous) / EMA_WINDOW
        };
        self.effective_fps_milli
            .store((next * 1000.0) as u64, Ordering::Relaxed);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to a running dispatcher task. Held by the control plane.
#[derive(Clone)]
pub struct PacerHandle {
    cmd_tx: mpsc::Sender<PacerCommand>,
    stats: Arc<EngineStats>,
    state_rx: watch::Receiver<PacerState>,
}

impl PacerHandle {
    pub async fn send(&self, cmd: PacerCommand) -> DiscResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| DiscError::transport_transient("dispatcher command channel closed"))
    }

    pub async fn start(&self) -> DiscResult<()> {
        self.send(PacerCommand::Start).await
    }

    pub async fn stop(&self) -> DiscResult<()> {
        self.send(PacerCommand::Stop).await
    }

    pub async fn reset_transport(&self) -> DiscResult<()> {
        self.send(PacerCommand::ResetTransport).await
    }

    pub async fn force_all(&self) -> DiscResult<()> {
        self.send(PacerCommand::ForceAll).await
    }

    pub async fn shutdown(&self) -> DiscResult<()> {
        self.send(PacerCommand::Shutdown).await
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> PacerState {
        *self.state_rx.borrow()
    }

    /// Watch channel that fires on every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<PacerState> {
        self.state_rx.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Dispatcher task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Pacer {
    config: ConfigHandle,
    buffer: Arc<FrameBuffer>,
    transport: Arc<dyn BusTransport>,
    stats: Arc<EngineStats>,
    state_tx: watch::Sender<PacerState>,
    state: PacerState,
    cache: PanelCache,
    /// Most recently displayed frame, reused when the buffer is empty.
    hold: Option<Bitmap>,
    prev_tick_start: Option<Instant>,
}

impl Pacer {
    /// Spawn the dispatcher task. It starts `Idle`; send
    /// [`PacerCommand::Start`] to begin ticking.
    pub fn spawn(
        config: ConfigHandle,
        buffer: Arc<FrameBuffer>,
        transport: Arc<dyn BusTransport>,
    ) -> PacerHandle {
        let stats = Arc::new(EngineStats::default());
        let (state_tx, state_rx) = watch::channel(PacerState::Idle);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let pacer = Self {
            config,
            buffer,
            transport,
            stats: stats.clone(),
            state_tx,
            state: PacerState::Idle,
            cache: PanelCache::new(),
            hold: None,
            prev_tick_start: None,
        };
        tokio::spawn(pacer.run(cmd_rx));

        PacerHandle {
            cmd_tx,
            stats,
            state_rx,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<PacerCommand>) {
        let mut next_tick: Option<Instant> = None;
        loop {
            let deadline = next_tick;
            let tick_wait = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(PacerCommand::Start) => {
                        if self.state == PacerState::Idle {
                            self.set_state(PacerState::Running);
                            next_tick = Some(Instant::now());
                        } else {
                            log::warn!("start ignored in {:?} state", self.state);
                        }
                    }
                    Some(PacerCommand::Stop) => {
                        self.set_state(PacerState::Idle);
                        next_tick = None;
                    }
                    Some(PacerCommand::ResetTransport) => {
                        self.reset_transport().await;
                    }
                    Some(PacerCommand::ForceAll) => {
                        self.cache.force_all();
                    }
                    Some(PacerCommand::Shutdown) | None => break,
                },
                _ = tick_wait => {
                    let cfg = self.config.snapshot().await;
                    let started = Instant::now();
                    self.run_tick(&cfg).await;

                    // Overruns are not made up: never schedule in the past.
                    let target = started + cfg.tick() + Duration::from_millis(cfg.frame_gap_ms as u64);
                    let now = Instant::now();
                    next_tick = Some(if target > now {
                        target
                    } else {
                        now + Duration::from_micros(cfg.inter_panel_us.max(MIN_CATCHUP_US))
                    });
                }
            }
        }
        log::info!("dispatcher task ended");
    }

    fn set_state(&mut self, state: PacerState) {
        if self.state == state {
            return;
        }
        log::info!("dispatcher {:?} -> {:?}", self.state, state);
        self.state = state;
        self.stats
            .degraded
            .store(state == PacerState::Degraded, Ordering::Relaxed);
        let _ = self.state_tx.send(state);
    }

    async fn reset_transport(&mut self) {
        let _ = self.transport.close().await;
        match self.transport.open().await {
            Ok(()) => {
                // Full repaint: every panel fingerprint is stale now.
                self.cache.force_all();
                if self.state == PacerState::Degraded {
                    self.set_state(PacerState::Running);
                }
                log::info!("transport {} reset", self.transport.name());
            }
            Err(e) => log::error!("transport {} reset failed: {}", self.transport.name(), e),
        }
    }

    async fn run_tick(&mut self, cfg: &Arc<RuntimeConfig>) {
        let started = Instant::now();
        let entry = self.buffer.pop().await;
        if entry.is_some() {
            self.stats.in_flight.store(1, Ordering::Relaxed);
        }

        if self.state == PacerState::Degraded {
            // Keep draining so producer credits recover, but write nothing.
            drop(entry);
        } else {
            let bitmap = match &entry {
                Some(e) => {
                    let decoded = e.frame.to_bitmap();
                    self.hold = Some(decoded.clone());
                    decoded
                }
                None => self
                    .hold
                    .get_or_insert_with(|| Bitmap::zero(cfg.canvas.width, cfg.canvas.height))
                    .clone(),
            };
            self.write_frame(cfg, &bitmap).await;
        }

        self.stats.in_flight.store(0, Ordering::Relaxed);
        self.stats
            .last_tick_us
            .store(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        if let Some(prev) = self.prev_tick_start {
            self.stats.observe_interval(started - prev);
        }
        self.prev_tick_start = Some(started);
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
    }

    async fn write_frame(&mut self, cfg: &Arc<RuntimeConfig>, bitmap: &Bitmap) {
        let payloads = match mapper::map(bitmap, &cfg.topology) {
            Ok(payloads) => payloads,
            Err(e) => {
                log::error!("mapping failed, tick aborted: {}", e);
                self.stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let refresh = cfg.topology.refresh();
        let dirty: Vec<_> = payloads
            .iter()
            .filter_map(|payload| {
                let hash = payload_hash(&payload.columns);
                self.cache
                    .needs_write(&payload.panel.id, hash)
                    .then_some((payload, hash))
            })
            .collect();

        let mut written_ids: Vec<&str> = Vec::new();
        for (i, (payload, hash)) in dirty.iter().enumerate() {
            let message = match bus::encode_panel_message(payload.panel, refresh, &payload.columns)
            {
                Ok(message) => message,
                Err(e) => {
                    log::error!("panel encode failed, tick aborted: {}", e);
                    self.stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            if let Err(e) = self.write_bounded(cfg, &message).await {
                // The panel state on the wire is unknown; the next
                // successful tick must repaint it. Panels already written
                // this tick keep their fingerprints.
                self.cache.invalidate(&payload.panel.id);
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                self.fail_tick(&payload.panel.id, e);
                return;
            }
            self.cache.mark_written(&payload.panel.id, *hash);
            self.stats.panels_written.fetch_add(1, Ordering::Relaxed);
            written_ids.push(&payload.panel.id);

            if cfg.inter_panel_us > 0 && i + 1 < dirty.len() {
                self.transport.sleep(cfg.inter_panel_us).await;
            }
        }

        if !written_ids.is_empty() && cfg.topology.is_buffered() {
            if let Err(e) = self.write_bounded(cfg, &bus::flush_message()).await {
                // The panel buffers hold the new image but it never
                // latched; rewrite those panels (and flush) next tick.
                for id in written_ids {
                    self.cache.invalidate(id);
                }
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                self.fail_tick("flush", e);
            }
        }
    }

    async fn write_bounded(&self, cfg: &Arc<RuntimeConfig>, bytes: &[u8]) -> DiscResult<()> {
        let timeout = Duration::from_millis(cfg.write_timeout_ms);
        match tokio::time::timeout(timeout, self.transport.write_all(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(DiscError::transport_transient(format!(
                "write exceeded {} ms",
                cfg.write_timeout_ms
            ))),
        }
    }

    fn fail_tick(&mut self, what: &str, err: DiscError) {
        if self.transport.is_permanent_error(&err) {
            log::error!("{} write failed permanently, degrading: {}", what, err);
            self.set_state(PacerState::Degraded);
        } else {
            log::warn!("{} write failed, retrying next tick: {}", what, err);
        }
    }
}
