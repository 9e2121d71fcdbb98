//! Ingest + forwarding pipeline.
//!
//! Per frame: parse the header, validate geometry against the published
//! canvas, record the producer heartbeat, and — for the active source
//! only — dedupe by payload fingerprint, consult the token bucket, rewrite
//! the frame duration to the dispatcher cadence, and enqueue. Frames from
//! other producers are observed but never buffered.
//!
//! The forwarder is strictly sequential per producer; its adapter calls
//! `submit` one frame at a time for a given producer id.

use crate::rate::TokenBucket;
use crate::registry::ProducerRegistry;
use flipdisc_core::{ConfigHandle, DiscError, DiscResult};
use flipdisc_engine::{payload_hash, BufferEntry, EngineStats, FrameBuffer};
use flipdisc_proto::{rewrite_duration_ms, RbmFrame};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// What happened to a submitted frame. Every variant carries the current
/// credit count so producers can pace themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum IngestOutcome {
    /// Enqueued for the dispatcher.
    Forwarded { credits: u32 },
    /// Identical payload to the previous forwarded frame; dropped.
    Duplicate { credits: u32 },
    /// Rate-limited; dropped. `retry_after_ms` is set while a cooldown
    /// window is open.
    NoToken {
        credits: u32,
        retry_after_ms: Option<u64>,
    },
    /// Accepted for observability only (producer is not the active source).
    Observed { credits: u32 },
}

impl IngestOutcome {
    pub fn credits(&self) -> u32 {
        match self {
            Self::Forwarded { credits }
            | Self::Duplicate { credits }
            | Self::NoToken { credits, .. }
            | Self::Observed { credits } => *credits,
        }
    }

    pub fn forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

/// Monotonic ingest counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    duplicates_suppressed: AtomicU64,
    no_token_suppressed: AtomicU64,
    rejected: AtomicU64,
}

impl IngestStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn duplicates_suppressed(&self) -> u64 {
        self.duplicates_suppressed.load(Ordering::Relaxed)
    }

    pub fn no_token_suppressed(&self) -> u64 {
        self.no_token_suppressed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

pub struct Forwarder {
    config: ConfigHandle,
    buffer: Arc<FrameBuffer>,
    registry: Arc<ProducerRegistry>,
    engine: Arc<EngineStats>,
    active_source: RwLock<Option<String>>,
    last_hash: Mutex<HashMap<String, u32>>,
    bucket: Mutex<TokenBucket>,
    stats: IngestStats,
}

impl Forwarder {
    pub async fn new(
        config: ConfigHandle,
        buffer: Arc<FrameBuffer>,
        registry: Arc<ProducerRegistry>,
        engine: Arc<EngineStats>,
    ) -> Self {
        let fps = config.snapshot().await.fps;
        Self {
            config,
            buffer,
            registry,
            engine,
            active_source: RwLock::new(None),
            last_hash: Mutex::new(HashMap::new()),
            bucket: Mutex::new(TokenBucket::for_fps(fps, Instant::now())),
            stats: IngestStats::default(),
        }
    }

    /// Run one frame through the ingest pipeline.
    pub async fn submit(&self, producer_id: &str, mut raw: Vec<u8>) -> DiscResult<IngestOutcome> {
        let frame = match RbmFrame::parse(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e.with_producer(producer_id));
            }
        };

        let cfg = self.config.snapshot().await;
        if frame.width != cfg.canvas.width || frame.height != cfg.canvas.height {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DiscError::geometry_mismatch(format!(
                "frame is {}x{}, canvas is {}x{}",
                frame.width, frame.height, cfg.canvas.width, cfg.canvas.height
            ))
            .with_producer(producer_id));
        }

        self.registry.heartbeat(producer_id).await;

        let active = self.active_source.read().await.clone();
        if active.as_deref() != Some(producer_id) {
            return Ok(IngestOutcome::Observed {
                credits: self.credits().await,
            });
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        // Payload dedupe: fingerprint the payload, not the header, so a
        // new sequence number alone never forces a repaint.
        let hash = payload_hash(frame.payload());
        if self.last_hash.lock().await.get(producer_id) == Some(&hash) {
            self.stats
                .duplicates_suppressed
                .fetch_add(1, Ordering::Relaxed);
            return Ok(IngestOutcome::Duplicate {
                credits: self.credits().await,
            });
        }

        let now = Instant::now();
        {
            let mut bucket = self.bucket.lock().await;
            if !bucket.try_take(now) {
                self.stats
                    .no_token_suppressed
                    .fetch_add(1, Ordering::Relaxed);
                let retry_after_ms = bucket
                    .penalty_remaining(now)
                    .map(|d| d.as_millis() as u64);
                drop(bucket);
                return Ok(IngestOutcome::NoToken {
                    credits: self.credits().await,
                    retry_after_ms,
                });
            }
        }

        // The server cadence is authoritative; producer-declared durations
        // are rewritten in place before the frame travels further.
        let tick_ms = cfg.tick_ms();
        rewrite_duration_ms(&mut raw, tick_ms)?;
        let mut frame = frame;
        frame.set_duration_ms(tick_ms);

        self.last_hash
            .lock()
            .await
            .insert(producer_id.to_string(), hash);

        if let Some(dropped) = self
            .buffer
            .push(BufferEntry {
                frame,
                received_at: now,
                producer_id: producer_id.to_string(),
            })
            .await
        {
            log::debug!(
                "buffer overflow: dropped seq={} from {}",
                dropped.frame.seq,
                dropped.producer_id
            );
        }

        Ok(IngestOutcome::Forwarded {
            credits: self.credits().await,
        })
    }

    /// Credits are derived, never stored: the buffer headroom minus the
    /// dispatcher's currently held frame.
    pub async fn credits(&self) -> u32 {
        let capacity = self.buffer.capacity().await as i64;
        let occupancy = self.buffer.occupancy() as i64;
        let in_flight = self.engine.in_flight() as i64;
        (capacity - occupancy - in_flight).max(0) as u32
    }

    /// Downstream back-off: advertise `retry_after_ms` and slow the bucket
    /// refill for the window.
    pub async fn apply_cooldown(&self, window_ms: u64) {
        let now = Instant::now();
        self.bucket
            .lock()
            .await
            .set_penalty(now, std::time::Duration::from_millis(window_ms));
        log::info!("cooldown window of {} ms applied", window_ms);
    }

    /// Remaining cooldown window, if one is open.
    pub async fn retry_after_ms(&self) -> Option<u64> {
        self.bucket
            .lock()
            .await
            .penalty_remaining(Instant::now())
            .map(|d| d.as_millis() as u64)
    }

    pub async fn set_active_source(&self, source: Option<String>) {
        let mut active = self.active_source.write().await;
        if *active != source {
            log::info!("active source: {:?} -> {:?}", *active, source);
            *active = source;
        }
    }

    pub async fn active_source(&self) -> Option<String> {
        self.active_source.read().await.clone()
    }

    /// Re-size the token bucket after an fps change.
    pub async fn reconfigure_rate(&self, fps: u8) {
        self.bucket.lock().await.reconfigure(fps, Instant::now());
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }
}
