//! Built-in local producers.
//!
//! The daemon's demo mode and the supervisor tests need an in-process
//! producer behind the `Worker` trait. `BlinkWorker` alternates between
//! the two phases of a checkerboard at a fixed period — deterministic,
//! and every frame differs from the previous one so nothing is deduped.

use crate::forwarder::Forwarder;
use crate::supervisor::Worker;
use flipdisc_core::{ConfigHandle, DiscResult};
use flipdisc_proto::{Bitmap, RbmFrame};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct BlinkWorker {
    id: String,
    config: ConfigHandle,
    forwarder: Arc<Forwarder>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BlinkWorker {
    pub fn new(
        id: impl Into<String>,
        config: ConfigHandle,
        forwarder: Arc<Forwarder>,
        period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            config,
            forwarder,
            period,
            task: Mutex::new(None),
        })
    }

    fn frame(width: u16, height: u16, seq: u32) -> RbmFrame {
        let phase = (seq % 2) as u16;
        let mut bitmap = Bitmap::zero(width, height);
        for y in 0..height {
            for x in 0..width {
                if (x + y + phase) % 2 == 0 {
                    bitmap.set(x, y, true);
                }
            }
        }
        RbmFrame::new(width, height, seq, 0, 0, bitmap.rows().to_vec())
            .expect("checkerboard payload length is exact")
    }
}

#[async_trait::async_trait]
impl Worker for BlinkWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> DiscResult<()> {
        let mut slot = self.task.lock().expect("worker task mutex poisoned");
        if slot.is_some() {
            return Ok(());
        }

        let id = self.id.clone();
        let config = self.config.clone();
        let forwarder = self.forwarder.clone();
        let period = self.period;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut seq: u32 = 0;
            loop {
                ticker.tick().await;
                let canvas = config.snapshot().await.canvas;
                let bytes = BlinkWorker::frame(canvas.width, canvas.height, seq).encode();
                if let Err(e) = forwarder.submit(&id, bytes).await {
                    log::warn!("worker {} frame rejected: {}", id, e);
                }
                seq = seq.wrapping_add(1);
            }
        }));
        Ok(())
    }

    async fn stop(&self) -> DiscResult<()> {
        self.terminate();
        Ok(())
    }

    fn terminate(&self) {
        if let Some(task) = self
            .task
            .lock()
            .expect("worker task mutex poisoned")
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProducerRegistry;
    use flipdisc_core::{
        Canvas, DisplayConfig, Orientation, Panel, Point, RefreshMode, RuntimeConfig,
        SerialSettings, SupervisorSettings,
    };
    use flipdisc_engine::{EngineStats, FrameBuffer};

    fn display_config() -> DisplayConfig {
        DisplayConfig {
            canvas: Canvas::new(28, 7),
            fps: 10,
            fps_max: 30,
            buffer_ms: 1_000,
            frame_gap_ms: 0,
            write_timeout_ms: 250,
            refresh: RefreshMode::Instant,
            panels: vec![Panel {
                id: "only".to_string(),
                address: 1,
                origin: Point { x: 0, y: 0 },
                width: 28,
                height: 7,
                orientation: Orientation::Normal,
            }],
            serial: SerialSettings::default(),
            supervisor: SupervisorSettings::default(),
        }
    }

    #[test]
    fn test_frames_alternate_and_differ() {
        let a = BlinkWorker::frame(28, 7, 0);
        let b = BlinkWorker::frame(28, 7, 1);
        let c = BlinkWorker::frame(28, 7, 2);
        assert_ne!(a.payload(), b.payload());
        assert_eq!(a.payload(), c.payload());
        assert!(a.to_bitmap().get(0, 0));
        assert!(!b.to_bitmap().get(0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_produces_into_buffer() {
        let runtime = RuntimeConfig::from_display(&display_config()).unwrap();
        let config = ConfigHandle::new(runtime.clone());
        let buffer = Arc::new(FrameBuffer::new(runtime.buffer_capacity()));
        let forwarder = Arc::new(
            Forwarder::new(
                config.clone(),
                buffer.clone(),
                Arc::new(ProducerRegistry::new()),
                Arc::new(EngineStats::default()),
            )
            .await,
        );
        forwarder.set_active_source(Some("blink".to_string())).await;

        let worker = BlinkWorker::new(
            "blink",
            config,
            forwarder.clone(),
            Duration::from_millis(100),
        );
        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        worker.stop().await.unwrap();

        assert!(buffer.received() >= 4);
        let level = buffer.occupancy();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(buffer.occupancy(), level, "stopped worker stays quiet");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let runtime = RuntimeConfig::from_display(&display_config()).unwrap();
        let config = ConfigHandle::new(runtime.clone());
        let buffer = Arc::new(FrameBuffer::new(runtime.buffer_capacity()));
        let forwarder = Arc::new(
            Forwarder::new(
                config.clone(),
                buffer,
                Arc::new(ProducerRegistry::new()),
                Arc::new(EngineStats::default()),
            )
            .await,
        );
        let worker = BlinkWorker::new("blink", config, forwarder, Duration::from_secs(1));
        worker.start().await.unwrap();
        worker.start().await.unwrap();
        worker.stop().await.unwrap();
    }
}
