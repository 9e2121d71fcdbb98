//! Service wiring.
//!
//! `Server` assembles the whole pipeline from a display file and a
//! transport: buffer, dispatcher, forwarder, registry, supervisor, and
//! control plane. The daemon binary and the end-to-end tests both build
//! through here.

use crate::control::ControlPlane;
use flipdisc_core::{ConfigHandle, DiscResult, DisplayConfig, RuntimeConfig};
use flipdisc_engine::{FrameBuffer, Pacer, PacerHandle};
use flipdisc_ingest::{BlinkWorker, Forwarder, ProducerRegistry, Supervisor};
use flipdisc_serial::BusTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Server {
    pub config: ConfigHandle,
    pub buffer: Arc<FrameBuffer>,
    pub pacer: PacerHandle,
    pub forwarder: Arc<Forwarder>,
    pub registry: Arc<ProducerRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub control: Arc<ControlPlane>,
    transport: Arc<dyn BusTransport>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Wire every service from a validated display file.
    pub async fn build(
        display: &DisplayConfig,
        transport: Arc<dyn BusTransport>,
    ) -> DiscResult<Self> {
        let runtime = RuntimeConfig::from_display(display)?;
        let capacity = runtime.buffer_capacity();
        let config = ConfigHandle::new(runtime);

        let buffer = Arc::new(FrameBuffer::new(capacity));
        let pacer = Pacer::spawn(config.clone(), buffer.clone(), transport.clone());
        let registry = Arc::new(ProducerRegistry::new());
        let forwarder = Arc::new(
            Forwarder::new(
                config.clone(),
                buffer.clone(),
                registry.clone(),
                pacer.stats(),
            )
            .await,
        );
        let supervisor = Supervisor::new(display.supervisor, registry.clone());
        let control = ControlPlane::new(
            config.clone(),
            buffer.clone(),
            pacer.clone(),
            forwarder.clone(),
            registry.clone(),
            supervisor.clone(),
        );

        Ok(Self {
            config,
            buffer,
            pacer,
            forwarder,
            registry,
            supervisor,
            control,
            transport,
            tasks: Vec::new(),
        })
    }

    /// Open the transport and start ticking, the liveness sweep, and the
    /// stats stream.
    pub async fn start(&mut self) -> DiscResult<()> {
        if let Err(e) = self.transport.open().await {
            // The control plane stays up either way; the dispatcher will
            // degrade on the first failed write and recover on reset.
            log::warn!("transport {} open failed: {}", self.transport.name(), e);
        }
        self.pacer.start().await?;
        self.tasks.push(self.supervisor.clone().spawn());
        self.tasks.push(self.control.clone().spawn_stats_stream());
        log::info!("flipdisc server running on {}", self.transport.name());
        Ok(())
    }

    /// Add a built-in demo producer and make it the active source if no
    /// source is set.
    pub async fn add_demo_worker(&self, id: &str, period: Duration) -> DiscResult<()> {
        let worker = BlinkWorker::new(id, self.config.clone(), self.forwarder.clone(), period);
        self.supervisor.manage(worker).await?;
        if self.forwarder.active_source().await.is_none() {
            self.control.set_active_source(Some(id.to_string())).await;
        }
        Ok(())
    }

    /// Graceful teardown: stop producers, end the dispatcher, drop the
    /// background tasks, close the transport.
    pub async fn shutdown(&mut self) {
        self.supervisor.stop_all().await;
        let _ = self.pacer.shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let _ = self.transport.close().await;
        log::info!("flipdisc server stopped");
    }
}
