//! In-memory transport for tests and offline use.

use crate::transport::BusTransport;
use flipdisc_core::{DiscError, DiscErrorKind, DiscResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A fully in-memory bus sink. Captures every message for assertions and
/// can simulate per-message latency and scripted write failures.
pub struct MockTransport {
    name: String,
    open: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    bytes_written: AtomicU64,
    /// Simulated time to transmit one message, in microseconds.
    latency_us: AtomicU64,
    fail_script: Mutex<VecDeque<DiscErrorKind>>,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            open: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            bytes_written: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
            fail_script: Mutex::new(VecDeque::new()),
        })
    }

    /// Simulate transmission latency on every write.
    pub fn set_latency_us(&self, micros: u64) {
        self.latency_us.store(micros, Ordering::SeqCst);
    }

    /// Queue a transient failure for an upcoming write.
    pub async fn fail_next_transient(&self) {
        self.fail_script
            .lock()
            .await
            .push_back(DiscErrorKind::TransportTransient);
    }

    /// Queue a permanent failure for an upcoming write.
    pub async fn fail_next_permanent(&self) {
        self.fail_script
            .lock()
            .await
            .push_back(DiscErrorKind::TransportPermanent);
    }

    /// Messages written so far, oldest first.
    pub async fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().await.clone()
    }

    /// Drain captured messages (for incremental test assertions).
    pub async fn take_writes(&self) -> Vec<Vec<u8>> {
        let mut writes = self.writes.lock().await;
        std::mem::take(&mut *writes)
    }

    pub async fn write_count(&self) -> usize {
        self.writes.lock().await.len()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl BusTransport for MockTransport {
    async fn open(&self) -> DiscResult<()> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(DiscError::transport_transient(format!(
                "{} already open",
                self.name
            )));
        }
        log::debug!("mock bus {} opened", self.name);
        Ok(())
    }

    async fn close(&self) -> DiscResult<()> {
        self.open.store(false, Ordering::SeqCst);
        log::debug!("mock bus {} closed", self.name);
        Ok(())
    }

    async fn write_all(&self, bytes: &[u8]) -> DiscResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DiscError::transport_transient(format!(
                "{} not open",
                self.name
            )));
        }
        if let Some(kind) = self.fail_script.lock().await.pop_front() {
            return Err(DiscError::new(kind, "scripted write failure"));
        }
        let latency = self.latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(tokio::time::Duration::from_micros(latency)).await;
        }
        self.bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.writes.lock().await.push(bytes.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
