//! Bus transport abstraction.

use flipdisc_core::{DiscError, DiscResult};

/// Opaque byte sink on the panel side of the system.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc` and owned by the dispatcher task.
#[async_trait::async_trait]
pub trait BusTransport: Send + Sync {
    /// Open the sink. Idempotent; reopening an open sink is an error.
    async fn open(&self) -> DiscResult<()>;

    /// Close the sink.
    async fn close(&self) -> DiscResult<()>;

    /// Write all bytes of one message.
    async fn write_all(&self, bytes: &[u8]) -> DiscResult<()>;

    /// Quiet time between messages, e.g. for RS-485 turnaround.
    async fn sleep(&self, micros: u64) {
        if micros > 0 {
            tokio::time::sleep(tokio::time::Duration::from_micros(micros)).await;
        }
    }

    /// Whether the error means the sink is gone for good. The dispatcher
    /// degrades on permanent errors and retries transient ones.
    fn is_permanent_error(&self, err: &DiscError) -> bool {
        err.is_permanent()
    }

    fn is_open(&self) -> bool;

    /// Human-readable sink name for logs.
    fn name(&self) -> &str;
}
