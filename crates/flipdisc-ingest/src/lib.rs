//! Producer-facing coordination.
//!
//! Frames enter the system here: the forwarder validates, dedupes and
//! rate-limits them before they reach the pacing engine's buffer, the
//! credit protocol tells producers how hard they may push, and the
//! supervisor keeps local producer tasks alive.

pub mod forwarder;
pub mod rate;
pub mod registry;
pub mod supervisor;
pub mod workers;

pub use forwarder::{Forwarder, IngestOutcome, IngestStats};
pub use rate::TokenBucket;
pub use registry::{ProducerInfo, ProducerRegistry, ProducerStatus};
pub use supervisor::{Supervisor, Worker, WorkerEvent};
pub use workers::BlinkWorker;
