//! # flipdisc-server
//!
//! Single-process server for flip-dot displays: producers submit 1-bit RBM
//! frames, the pacing engine writes RS-485 panel messages at a stable
//! cadence, and a credit/cooldown protocol keeps bursty producers honest.
//!
//! ## Architecture
//!
//! The system is structured around per-concern services wired together by
//! [`server::Server`]:
//!
//! - **flipdisc-core** — shared types, errors, configuration snapshots
//! - **flipdisc-proto** — RBM envelope and RS-485 message codecs
//! - **flipdisc-serial** — the bus transport (mock or RS-485 serial)
//! - **flipdisc-engine** — keep-latest buffer, mapper, dirty cache, and
//!   the fixed-cadence dispatcher
//! - **flipdisc-ingest** — forwarder pipeline, token-bucket credits,
//!   producer registry and worker supervision
//! - [`control`] — the control plane and stats stream
//!
//! The dispatcher is the only task that writes to the transport; producers
//! only ever feel backpressure through credits and retry-after windows.

pub mod control;
pub mod server;

pub use control::{Capabilities, ControlPlane};
pub use server::Server;
