//! Typed error for the flipdisc server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised flipdisc error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscError {
    pub kind: DiscErrorKind,
    pub message: String,
    /// Producer that triggered the error, if any.
    pub producer_id: Option<String>,
    /// Panel the error is scoped to, if any.
    pub panel_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiscErrorKind {
    /// Unknown magic/version or truncated RBM header.
    BadHeader,
    /// Frame width/height don't match the published canvas.
    GeometryMismatch,
    /// Rate-limited; the frame was dropped, not the request.
    NoToken,
    /// Unsupported panel geometry during mapping/encoding.
    Encode,
    /// Transport write failure or timeout; retried on the next tick.
    TransportTransient,
    /// Transport declared unrecoverable; dispatcher degrades.
    TransportPermanent,
    /// Producer restart budget exceeded.
    SupervisorExhausted,
    /// Display file / parameter validation failure.
    InvalidConfig,
}

pub type DiscResult<T> = Result<T, DiscError>;

// ── Construction helpers ─────────────────────────────────────────────

impl DiscError {
    pub fn new(kind: DiscErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            producer_id: None,
            panel_id: None,
        }
    }

    pub fn with_producer(mut self, id: impl Into<String>) -> Self {
        self.producer_id = Some(id.into());
        self
    }

    pub fn with_panel(mut self, id: impl Into<String>) -> Self {
        self.panel_id = Some(id.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn bad_header(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::BadHeader, msg)
    }

    pub fn geometry_mismatch(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::GeometryMismatch, msg)
    }

    pub fn no_token(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::NoToken, msg)
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::Encode, msg)
    }

    pub fn transport_transient(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::TransportTransient, msg)
    }

    pub fn transport_permanent(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::TransportPermanent, msg)
    }

    pub fn supervisor_exhausted(producer: &str) -> Self {
        Self::new(DiscErrorKind::SupervisorExhausted, "exceeded restart budget")
            .with_producer(producer)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(DiscErrorKind::InvalidConfig, msg)
    }

    /// Whether the error should be surfaced to the producer as a
    /// client-side rejection.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            DiscErrorKind::BadHeader | DiscErrorKind::GeometryMismatch
        )
    }

    /// Whether the transport has declared the error unrecoverable.
    pub fn is_permanent(&self) -> bool {
        self.kind == DiscErrorKind::TransportPermanent
    }
}

impl fmt::Display for DiscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.producer_id, &self.panel_id) {
            (Some(p), _) => write!(f, "[{:?} producer={}] {}", self.kind, p, self.message),
            (None, Some(panel)) => write!(f, "[{:?} panel={}] {}", self.kind, panel, self.message),
            (None, None) => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DiscError {}

impl From<std::io::Error> for DiscError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => Self::transport_transient(format!("I/O timeout: {}", e)),
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                Self::transport_permanent(e.to_string())
            }
            _ => Self::transport_transient(e.to_string()),
        }
    }
}

impl From<DiscError> for String {
    fn from(e: DiscError) -> String {
        e.message
    }
}
