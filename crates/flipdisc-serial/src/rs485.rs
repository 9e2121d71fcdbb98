//! RS-485 serial transport.
//!
//! Drives a real half-duplex RS-485 adapter through the `serialport`
//! crate. The port API is blocking, so open/write/close hop onto the
//! blocking pool; the port handle itself lives behind a std mutex that is
//! only ever locked from blocking context.

use crate::transport::BusTransport;
use flipdisc_core::{DiscError, DiscResult, Parity, SerialSettings, StopBits};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocking-side I/O timeout. The dispatcher additionally bounds every
/// write with its own `write_timeout`.
const PORT_TIMEOUT: Duration = Duration::from_millis(500);

type PortSlot = Arc<Mutex<Option<Box<dyn serialport::SerialPort>>>>;

pub struct Rs485Transport {
    path: String,
    settings: SerialSettings,
    port: PortSlot,
}

impl Rs485Transport {
    /// Build a transport for the port named in `settings`.
    pub fn new(settings: SerialSettings) -> DiscResult<Arc<Self>> {
        let path = settings
            .port
            .clone()
            .ok_or_else(|| DiscError::invalid_config("serial settings do not name a port"))?;
        Ok(Arc::new(Self {
            path,
            settings,
            port: Arc::new(Mutex::new(None)),
        }))
    }

    fn map_open_error(&self, e: serialport::Error) -> DiscError {
        match e.kind() {
            serialport::ErrorKind::NoDevice => {
                DiscError::transport_permanent(format!("{}: {}", self.path, e))
            }
            serialport::ErrorKind::InvalidInput => {
                DiscError::transport_permanent(format!("{}: {}", self.path, e))
            }
            serialport::ErrorKind::Io(kind) => std::io::Error::from(kind).into(),
            _ => DiscError::transport_transient(format!("{}: {}", self.path, e)),
        }
    }
}

#[async_trait::async_trait]
impl BusTransport for Rs485Transport {
    async fn open(&self) -> DiscResult<()> {
        {
            let slot = self.port.lock().expect("port mutex poisoned");
            if slot.is_some() {
                return Err(DiscError::transport_transient(format!(
                    "{} already open",
                    self.path
                )));
            }
        }

        let path = self.path.clone();
        let settings = self.settings.clone();
        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&path, settings.baud)
                .data_bits(serialport::DataBits::Eight)
                .parity(match settings.parity {
                    Parity::None => serialport::Parity::None,
                    Parity::Odd => serialport::Parity::Odd,
                    Parity::Even => serialport::Parity::Even,
                })
                .stop_bits(match settings.stop_bits {
                    StopBits::One => serialport::StopBits::One,
                    StopBits::Two => serialport::StopBits::Two,
                })
                .timeout(PORT_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| DiscError::transport_transient(format!("open task failed: {}", e)))?
        .map_err(|e| self.map_open_error(e))?;

        log::info!(
            "opened RS-485 port {} ({})",
            self.path,
            self.settings.shorthand()
        );
        *self.port.lock().expect("port mutex poisoned") = Some(opened);
        Ok(())
    }

    async fn close(&self) -> DiscResult<()> {
        // Dropping the handle closes the descriptor.
        let dropped = self.port.lock().expect("port mutex poisoned").take();
        if dropped.is_some() {
            log::info!("closed RS-485 port {}", self.path);
        }
        Ok(())
    }

    async fn write_all(&self, bytes: &[u8]) -> DiscResult<()> {
        let port = self.port.clone();
        let data = bytes.to_vec();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> DiscResult<()> {
            let mut slot = port.lock().expect("port mutex poisoned");
            let handle = slot
                .as_mut()
                .ok_or_else(|| DiscError::transport_transient(format!("{} not open", path)))?;
            handle.write_all(&data)?;
            handle.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| DiscError::transport_transient(format!("write task failed: {}", e)))?
    }

    fn is_open(&self) -> bool {
        self.port.lock().expect("port mutex poisoned").is_some()
    }

    fn name(&self) -> &str {
        &self.path
    }
}
