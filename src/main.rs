//! Daemon entry point.
//!
//! Loads the declarative display file, picks the transport (RS-485 when
//! the file names a port, the mock sink otherwise), and runs the server
//! until interrupted. With the mock sink a built-in demo producer is
//! started so the pipeline has something to pace.

use flipdisc_core::DisplayConfig;
use flipdisc_serial::{BusTransport, MockTransport, Rs485Transport};
use flipdisc_server::Server;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "display.json";

#[tokio::main]
async fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let display = match DisplayConfig::load(&path) {
        Ok(display) => display,
        Err(e) => {
            log::error!("{}: {}", path, e);
            std::process::exit(2);
        }
    };

    let mock = display.serial.port.is_none();
    let transport: Arc<dyn BusTransport> = if mock {
        log::info!("no serial port configured, using mock bus");
        MockTransport::new("mock0")
    } else {
        match Rs485Transport::new(display.serial.clone()) {
            Ok(transport) => transport,
            Err(e) => {
                log::error!("serial transport: {}", e);
                std::process::exit(2);
            }
        }
    };

    let mut server = match Server::build(&display, transport).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("startup failed: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = server.start().await {
        log::error!("startup failed: {}", e);
        std::process::exit(2);
    }
    if mock {
        if let Err(e) = server
            .add_demo_worker("blink", Duration::from_millis(500))
            .await
        {
            log::warn!("demo worker: {}", e);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("signal handler failed: {}", e);
    }
    log::info!("interrupt received, shutting down");
    server.shutdown().await;
}
