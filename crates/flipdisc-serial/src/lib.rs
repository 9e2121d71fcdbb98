//! Bus transports for the flipdisc server.
//!
//! The dispatcher is the only task that touches a transport. Everything it
//! needs is the small `BusTransport` capability set; the mock and the real
//! RS-485 port are interchangeable behind it.

pub mod mock;
pub mod rs485;
pub mod transport;

pub use mock::MockTransport;
pub use rs485::Rs485Transport;
pub use transport::BusTransport;
