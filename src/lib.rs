pub mod checksum;
pub mod config;
pub mod protocol;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use protocol::{AisClient, Command, TrackingServer};
pub use transport::{ConnectionStatus, Link, Transport, TransportKind};
