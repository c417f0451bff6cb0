use std::net::SocketAddr;
use std::path::PathBuf;

use config::{Config, ConfigError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LinkConfig {
    /// Local address the MAVLink UDP socket binds to.
    pub address: SocketAddr,
    /// MAVLink protocol version, "V1" or "V2".
    pub mavlink: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageryConfig {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct HubConfig {
    /// Absent when running without a link, e.g. while testing the HTTP
    /// surface; queries then report the telemetry subsystem unavailable.
    pub link: Option<LinkConfig>,
    pub server: ServerConfig,
    pub imagery: Option<ImageryConfig>,
}

impl HubConfig {
    pub fn read() -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(config::File::with_name("telemetry-hub"))?;
        c.merge(config::Environment::with_prefix("TELEMETRY_HUB"))?;

        c.try_into()
    }

    pub fn read_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(config::File::from(path))?;
        c.merge(config::Environment::with_prefix("TELEMETRY_HUB"))?;

        c.try_into()
    }
}
