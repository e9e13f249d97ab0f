use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_RUNTIME_URL: &str = "http://localhost:11434";

/// Server-level settings. Layered: built-in defaults, then an optional
/// `ember.toml`, then `EMBER_SERVER__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub runtime_url: String,
    pub cors: bool,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("host", DEFAULT_HOST)?
            .set_default("port", i64::from(DEFAULT_PORT))?
            .set_default("runtime_url", DEFAULT_RUNTIME_URL)?
            .set_default("cors", true)?
            .add_source(File::with_name("ember").required(false))
            .add_source(Environment::with_prefix("EMBER_SERVER").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
