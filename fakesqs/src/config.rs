//! Configuration management

use fakesqs_queue::handlers::MAX_VISIBILITY_TIMEOUT_SECS;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Default hide interval for receives that do not pass one
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: f64,

    #[serde(default = "default_account_id")]
    pub account_id: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            visibility_timeout_secs: default_visibility_timeout(),
            account_id: default_account_id(),
        }
    }
}

fn default_port() -> u16 {
    4576
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_queue_name() -> String {
    "fakesqs".to_string()
}

fn default_visibility_timeout() -> f64 {
    30.0
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment keys use a double underscore between sections, e.g.
    /// `FAKESQS_QUEUE__VISIBILITY_TIMEOUT_SECS`.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("fakesqs").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("FAKESQS").separator("__"))
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// URL clients use to address the queue
    pub fn queue_url(&self) -> String {
        let host = match self.server.host.as_str() {
            "0.0.0.0" | "::" => "localhost",
            host => host,
        };
        format!(
            "http://{}:{}/{}/{}",
            host, self.server.port, self.queue.account_id, self.queue.name
        )
    }

    pub fn visibility_timeout(&self) -> anyhow::Result<Duration> {
        let secs = self.queue.visibility_timeout_secs;
        anyhow::ensure!(
            (0.0..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&secs),
            "visibility timeout must be between 0 and {} seconds, got {}",
            MAX_VISIBILITY_TIMEOUT_SECS,
            secs
        );
        Ok(Duration::from_secs_f64(secs))
    }
}
