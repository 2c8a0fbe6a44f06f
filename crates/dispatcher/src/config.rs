use floe_mailbox::InMemoryMailboxService;
use serde::Deserialize;
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "FLOE_DISPATCHER_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "crates/dispatcher/config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Budget for draining the reduce stage when the caller gives none.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Blocks buffered per in-process mailbox before senders wait.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_mailbox_capacity() -> usize {
    64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl Settings {
    /// Loads settings from `FLOE_DISPATCHER_CONFIG_PATH` (or the bundled
    /// default file), overridden by `FLOE_DISPATCHER__*` variables.
    pub fn new() -> Result<Self, ::config::ConfigError> {
        let config_file_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(&config_file_path)
    }

    pub fn from_path(path: &str) -> Result<Self, ::config::ConfigError> {
        let s = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("FLOE_DISPATCHER").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// In-process mailbox service for the reduce stage, sized by
    /// `mailbox_capacity`.
    pub fn mailbox_service(&self, hostname: &str, mailbox_port: u16) -> InMemoryMailboxService {
        InMemoryMailboxService::with_capacity(hostname, mailbox_port, self.mailbox_capacity)
    }
}
