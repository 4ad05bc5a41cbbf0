use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub pretty_json: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_filter() -> String {
    "igloo_coordinator=info,igloo_stats=info,warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            log_filter: default_log_filter(),
            pretty_json: false,
        }
    }
}

impl Settings {
    /// Loads settings from `COORDINATOR_CONFIG_PATH`, if set, and the
    /// `IGLOO_COORDINATOR__*` environment.
    pub fn new() -> Result<Self, config::ConfigError> {
        let config_file_path = std::env::var("COORDINATOR_CONFIG_PATH").ok();
        Self::load(config_file_path.as_deref())
    }

    /// Loads settings from an explicit file, then the environment.
    pub fn load(config_file_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let s = builder
            .add_source(config::Environment::with_prefix("IGLOO_COORDINATOR").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
