//! Replay configuration from environment (`.env` honored).

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::WsTransportConfig;
use crate::models::SensorSchema;
use crate::replay::DEFAULT_INTERVAL;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub endpoint: String,
    pub dataset: Option<PathBuf>,
    pub interval: Duration,
    pub auto_start: bool,
    pub schema: SensorSchema,
    pub max_message_bytes: usize,
    pub exit_on_finish: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            dataset: None,
            interval: DEFAULT_INTERVAL,
            auto_start: true,
            schema: SensorSchema::evaporator(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            exit_on_finish: false,
        }
    }
}

impl ReplayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build from an arbitrary key lookup. Unparsable values fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoint = lookup("REPLAY_ENDPOINT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.endpoint);

        let dataset = lookup("REPLAY_DATASET")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let interval = lookup("REPLAY_INTERVAL_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);

        let auto_start = lookup("REPLAY_AUTO_START")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(defaults.auto_start);

        let schema = lookup("REPLAY_SCHEMA_FIELDS")
            .map(|s| SensorSchema::from_fields(s.split(',')))
            .filter(|schema| !schema.is_empty())
            .unwrap_or(defaults.schema);

        let max_message_bytes = lookup("REPLAY_MAX_MESSAGE_BYTES")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.max_message_bytes);

        let exit_on_finish = lookup("REPLAY_EXIT_ON_FINISH")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(defaults.exit_on_finish);

        Self {
            endpoint,
            dataset,
            interval,
            auto_start,
            schema,
            max_message_bytes,
            exit_on_finish,
        }
    }

    pub fn transport_config(&self) -> WsTransportConfig {
        let defaults = WsTransportConfig::default();
        WsTransportConfig {
            max_message_size: self.max_message_bytes,
            max_frame_size: defaults.max_frame_size.min(self.max_message_bytes),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
