use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) session: SessionSettings,
    pub(super) telemetry: TelemetrySettings,
    pub(super) exam_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

/// Timing knobs handed to every `ExamSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub tick_interval: Duration,
    pub checkpoint_period_seconds: u64,
    pub ack_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            checkpoint_period_seconds: 10,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
    #[error("missing required value for {0}")]
    MissingValue(&'static str),
}
