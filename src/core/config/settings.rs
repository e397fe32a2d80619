use std::time::Duration;

use super::parsing::{
    env_optional, env_or_default, parse_base_url, parse_bool, parse_environment,
    parse_positive_u64,
};
use super::types::{
    ApiSettings, ConfigError, RuntimeSettings, SessionSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("EXAM_CONDUCT_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );

        let base_url = parse_base_url(env_or_default(
            "EXAM_API_BASE_URL",
            "http://localhost:8000/api/v1",
        ))?;
        let token = env_optional("EXAM_API_TOKEN");
        let timeout_seconds = parse_positive_u64(
            "EXAM_API_TIMEOUT_SECONDS",
            env_or_default("EXAM_API_TIMEOUT_SECONDS", "30"),
        )?;

        let tick_interval_ms = parse_positive_u64(
            "EXAM_TICK_INTERVAL_MS",
            env_or_default("EXAM_TICK_INTERVAL_MS", "1000"),
        )?;
        let checkpoint_period_seconds = parse_positive_u64(
            "EXAM_CHECKPOINT_PERIOD_SECONDS",
            env_or_default("EXAM_CHECKPOINT_PERIOD_SECONDS", "10"),
        )?;
        let ack_timeout_seconds = parse_positive_u64(
            "EXAM_ACK_TIMEOUT_SECONDS",
            env_or_default("EXAM_ACK_TIMEOUT_SECONDS", "10"),
        )?;

        let exam_id = env_optional("EXAM_ID");

        let log_level = env_or_default("EXAM_CONDUCT_LOG_LEVEL", "info");
        let json = env_optional("EXAM_CONDUCT_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment },
            api: ApiSettings { base_url, token, timeout_seconds },
            session: SessionSettings {
                tick_interval: Duration::from_millis(tick_interval_ms),
                checkpoint_period_seconds,
                ack_timeout: Duration::from_secs(ack_timeout_seconds),
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
            exam_id,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub fn session(&self) -> SessionSettings {
        self.session
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub fn exam_id(&self) -> Result<&str, ConfigError> {
        self.exam_id.as_deref().ok_or(ConfigError::MissingValue("EXAM_ID"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.checkpoint_period_seconds > 3600 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_CHECKPOINT_PERIOD_SECONDS",
                value: self.session.checkpoint_period_seconds.to_string(),
            });
        }

        if !self.runtime.environment.is_production() {
            return Ok(());
        }

        if self.api.token.is_none() {
            return Err(ConfigError::MissingSecret("EXAM_API_TOKEN"));
        }
        if !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.api.base_url.clone()));
        }

        Ok(())
    }
}
