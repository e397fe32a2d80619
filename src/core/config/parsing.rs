use std::env;

use super::types::{ConfigError, Environment};

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_positive_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    let parsed = parse_u64(field, value)?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue { field, value: "0".to_string() });
    }
    Ok(parsed)
}

pub(super) fn parse_base_url(value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    let has_scheme = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    let has_host = trimmed.split("://").nth(1).is_some_and(|rest| !rest.is_empty());
    if !has_scheme || !has_host {
        return Err(ConfigError::InvalidUrl(value));
    }
    Ok(trimmed.to_string())
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}
