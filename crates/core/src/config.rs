//! Environment-driven configuration helpers.
//!
//! Config structs across the workspace start from `Default` and let
//! environment variables override individual fields. A variable that is set
//! but unparseable is an error, never silently ignored.

use core::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Read and parse `key`. `Ok(None)` when the variable is unset or empty.
pub fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Read a boolean flag (`1/0`, `true/false`, `yes/no`, `on/off`).
pub fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = env_parse::<String>(key)? else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}
