//! Worker configuration.

use std::time::Duration;

use campus_core::config::{ConfigError, env_parse};

/// Settings for [`crate::workers::EventDrainWorker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainWorkerConfig {
    /// Name used in logs.
    pub name: String,
    /// Delay between ticks after a successful tick.
    pub interval: Duration,
    /// Delay before the next tick after a failed one.
    pub error_backoff: Duration,
}

impl Default for DrainWorkerConfig {
    fn default() -> Self {
        Self {
            name: "event-drain".to_string(),
            interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(30),
        }
    }
}

impl DrainWorkerConfig {
    pub const NAME_ENV: &'static str = "CAMPUS_DRAIN_WORKER_NAME";
    pub const INTERVAL_ENV: &'static str = "CAMPUS_DRAIN_INTERVAL_MS";
    pub const BACKOFF_ENV: &'static str = "CAMPUS_DRAIN_BACKOFF_MS";

    /// Defaults overridden by `CAMPUS_DRAIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = env_parse::<String>(Self::NAME_ENV)? {
            config.name = name;
        }
        if let Some(ms) = env_parse::<u64>(Self::INTERVAL_ENV)? {
            config.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>(Self::BACKOFF_ENV)? {
            config.error_backoff = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// `from_env` reads fixed variable names; tests that set them take turns.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in vars {
            // SAFETY: serialized by ENV_LOCK; nothing else in this crate reads these.
            unsafe { std::env::set_var(key, value) }
        }
        let result = f();
        for (key, _) in vars {
            // SAFETY: as above.
            unsafe { std::env::remove_var(key) }
        }
        result
    }

    #[test]
    fn defaults_back_off_longer_than_the_interval() {
        let config = DrainWorkerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.error_backoff, Duration::from_secs(30));
        assert!(config.error_backoff > config.interval);
    }

    #[test]
    fn builders_override_fields() {
        let config = DrainWorkerConfig::default()
            .with_name("profiles")
            .with_interval(Duration::from_millis(250));
        assert_eq!(config.name, "profiles");
        assert_eq!(config.interval, Duration::from_millis(250));
    }

    #[test]
    fn from_env_without_variables_is_the_default() {
        let config = with_env(&[], DrainWorkerConfig::from_env).unwrap();
        assert_eq!(config, DrainWorkerConfig::default());
    }

    #[test]
    fn from_env_overrides_the_interval() {
        let config = with_env(&[(DrainWorkerConfig::INTERVAL_ENV, "1500")], || {
            DrainWorkerConfig::from_env()
        })
        .unwrap();
        assert_eq!(config.interval, Duration::from_millis(1500));
        assert_eq!(config.error_backoff, Duration::from_secs(30));
    }

    #[test]
    fn from_env_overrides_the_backoff() {
        let config = with_env(&[(DrainWorkerConfig::BACKOFF_ENV, "60000")], || {
            DrainWorkerConfig::from_env()
        })
        .unwrap();
        assert_eq!(config.error_backoff, Duration::from_secs(60));
    }

    #[test]
    fn from_env_overrides_the_name() {
        let config = with_env(&[(DrainWorkerConfig::NAME_ENV, "grant-events")], || {
            DrainWorkerConfig::from_env()
        })
        .unwrap();
        assert_eq!(config.name, "grant-events");
    }

    #[test]
    fn unparseable_interval_is_rejected() {
        let err = with_env(&[(DrainWorkerConfig::INTERVAL_ENV, "5s")], || {
            DrainWorkerConfig::from_env()
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: DrainWorkerConfig::INTERVAL_ENV.into(),
                value: "5s".into(),
            }
        );
    }
}
