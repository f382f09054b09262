//! Engine configuration.
//!
//! Built once at startup, usually from the environment:
//!
//! ```bash
//! GATEHOUSE_DEV_BYPASS=false            # never enable outside development
//! GATEHOUSE_INVITE_TTL_HOURS=168
//! GATEHOUSE_AUDIT_QUEUE_CAPACITY=1024
//! GATEHOUSE_AUDIT_MAX_RETRIES=3
//! ```

use std::env;

use chrono::Duration;
use thiserror::Error;

/// Longest invite lifetime accepted from the environment (one year).
pub const MAX_INVITE_TTL_HOURS: i64 = 24 * 365;

/// Access policy knobs injected into the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicyConfig {
    /// Let failed access checks through, recording a policy override each time.
    pub allow_unauthenticated_fallback: bool,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: AccessPolicyConfig,
    /// How long an issued invite stays acceptable
    pub invite_ttl: Duration,
    /// Entries buffered for the audit writer before new ones are dropped
    pub audit_queue_capacity: usize,
    /// Write attempts after the first failure before an entry is dropped
    pub audit_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: AccessPolicyConfig::default(),
            invite_ttl: Duration::days(7),
            audit_queue_capacity: 1024,
            audit_max_retries: 3,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let allow_unauthenticated_fallback = env::var("GATEHOUSE_DEV_BYPASS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let invite_ttl = match parse_var::<i64>("GATEHOUSE_INVITE_TTL_HOURS")? {
            Some(hours) if hours <= 0 => {
                return Err(ConfigError::MustBePositive("GATEHOUSE_INVITE_TTL_HOURS"))
            }
            Some(hours) if hours > MAX_INVITE_TTL_HOURS => {
                return Err(ConfigError::InvalidValue {
                    var: "GATEHOUSE_INVITE_TTL_HOURS",
                    value: hours.to_string(),
                })
            }
            Some(hours) => Duration::hours(hours),
            None => defaults.invite_ttl,
        };

        let audit_queue_capacity = match parse_var::<usize>("GATEHOUSE_AUDIT_QUEUE_CAPACITY")? {
            Some(0) => return Err(ConfigError::MustBePositive("GATEHOUSE_AUDIT_QUEUE_CAPACITY")),
            Some(n) => n,
            None => defaults.audit_queue_capacity,
        };

        let audit_max_retries = parse_var::<u32>("GATEHOUSE_AUDIT_MAX_RETRIES")?
            .unwrap_or(defaults.audit_max_retries);

        Ok(Self {
            policy: AccessPolicyConfig {
                allow_unauthenticated_fallback,
            },
            invite_ttl,
            audit_queue_capacity,
            audit_max_retries,
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "GATEHOUSE_DEV_BYPASS",
        "GATEHOUSE_INVITE_TTL_HOURS",
        "GATEHOUSE_AUDIT_QUEUE_CAPACITY",
        "GATEHOUSE_AUDIT_MAX_RETRIES",
    ];

    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            for var in ENV_VARS {
                env::remove_var(var);
            }
            Self { _lock: lock }
        }

        fn set(&self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for var in ENV_VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_defaults_without_env() {
        let _guard = EnvGuard::new();
        let config = EngineConfig::from_env().unwrap();
        assert!(!config.policy.allow_unauthenticated_fallback);
        assert_eq!(config.invite_ttl, Duration::days(7));
        assert_eq!(config.audit_queue_capacity, 1024);
        assert_eq!(config.audit_max_retries, 3);
    }

    #[test]
    fn test_bypass_flag_values() {
        let guard = EnvGuard::new();
        guard.set("GATEHOUSE_DEV_BYPASS", "TRUE");
        assert!(EngineConfig::from_env().unwrap().policy.allow_unauthenticated_fallback);
        guard.set("GATEHOUSE_DEV_BYPASS", "1");
        assert!(EngineConfig::from_env().unwrap().policy.allow_unauthenticated_fallback);
        guard.set("GATEHOUSE_DEV_BYPASS", "yes");
        assert!(!EngineConfig::from_env().unwrap().policy.allow_unauthenticated_fallback);
    }

    #[test]
    fn test_numeric_overrides() {
        let guard = EnvGuard::new();
        guard.set("GATEHOUSE_INVITE_TTL_HOURS", "48");
        guard.set("GATEHOUSE_AUDIT_QUEUE_CAPACITY", "16");
        guard.set("GATEHOUSE_AUDIT_MAX_RETRIES", "0");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.invite_ttl, Duration::hours(48));
        assert_eq!(config.audit_queue_capacity, 16);
        assert_eq!(config.audit_max_retries, 0);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let guard = EnvGuard::new();
        guard.set("GATEHOUSE_INVITE_TTL_HOURS", "soon");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue {
                var: "GATEHOUSE_INVITE_TTL_HOURS",
                ..
            })
        ));

        guard.set("GATEHOUSE_INVITE_TTL_HOURS", "0");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::MustBePositive("GATEHOUSE_INVITE_TTL_HOURS"))
        ));

        guard.set("GATEHOUSE_INVITE_TTL_HOURS", "9999999999");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue {
                var: "GATEHOUSE_INVITE_TTL_HOURS",
                ..
            })
        ));

        guard.set("GATEHOUSE_INVITE_TTL_HOURS", &MAX_INVITE_TTL_HOURS.to_string());
        assert_eq!(
            EngineConfig::from_env().unwrap().invite_ttl,
            Duration::hours(MAX_INVITE_TTL_HOURS)
        );

        guard.set("GATEHOUSE_INVITE_TTL_HOURS", "24");
        guard.set("GATEHOUSE_AUDIT_QUEUE_CAPACITY", "0");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::MustBePositive("GATEHOUSE_AUDIT_QUEUE_CAPACITY"))
        ));
    }
}
