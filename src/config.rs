//! Service configuration, read from environment variables.
//!
//! Every variable is optional; unset variables fall back to defaults.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `5080` |
//! | `DEFAULT_TOTAL` | `6` |
//! | `MAX_TOTAL` | `64` |
//! | `STREAM_RETRY_MS` | `3600000` |
//! | `FRAME_PAUSE_MS` | `0` |
//! | `TASK_TTL_SECS` | `1800` |
//! | `SWEEP_INTERVAL_SECS` | `60` |
//! | `EXCLUSIVE_PRODUCER` | `true` |
//! | `PRODUCER_COMMAND` | unset (simulated producer) |
//! | `PRODUCER_STEPS` | `50` |
//! | `PRODUCER_STEP_DELAY_MS` | `20` |
//! | `PRODUCER_POLL_MS` | `100` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Which artifact producer the service runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerConfig {
    /// Timed stand-in producer.
    Simulated { steps: u32, step_delay: Duration },
    /// External command invoked once per artifact.
    Command {
        program: String,
        args: Vec<String>,
        poll_interval: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Artifacts per task when a stream request does not say.
    pub default_total: u32,
    /// Upper bound on artifacts per task.
    pub max_total: u32,
    /// Reconnection interval advertised in the stream handshake.
    pub stream_retry: Duration,
    /// Pause between consecutive data frames.
    pub frame_pause: Duration,
    /// Idle time after which a non-streaming task is dropped.
    pub task_ttl: Duration,
    pub sweep_interval: Duration,
    /// Serialize producer calls across all tasks.
    pub exclusive_producer: bool,
    pub producer: ProducerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5080,
            default_total: 6,
            max_total: 64,
            stream_retry: Duration::from_millis(3_600_000),
            frame_pause: Duration::ZERO,
            task_ttl: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
            exclusive_producer: true,
            producer: ProducerConfig::Simulated {
                steps: 50,
                step_delay: Duration::from_millis(20),
            },
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let producer = match var("PRODUCER_COMMAND") {
            Some(command_line) => {
                let mut parts = command_line.split_whitespace().map(str::to_string);
                let program = parts.next().ok_or_else(|| ConfigError::InvalidValue {
                    name: "PRODUCER_COMMAND",
                    value: command_line.clone(),
                    reason: "empty command".to_string(),
                })?;
                ProducerConfig::Command {
                    program,
                    args: parts.collect(),
                    poll_interval: Duration::from_millis(parse(&var, "PRODUCER_POLL_MS", 100)?),
                }
            }
            None => ProducerConfig::Simulated {
                steps: parse(&var, "PRODUCER_STEPS", 50)?,
                step_delay: Duration::from_millis(parse(&var, "PRODUCER_STEP_DELAY_MS", 20)?),
            },
        };

        let config = Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT", defaults.port)?,
            default_total: parse(&var, "DEFAULT_TOTAL", defaults.default_total)?,
            max_total: parse(&var, "MAX_TOTAL", defaults.max_total)?,
            stream_retry: Duration::from_millis(parse(&var, "STREAM_RETRY_MS", 3_600_000)?),
            frame_pause: Duration::from_millis(parse(&var, "FRAME_PAUSE_MS", 0)?),
            task_ttl: Duration::from_secs(parse(&var, "TASK_TTL_SECS", 1800)?),
            sweep_interval: Duration::from_secs(parse(&var, "SWEEP_INTERVAL_SECS", 60)?),
            exclusive_producer: parse_bool(&var, "EXCLUSIVE_PRODUCER", defaults.exclusive_producer)?,
            producer,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_TOTAL",
                value: self.max_total.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_total == 0 || self.default_total > self.max_total {
            return Err(ConfigError::InvalidValue {
                name: "DEFAULT_TOTAL",
                value: self.default_total.to_string(),
                reason: format!("must be between 1 and MAX_TOTAL ({})", self.max_total),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value: value.clone(),
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn parse_bool<F>(var: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 5080);
        assert_eq!(config.default_total, 6);
        assert_eq!(config.stream_retry, Duration::from_secs(3600));
        assert!(config.exclusive_producer);
        assert_eq!(
            config.producer,
            ProducerConfig::Simulated {
                steps: 50,
                step_delay: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DEFAULT_TOTAL", "4"),
            ("FRAME_PAUSE_MS", "250"),
            ("EXCLUSIVE_PRODUCER", "off"),
            ("PRODUCER_COMMAND", "python3 generate.py --steps 30"),
            ("PRODUCER_POLL_MS", "50"),
        ])
        .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_total, 4);
        assert_eq!(config.frame_pause, Duration::from_millis(250));
        assert!(!config.exclusive_producer);
        assert_eq!(
            config.producer,
            ProducerConfig::Command {
                program: "python3".to_string(),
                args: vec!["generate.py".into(), "--steps".into(), "30".into()],
                poll_interval: Duration::from_millis(50),
            }
        );
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("PORT", "  "), ("PRODUCER_COMMAND", "")]).unwrap();
        assert_eq!(config.port, 5080);
        assert!(matches!(config.producer, ProducerConfig::Simulated { .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "PORT", .. }));

        let err = load(&[("EXCLUSIVE_PRODUCER", "maybe")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "EXCLUSIVE_PRODUCER",
                ..
            }
        ));

        let err = load(&[("DEFAULT_TOTAL", "10"), ("MAX_TOTAL", "5")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "DEFAULT_TOTAL",
                ..
            }
        ));
    }
}
