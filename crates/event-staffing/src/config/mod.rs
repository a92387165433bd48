use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration as StdDuration;

use chrono::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub scheduling: SchedulingConfig,
    pub access: AccessConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = SchedulingConfig::default();
        let scheduling = SchedulingConfig {
            sweep_interval_minutes: positive_var(
                "APP_SWEEP_INTERVAL_MINUTES",
                defaults.sweep_interval_minutes,
            )?,
            expansion_horizon_days: positive_var(
                "APP_EXPANSION_HORIZON_DAYS",
                defaults.expansion_horizon_days,
            )?,
            auto_open_lead_days: positive_var(
                "APP_AUTO_OPEN_LEAD_DAYS",
                defaults.auto_open_lead_days,
            )?,
            collaborator_timeout_ms: positive_var(
                "APP_COLLABORATOR_TIMEOUT_MS",
                defaults.collaborator_timeout_ms,
            )?,
        };

        let managers = match env::var("APP_EVENT_MANAGERS") {
            Ok(raw) => parse_managers(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            scheduling,
            access: AccessConfig { managers },
        })
    }
}

fn positive_var(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidNumber { name, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

fn parse_managers(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<u64>().map_err(|_| ConfigError::InvalidManager {
                value: token.to_string(),
            })
        })
        .collect()
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Controllers granted `events.manage` on every scope by the built-in checker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessConfig {
    pub managers: Vec<u64>,
}

/// Cadence and bounds for the periodic expansion and deadline sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingConfig {
    pub sweep_interval_minutes: u32,
    pub expansion_horizon_days: u32,
    pub auto_open_lead_days: u32,
    pub collaborator_timeout_ms: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: 15,
            expansion_horizon_days: 183,
            auto_open_lead_days: 14,
            collaborator_timeout_ms: 5_000,
        }
    }
}

impl SchedulingConfig {
    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(u64::from(self.sweep_interval_minutes) * 60)
    }

    pub fn expansion_horizon(&self) -> Duration {
        Duration::days(i64::from(self.expansion_horizon_days))
    }

    pub fn auto_open_lead(&self) -> Duration {
        Duration::days(i64::from(self.auto_open_lead_days))
    }

    pub fn collaborator_timeout(&self) -> StdDuration {
        StdDuration::from_millis(u64::from(self.collaborator_timeout_ms))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    InvalidManager { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got '{value}')")
            }
            ConfigError::InvalidManager { value } => {
                write!(f, "APP_EVENT_MANAGERS entries must be controller ids (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidManager { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("APP_SWEEP_INTERVAL_MINUTES");
        env::remove_var("APP_EXPANSION_HORIZON_DAYS");
        env::remove_var("APP_AUTO_OPEN_LEAD_DAYS");
        env::remove_var("APP_COLLABORATOR_TIMEOUT_MS");
        env::remove_var("APP_EVENT_MANAGERS");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.scheduling, SchedulingConfig::default());
        assert_eq!(config.scheduling.sweep_interval(), StdDuration::from_secs(900));
        assert!(config.access.managers.is_empty());
    }

    #[test]
    fn reads_manager_allow_list() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_EVENT_MANAGERS", "1000001, 1000002 1000003");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.access.managers, vec![1_000_001, 1_000_002, 1_000_003]);

        env::set_var("APP_EVENT_MANAGERS", "1000001,ops");
        match AppConfig::load() {
            Err(ConfigError::InvalidManager { value }) => assert_eq!(value, "ops"),
            other => panic!("expected invalid manager, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_SWEEP_INTERVAL_MINUTES", "0");
        match AppConfig::load() {
            Err(ConfigError::InvalidNumber { name, .. }) => {
                assert_eq!(name, "APP_SWEEP_INTERVAL_MINUTES")
            }
            other => panic!("expected invalid number, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn reads_scheduling_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_EXPANSION_HORIZON_DAYS", "30");
        env::set_var("APP_COLLABORATOR_TIMEOUT_MS", "250");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.scheduling.expansion_horizon(), Duration::days(30));
        assert_eq!(
            config.scheduling.collaborator_timeout(),
            StdDuration::from_millis(250)
        );
        reset_env();
    }
}
