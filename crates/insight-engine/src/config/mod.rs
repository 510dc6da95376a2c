use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

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
    pub engine: EngineConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            engine: EngineConfig::from_env()?,
        })
    }
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colored output, only wanted on a developer terminal.
    pub ansi: bool,
}

/// Upper bound on ranked matches a single evaluation may return.
pub const MAX_MATCHES_CAP: usize = 3;

/// Tunables for rule evaluation, feedback suppression and refresh pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Catalog document to load instead of the bundled rules.
    pub rules_path: Option<PathBuf>,
    pub max_matches: usize,
    pub cooldown_days: i64,
    pub not_relevant_hours: i64,
    pub min_refresh_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            max_matches: 3,
            cooldown_days: 7,
            not_relevant_hours: 24,
            min_refresh_secs: 300,
        }
    }
}

impl EngineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rules_path = env::var("INSIGHT_RULES_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let max_matches = numeric_var("INSIGHT_MAX_MATCHES", defaults.max_matches)?;
        if !(1..=MAX_MATCHES_CAP).contains(&max_matches) {
            return Err(ConfigError::MaxMatchesOutOfRange { value: max_matches });
        }

        Ok(Self {
            rules_path,
            max_matches,
            cooldown_days: non_negative_var("INSIGHT_COOLDOWN_DAYS", defaults.cooldown_days)?,
            not_relevant_hours: non_negative_var(
                "INSIGHT_NOT_RELEVANT_HOURS",
                defaults.not_relevant_hours,
            )?,
            min_refresh_secs: non_negative_var(
                "INSIGHT_MIN_REFRESH_SECS",
                defaults.min_refresh_secs,
            )?,
        })
    }
}

fn numeric_var<T: std::str::FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

fn non_negative_var(variable: &'static str, default: i64) -> Result<i64, ConfigError> {
    let value = numeric_var(variable, default)?;
    if value < 0 {
        return Err(ConfigError::InvalidNumber { variable });
    }
    Ok(value)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
    MaxMatchesOutOfRange { value: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative whole number within range")
            }
            ConfigError::MaxMatchesOutOfRange { value } => {
                write!(
                    f,
                    "INSIGHT_MAX_MATCHES must be between 1 and {MAX_MATCHES_CAP}, got {value}"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::MaxMatchesOutOfRange { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
