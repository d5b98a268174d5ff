//! Server configuration.
//!
//! Values come from environment variables with defaults; parse failures are
//! reported as [`ConfigError`] rather than panics.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sentiment_realtime::{ClientType, ConfigError, RealtimeConfig};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Channel bus backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusBackend {
    /// Redis pub/sub.
    #[default]
    Redis,
    /// In-process bus; publishers must live in the same process.
    Memory,
}

impl FromStr for BusBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(invalid("BUS_BACKEND", s)),
        }
    }
}

impl fmt::Display for BusBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to bind to.
    pub port: u16,

    /// Channel bus backend.
    pub bus: BusBackend,

    /// Redis connection URL.
    pub redis_url: String,

    /// Real-time core settings.
    pub realtime: RealtimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl ServerConfig {
    /// Creates a configuration bound to `host:port` with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            bus: BusBackend::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            realtime: RealtimeConfig::default(),
        }
    }

    /// Sets the bus backend.
    #[must_use]
    pub fn with_bus(mut self, bus: BusBackend) -> Self {
        self.bus = bus;
        self
    }

    /// Sets the real-time core settings.
    #[must_use]
    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.realtime = realtime;
        self
    }

    /// Returns the `host:port` bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("API_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(&lookup, "API_PORT", DEFAULT_PORT)?;
        let bus = parse_or(&lookup, "BUS_BACKEND", BusBackend::default())?;
        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

        let defaults = RealtimeConfig::default();
        let max_requests = parse_or(&lookup, "WS_RATE_LIMIT", defaults.rate_limit_max_requests)?;
        let window_secs = parse_or(
            &lookup,
            "WS_RATE_WINDOW_SECS",
            defaults.rate_limit_window.as_secs(),
        )?;
        let send_timeout_ms = parse_or(
            &lookup,
            "WS_SEND_TIMEOUT_MS",
            u64::try_from(defaults.send_timeout.as_millis()).unwrap_or(u64::MAX),
        )?;
        let outbound_buffer = parse_or(&lookup, "WS_OUTBOUND_BUFFER", defaults.outbound_buffer)?;

        let mut realtime = defaults
            .with_rate_limit(max_requests, Duration::from_secs(window_secs))
            .with_send_timeout(Duration::from_millis(send_timeout_ms))
            .with_outbound_buffer(outbound_buffer);

        if let Some(raw) = lookup("WS_RATE_LIMIT_DISCONNECT_AFTER") {
            let violations: u32 = raw
                .trim()
                .parse()
                .map_err(|_| invalid("WS_RATE_LIMIT_DISCONNECT_AFTER", &raw))?;
            if violations > 0 {
                realtime = realtime.with_disconnect_after(violations);
            }
        }

        if let Some(raw) = lookup("WS_CLIENT_TYPES") {
            let client_types = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<ClientType>().map_err(|_| invalid("WS_CLIENT_TYPES", &raw)))
                .collect::<Result<Vec<_>, _>>()?;
            realtime = realtime.with_client_types(client_types);
        }

        if let Some(raw) = lookup("WS_KEEP_IDLE_SUBSCRIPTIONS") {
            if parse_bool("WS_KEEP_IDLE_SUBSCRIPTIONS", &raw)? {
                realtime = realtime.keep_idle_subscriptions();
            }
        }

        realtime.validate()?;

        Ok(Self {
            host,
            port,
            bus,
            redis_url,
            realtime,
        })
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("config");

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.bus, BusBackend::Redis);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.realtime.rate_limit_max_requests, 60);
        assert!(config.realtime.rate_limit_disconnect_after.is_none());
    }

    #[test]
    fn test_server_config_from_vars() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("API_HOST", "127.0.0.1"),
            ("API_PORT", "9000"),
            ("BUS_BACKEND", "memory"),
            ("WS_RATE_LIMIT", "10"),
            ("WS_RATE_WINDOW_SECS", "5"),
            ("WS_RATE_LIMIT_DISCONNECT_AFTER", "3"),
            ("WS_SEND_TIMEOUT_MS", "250"),
            ("WS_OUTBOUND_BUFFER", "32"),
            ("WS_CLIENT_TYPES", "sentiment, trading"),
            ("WS_KEEP_IDLE_SUBSCRIPTIONS", "true"),
        ]))
        .expect("config");

        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.bus, BusBackend::Memory);
        assert_eq!(config.realtime.rate_limit_max_requests, 10);
        assert_eq!(config.realtime.rate_limit_window, Duration::from_secs(5));
        assert_eq!(config.realtime.rate_limit_disconnect_after, Some(3));
        assert_eq!(config.realtime.send_timeout, Duration::from_millis(250));
        assert_eq!(config.realtime.outbound_buffer, 32);
        assert_eq!(
            config.realtime.client_types,
            vec![ClientType::Sentiment, ClientType::Trading]
        );
        assert!(!config.realtime.teardown_idle_subscriptions);
    }

    #[test]
    fn test_server_config_invalid_port() {
        let err = ServerConfig::from_lookup(lookup(&[("API_PORT", "http")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "API_PORT".to_string(),
                value: "http".to_string(),
            }
        );
    }

    #[test]
    fn test_server_config_unknown_client_type() {
        let err = ServerConfig::from_lookup(lookup(&[("WS_CLIENT_TYPES", "sentiment,news")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WS_CLIENT_TYPES"));
    }

    #[test]
    fn test_server_config_zero_rate_limit() {
        let err = tokio_test::assert_err!(ServerConfig::from_lookup(lookup(&[(
            "WS_RATE_LIMIT",
            "0"
        )])));
        assert_eq!(err, ConfigError::InvalidRateLimit);
    }

    #[test]
    fn test_bus_backend_parse() {
        assert_eq!("Redis".parse::<BusBackend>(), Ok(BusBackend::Redis));
        assert_eq!("memory".parse::<BusBackend>(), Ok(BusBackend::Memory));
        assert!("kafka".parse::<BusBackend>().is_err());
        assert_eq!(BusBackend::Memory.to_string(), "memory");
    }
}
