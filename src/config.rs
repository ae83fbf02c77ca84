use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use crate::call::{CandidatePolicy, Role};

pub const DEFAULT_RELAY_PORT: u16 = 8080;
pub const DEFAULT_ANSWER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:8012";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub answer_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub rust_log: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
            static_dir: PathBuf::from("static"),
            answer_timeout: Duration::from_secs(DEFAULT_ANSWER_TIMEOUT_SECS),
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            rust_log: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub signaling_url: String,
    pub use_stun: bool,
    pub stun_url: String,
    pub role: Role,
    pub candidate_policy: CandidatePolicy,
    pub rust_log: String,
}

impl ClientConfig {
    /// Assist servers handed to the media session.
    pub fn ice_servers(&self) -> Vec<String> {
        if self.use_stun {
            vec![self.stun_url.clone()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidPort(String, ParseIntError),
    PortOutOfRange(u16),
    InvalidValue(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "{} is required", var),
            ConfigError::InvalidPort(val, err) => {
                write!(
                    f,
                    "RELAY_PORT must be a valid port number (got '{}': {})",
                    val, err
                )
            }
            ConfigError::PortOutOfRange(port) => {
                write!(f, "RELAY_PORT must be between 1 and 65535 (got {})", port)
            }
            ConfigError::InvalidValue(var, val) => {
                write!(f, "{} has an invalid value '{}'", var, val)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn rust_log_or_default() -> String {
    env::var("RUST_LOG").unwrap_or_else(|_| {
        tracing::warn!("RUST_LOG not set, using default: info");
        "info".to_string()
    })
}

fn parse_bool(var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(var.to_string(), val)),
        },
    }
}

/// Accepts `scheme://host[:port]` origins, the only shape CORS can match against.
fn validate_origin(origin: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidValue("ALLOWED_ORIGINS".to_string(), origin.to_string());
    let uri: warp::http::Uri = origin.parse().map_err(|_| invalid())?;
    let scheme_ok = matches!(uri.scheme_str(), Some("http") | Some("https"));
    let path_ok = matches!(uri.path(), "" | "/") && uri.query().is_none();
    if scheme_ok && uri.authority().is_some() && path_ok && !origin.ends_with('/') {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Validates the relay's environment variables and returns a RelayConfig.
/// Every variable is optional; present-but-invalid values are errors.
pub fn validate_relay_env() -> Result<RelayConfig, ConfigError> {
    let defaults = RelayConfig::default();

    let host = env::var("RELAY_HOST").unwrap_or(defaults.host);

    let port = match env::var("RELAY_PORT") {
        Err(_) => defaults.port,
        Ok(port_str) => {
            let port: u16 = port_str
                .parse()
                .map_err(|e| ConfigError::InvalidPort(port_str.clone(), e))?;
            if port == 0 {
                return Err(ConfigError::PortOutOfRange(port));
            }
            port
        }
    };

    let static_dir = env::var("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.static_dir);

    let answer_timeout = match env::var("ANSWER_TIMEOUT_SECS") {
        Err(_) => defaults.answer_timeout,
        Ok(val) => match val.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => return Err(ConfigError::InvalidValue("ANSWER_TIMEOUT_SECS".to_string(), val)),
        },
    };

    let allowed_origins = match env::var("ALLOWED_ORIGINS") {
        Err(_) => defaults.allowed_origins,
        Ok(val) => {
            let origins: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if origins.is_empty() {
                return Err(ConfigError::InvalidValue("ALLOWED_ORIGINS".to_string(), val));
            }
            for origin in &origins {
                validate_origin(origin)?;
            }
            origins
        }
    };

    let config = RelayConfig {
        host,
        port,
        static_dir,
        answer_timeout,
        allowed_origins,
        rust_log: rust_log_or_default(),
    };

    tracing::info!(
        host = %config.host,
        port = config.port,
        static_dir = %config.static_dir.display(),
        answer_timeout_secs = config.answer_timeout.as_secs(),
        origins = ?config.allowed_origins,
        "Relay configuration"
    );

    Ok(config)
}

/// Validates the call client's environment variables and returns a ClientConfig.
/// Only SIGNALING_URL is required.
pub fn validate_client_env() -> Result<ClientConfig, ConfigError> {
    let signaling_url = env::var("SIGNALING_URL")
        .map_err(|_| ConfigError::MissingVariable("SIGNALING_URL".to_string()))?;
    if !(signaling_url.starts_with("ws://") || signaling_url.starts_with("wss://")) {
        return Err(ConfigError::InvalidValue(
            "SIGNALING_URL".to_string(),
            signaling_url,
        ));
    }

    let use_stun = parse_bool("USE_STUN", false)?;
    let stun_url = env::var("STUN_URL").unwrap_or_else(|_| DEFAULT_STUN_URL.to_string());

    let role = match env::var("CALL_ROLE") {
        Err(_) => Role::Initiator,
        Ok(val) => val
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CALL_ROLE".to_string(), val))?,
    };

    let candidate_policy = match env::var("CANDIDATE_POLICY") {
        Err(_) => CandidatePolicy::Drop,
        Ok(val) => val
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CANDIDATE_POLICY".to_string(), val))?,
    };

    let config = ClientConfig {
        signaling_url,
        use_stun,
        stun_url,
        role,
        candidate_policy,
        rust_log: rust_log_or_default(),
    };

    tracing::info!(
        signaling_url = %config.signaling_url,
        use_stun = config.use_stun,
        role = ?config.role,
        candidate_policy = ?config.candidate_policy,
        "Client configuration"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    use std::sync::Mutex;

    lazy_static::lazy_static! {
        static ref ENV_MUTEX: Mutex<()> = Mutex::new(());
    }

    const ALL_VARS: &[&str] = &[
        "RELAY_HOST",
        "RELAY_PORT",
        "STATIC_DIR",
        "ANSWER_TIMEOUT_SECS",
        "ALLOWED_ORIGINS",
        "SIGNALING_URL",
        "USE_STUN",
        "STUN_URL",
        "CALL_ROLE",
        "CANDIDATE_POLICY",
        "RUST_LOG",
    ];

    // Serializes env access and clears every variable on both ends of a test
    struct EnvGuard<'a> {
        _guard: std::sync::MutexGuard<'a, ()>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            for var in ALL_VARS {
                env::remove_var(var);
            }
            EnvGuard { _guard: guard }
        }

        fn set(&mut self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for var in ALL_VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_relay_defaults() {
        let _guard = EnvGuard::new();

        let config = validate_relay_env().expect("Expected valid configuration");
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.answer_timeout, Duration::from_secs(30));
        assert_eq!(config.allowed_origins, vec!["http://localhost:8012".to_string()]);
        assert_eq!(config.rust_log, "info");
    }

    #[test]
    fn test_relay_valid_configuration() {
        let mut guard = EnvGuard::new();
        guard.set("RELAY_PORT", "9000");
        guard.set("ANSWER_TIMEOUT_SECS", "5");
        guard.set(
            "ALLOWED_ORIGINS",
            "http://localhost:8012, https://example.ngrok-free.app",
        );
        guard.set("RUST_LOG", "debug");

        let config = validate_relay_env().expect("Expected valid configuration");
        assert_eq!(config.port, 9000);
        assert_eq!(config.answer_timeout, Duration::from_secs(5));
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.rust_log, "debug");
    }

    #[test]
    fn test_relay_invalid_port() {
        let mut guard = EnvGuard::new();
        guard.set("RELAY_PORT", "not-a-number");

        let err = validate_relay_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_, _)));
        assert!(err
            .to_string()
            .contains("RELAY_PORT must be a valid port number"));
    }

    #[test]
    fn test_relay_port_out_of_range() {
        let mut guard = EnvGuard::new();
        guard.set("RELAY_PORT", "0");

        let err = validate_relay_env().unwrap_err();
        assert!(matches!(err, ConfigError::PortOutOfRange(_)));
        assert!(err.to_string().contains("must be between 1 and 65535"));
    }

    #[test]
    fn test_relay_rejects_origin_with_path() {
        let mut guard = EnvGuard::new();
        guard.set("ALLOWED_ORIGINS", "http://localhost:8012/app");

        let err = validate_relay_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref var, _) if var == "ALLOWED_ORIGINS"));
    }

    #[test]
    fn test_relay_rejects_zero_timeout() {
        let mut guard = EnvGuard::new();
        guard.set("ANSWER_TIMEOUT_SECS", "0");

        assert!(validate_relay_env().is_err());
    }

    #[test]
    fn test_client_missing_signaling_url() {
        let _guard = EnvGuard::new();

        let err = validate_client_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(_)));
        assert!(err.to_string().contains("SIGNALING_URL is required"));
    }

    #[test]
    fn test_client_defaults() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNALING_URL", "ws://127.0.0.1:8080/ws");

        let config = validate_client_env().expect("Expected valid configuration");
        assert!(!config.use_stun);
        assert!(config.ice_servers().is_empty());
        assert_eq!(config.role, Role::Initiator);
        assert_eq!(config.candidate_policy, CandidatePolicy::Drop);
    }

    #[test]
    fn test_client_stun_toggle() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNALING_URL", "ws://127.0.0.1:8080/ws");
        guard.set("USE_STUN", "true");
        guard.set("CALL_ROLE", "responder");
        guard.set("CANDIDATE_POLICY", "queue");

        let config = validate_client_env().expect("Expected valid configuration");
        assert_eq!(config.ice_servers(), vec![DEFAULT_STUN_URL.to_string()]);
        assert_eq!(config.role, Role::Responder);
        assert_eq!(config.candidate_policy, CandidatePolicy::Queue);
    }

    #[test]
    fn test_client_invalid_values() {
        let test_cases = vec![
            ("SIGNALING_URL", "http://127.0.0.1:8080/ws"),
            ("USE_STUN", "maybe"),
            ("CALL_ROLE", "observer"),
            ("CANDIDATE_POLICY", "retry"),
        ];

        for (var, value) in test_cases {
            let mut guard = EnvGuard::new();
            guard.set("SIGNALING_URL", "ws://127.0.0.1:8080/ws");
            guard.set(var, value);

            let result = validate_client_env();
            assert!(result.is_err(), "Expected {}={} to be invalid", var, value);
        }
    }
}
