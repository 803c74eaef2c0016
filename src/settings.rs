// ABOUTME: Environment-driven service settings with documented defaults.
// ABOUTME: Parsed once at startup; the encryption key is validated eagerly.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::types::ImageRef;

/// Fixed port the agent process listens on inside every container.
pub const DEFAULT_AGENT_INTERNAL_PORT: u16 = 18789;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Host port allocation range, inclusive.
    pub min_agent_port: u16,
    pub max_agent_port: u16,
    /// The agent's fixed in-container port.
    pub agent_internal_port: u16,
    pub agent_memory_limit: u64,
    pub agent_cpu_nano: u64,
    pub agent_max_restarts: u32,
    pub health_check_timeout: Duration,
    pub health_check_interval: Duration,
    pub max_running_agents: usize,
    pub max_deployments: usize,
    pub idle_timeout: Duration,
    pub container_prefix: String,
    pub data_path: PathBuf,
    pub agent_image: ImageRef,
    pub domain: String,
    /// 64 hex characters; materialized into the secret box at startup.
    pub encryption_key: String,
    pub reminder_days: i64,
    pub subscription_days: i64,
    pub allow_plaintext_secrets: bool,
    pub touch_throttle: Duration,
    pub reaper_interval: Duration,
    pub proxy_listen: SocketAddr,
    pub docker_socket: Option<String>,
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T, Error> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{name}={raw}"))),
        Err(_) => Ok(default),
    }
}

fn string_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    /// Load from the process environment, applying defaults.
    pub fn from_env() -> Result<Self, Error> {
        let encryption_key =
            env::var("ENCRYPTION_KEY").map_err(|_| Error::MissingEnvVar("ENCRYPTION_KEY".into()))?;
        if encryption_key.len() != 64 || !encryption_key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidConfig(
                "ENCRYPTION_KEY must be 64 hex characters".into(),
            ));
        }

        let agent_image = ImageRef::parse(&string_or("AGENT_IMAGE", "openclaw/agent:latest"))
            .map_err(|e| Error::InvalidConfig(format!("AGENT_IMAGE: {e}")))?;

        let settings = Self {
            min_agent_port: parsed("MIN_AGENT_PORT", 20000)?,
            max_agent_port: parsed("MAX_AGENT_PORT", 30000)?,
            agent_internal_port: parsed("AGENT_INTERNAL_PORT", DEFAULT_AGENT_INTERNAL_PORT)?,
            agent_memory_limit: parsed("AGENT_MEMORY_LIMIT", 768 * 1024 * 1024)?,
            agent_cpu_nano: parsed("AGENT_CPU_NANO", 750_000_000)?,
            agent_max_restarts: parsed("AGENT_MAX_RESTARTS", 3)?,
            health_check_timeout: Duration::from_millis(parsed("HEALTH_CHECK_TIMEOUT", 120_000)?),
            health_check_interval: Duration::from_millis(parsed("HEALTH_CHECK_INTERVAL", 2_000)?),
            max_running_agents: parsed("MAX_RUNNING_AGENTS", 6)?,
            max_deployments: parsed("MAX_DEPLOYMENTS", 50)?,
            idle_timeout: Duration::from_secs(parsed("IDLE_TIMEOUT_MINUTES", 10u64)? * 60),
            container_prefix: string_or("CONTAINER_PREFIX", "apiary-agent-"),
            data_path: PathBuf::from(string_or("DATA_PATH", "/var/lib/apiary")),
            agent_image,
            domain: string_or("DOMAIN", "localhost"),
            encryption_key,
            reminder_days: parsed("REMINDER_DAYS", 3)?,
            subscription_days: parsed("SUBSCRIPTION_DAYS", 30)?,
            allow_plaintext_secrets: parsed("ALLOW_PLAINTEXT_SECRETS", false)?,
            touch_throttle: Duration::from_millis(parsed("TOUCH_THROTTLE_MS", 60_000)?),
            reaper_interval: Duration::from_secs(parsed("REAPER_INTERVAL_SECS", 120)?),
            proxy_listen: parsed("PROXY_LISTEN", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            docker_socket: env::var("DOCKER_SOCKET").ok(),
        };

        if settings.min_agent_port > settings.max_agent_port {
            return Err(Error::InvalidConfig(
                "MIN_AGENT_PORT must not exceed MAX_AGENT_PORT".into(),
            ));
        }

        Ok(settings)
    }
}
