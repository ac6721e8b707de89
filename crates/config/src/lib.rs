use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "agora.toml",
    "config/agora.toml",
    "crates/config/agora.toml",
    "../agora.toml",
    "../config/agora.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://agora.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Token validation settings used when a WebSocket connection is accepted.
///
/// Tokens are HS256 JWTs; issuing them is the job of the account service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            issuer: "agora".to_string(),
            audience: "agora-users".to_string(),
        }
    }
}

/// Tuning knobs for the message relay.
///
/// ```
/// use agora_config::RelayConfig;
///
/// let relay = RelayConfig::default();
/// assert_eq!(relay.outbound_queue_capacity, 256);
/// assert_eq!(relay.keepalive_interval().as_secs(), 54);
/// assert!(relay.pong_wait() > relay.keepalive_interval());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "RelayConfig::default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "RelayConfig::default_control_queue_capacity")]
    pub control_queue_capacity: usize,
    #[serde(default = "RelayConfig::default_broadcast_queue_capacity")]
    pub broadcast_queue_capacity: usize,
    #[serde(default = "RelayConfig::default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    #[serde(default = "RelayConfig::default_pong_wait")]
    pub pong_wait_seconds: u64,
    #[serde(default = "RelayConfig::default_write_wait")]
    pub write_wait_seconds: u64,
    #[serde(default = "RelayConfig::default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    const fn default_outbound_queue_capacity() -> usize {
        256
    }

    const fn default_control_queue_capacity() -> usize {
        64
    }

    const fn default_broadcast_queue_capacity() -> usize {
        1024
    }

    const fn default_keepalive_interval() -> u64 {
        54
    }

    const fn default_pong_wait() -> u64 {
        60
    }

    const fn default_write_wait() -> u64 {
        10
    }

    const fn default_max_frame_bytes() -> usize {
        64 * 1024
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.outbound_queue_capacity == 0
            || self.control_queue_capacity == 0
            || self.broadcast_queue_capacity == 0
        {
            bail!("relay queue capacities must be greater than zero");
        }
        if self.keepalive_interval_seconds == 0 {
            bail!("relay.keepalive_interval_seconds must be greater than zero");
        }
        if self.pong_wait_seconds <= self.keepalive_interval_seconds {
            bail!(
                "relay.pong_wait_seconds ({}) must exceed relay.keepalive_interval_seconds ({})",
                self.pong_wait_seconds,
                self.keepalive_interval_seconds
            );
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: Self::default_outbound_queue_capacity(),
            control_queue_capacity: Self::default_control_queue_capacity(),
            broadcast_queue_capacity: Self::default_broadcast_queue_capacity(),
            keepalive_interval_seconds: Self::default_keepalive_interval(),
            pong_wait_seconds: Self::default_pong_wait(),
            write_wait_seconds: Self::default_write_wait(),
            max_frame_bytes: Self::default_max_frame_bytes(),
        }
    }
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use agora_config::load;
///
/// std::env::remove_var("AGORA_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();
    let relay = &defaults.relay;

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.jwt_secret", defaults.auth.jwt_secret.clone())?
        .set_default("auth.issuer", defaults.auth.issuer.clone())?
        .set_default("auth.audience", defaults.auth.audience.clone())?
        .set_default(
            "relay.outbound_queue_capacity",
            as_i64(relay.outbound_queue_capacity as u64),
        )?
        .set_default(
            "relay.control_queue_capacity",
            as_i64(relay.control_queue_capacity as u64),
        )?
        .set_default(
            "relay.broadcast_queue_capacity",
            as_i64(relay.broadcast_queue_capacity as u64),
        )?
        .set_default(
            "relay.keepalive_interval_seconds",
            as_i64(relay.keepalive_interval_seconds),
        )?
        .set_default("relay.pong_wait_seconds", as_i64(relay.pong_wait_seconds))?
        .set_default("relay.write_wait_seconds", as_i64(relay.write_wait_seconds))?
        .set_default("relay.max_frame_bytes", as_i64(relay.max_frame_bytes as u64))?;

    let environment_overrides = config::Environment::with_prefix("AGORA").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("AGORA_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via AGORA_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    config.relay.validate().context("invalid relay configuration")?;

    debug!(
        http = %format!("{}:{}", config.http.address, config.http.port),
        database = %config.database.url,
        relay = ?config.relay,
        "loaded backend configuration"
    );
    Ok(config)
}
