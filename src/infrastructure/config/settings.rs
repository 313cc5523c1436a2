use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::pool::PoolConfig;
use crate::resilience::{BackoffConfig, CircuitBreakerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    /// Pool defaults applied to every backend without its own `pool` section
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub sqlserver: Option<SqlServerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under `/uploads`
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    /// Per-backend acquire timeout used by the readiness probe
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
}

/// Pool bounds and timeouts as they appear in config files.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub min_idle: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_liveness_threshold_secs")]
    pub liveness_threshold_secs: u64,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_reset_timeout_ms")]
    pub circuit_reset_timeout_ms: u64,
    /// How often idle sessions are reaped and `min_idle` is restored
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub pool: Option<PoolSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlServerConfig {
    /// Full ODBC connection string; when set, the discrete fields are ignored
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default = "default_odbc_driver")]
    pub driver: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Extra `KEY=value;` attributes appended to the generated string
    #[serde(default)]
    pub extra_attributes: Option<String>,
    #[serde(default)]
    pub pool: Option<PoolSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_readiness_timeout_ms() -> u64 {
    2_000
}

fn default_max_size() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_liveness_threshold_secs() -> u64 {
    30
}

fn default_max_lifetime_secs() -> u64 {
    1_800 // 30 minutes
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    50
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout_ms() -> u64 {
    30_000
}

fn default_maintenance_interval_secs() -> u64 {
    30
}

fn default_odbc_driver() -> String {
    "ODBC Driver 17 for SQL Server".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "sqlbridge".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, POSTGRES__URL, SQLSERVER__SERVER, POOL__MAX_SIZE, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        if env::var("POSTGRES__URL").is_err() {
            if let Ok(url) = env::var("DATABASE_URL") {
                builder = builder.set_default("postgres.url", url)?;
            }
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("server.readiness_timeout_ms", self.server.readiness_timeout_ms)?;
        self.pool.validate("pool")?;
        if let Some(pg) = &self.postgres {
            if pg.url.trim().is_empty() {
                return Err(ConfigError::Message("postgres.url must not be empty".into()));
            }
            self.postgres_pool().validate("postgres.pool")?;
        }
        if let Some(mssql) = &self.sqlserver {
            if mssql.connection_string.is_none() && mssql.server.trim().is_empty() {
                return Err(ConfigError::Message(
                    "sqlserver.server or sqlserver.connection_string must be set".into(),
                ));
            }
            self.sqlserver_pool().validate("sqlserver.pool")?;
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn postgres_pool(&self) -> &PoolSettings {
        self.postgres
            .as_ref()
            .and_then(|pg| pg.pool.as_ref())
            .unwrap_or(&self.pool)
    }

    pub fn sqlserver_pool(&self) -> &PoolSettings {
        self.sqlserver
            .as_ref()
            .and_then(|mssql| mssql.pool.as_ref())
            .unwrap_or(&self.pool)
    }

    pub fn is_json_logging(&self) -> bool {
        self.logging.format.eq_ignore_ascii_case("json")
    }
}

impl PoolSettings {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Message(format!("{section}.max_size must be at least 1")));
        }
        if self.min_idle > self.max_size {
            return Err(ConfigError::Message(format!(
                "{section}.min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigError::Message(format!(
                "{section}.acquire_timeout_ms must be greater than zero"
            )));
        }
        check_timeout(&format!("{section}.acquire_timeout_ms"), self.acquire_timeout_ms)?;
        check_timeout(&format!("{section}.connect_timeout_ms"), self.connect_timeout_ms)?;
        check_timeout(&format!("{section}.retry_max_delay_ms"), self.retry_max_delay_ms)?;
        Ok(())
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

/// Longest wait any timeout setting may ask for (one hour)
const MAX_TIMEOUT_MS: u64 = 3_600_000;

fn check_timeout(key: &str, value_ms: u64) -> Result<(), ConfigError> {
    if value_ms > MAX_TIMEOUT_MS {
        return Err(ConfigError::Message(format!(
            "{key} ({value_ms}) exceeds the maximum of {MAX_TIMEOUT_MS}ms"
        )));
    }
    Ok(())
}

impl From<&PoolSettings> for PoolConfig {
    fn from(s: &PoolSettings) -> Self {
        PoolConfig {
            max_size: s.max_size,
            min_idle: s.min_idle,
            acquire_timeout: Duration::from_millis(s.acquire_timeout_ms),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            idle_timeout: Duration::from_secs(s.idle_timeout_secs),
            liveness_threshold: Duration::from_secs(s.liveness_threshold_secs),
            max_lifetime: Duration::from_secs(s.max_lifetime_secs),
            connect_retries: s.connect_retries,
            backoff: BackoffConfig {
                initial_delay_ms: s.retry_initial_delay_ms,
                max_delay_ms: s.retry_max_delay_ms,
                ..BackoffConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: s.circuit_failure_threshold,
                reset_timeout_ms: s.circuit_reset_timeout_ms,
                ..CircuitBreakerConfig::default()
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            uploads_dir: default_uploads_dir(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_idle: 0,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            liveness_threshold_secs: default_liveness_threshold_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            connect_retries: default_connect_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_timeout_ms: default_circuit_reset_timeout_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
