mod settings;

pub use settings::{
    LoggingConfig, OtelConfig, PoolSettings, PostgresConfig, ServerConfig, Settings,
    SqlServerConfig,
};
