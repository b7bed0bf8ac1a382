//! KDL configuration parsing for hostit.
//!
//! Both binaries read a single `hostit.kdl` file. Every section is optional
//! and falls back to development defaults; selected values can be overridden
//! from the environment.

pub mod error;
mod kdl_ext;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    BackendsConfig, CallbackConfig, DatabaseConfig, JobsConfig, LogConfig, ReconcileConfig,
    RedisConfig, RegistryConfig, RouterConfig, ServerConfig, SystemConfig, WebhookConfig,
    load_config, parse_system_config,
};
