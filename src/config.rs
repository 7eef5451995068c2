//! Environment-driven configuration.

use crate::lock::LockName;
use crate::postgres;
use crate::ttl::DEFAULT_TTL_FUNCTION_NAME;

/// Default lock name under which scheduler instances elect a leader.
pub const DEFAULT_LOCK_NAME: &str = "pgbeat-scheduler";

/// Top-level configuration loaded from environment variables.
///
/// Components can also be configured programmatically through their own
/// config structs; this is the convenience path for services that wire
/// everything from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Upper bound on concurrently executing in-process job bodies.
    pub scheduler_workers: usize,

    /// Lock name used for leader election.
    pub lock_name: LockName,

    /// Name of the PL/pgSQL function installed for TTL deletes.
    pub ttl_function_name: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let scheduler_workers: usize = std::env::var("PGBEAT_SCHEDULER_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(num_cpus::get)
            .max(1);

        let lock_name = LockName::new(
            std::env::var("PGBEAT_LOCK_NAME").unwrap_or_else(|_| DEFAULT_LOCK_NAME.to_string()),
        );

        let ttl_function_name = std::env::var("PGBEAT_TTL_FUNCTION_NAME")
            .unwrap_or_else(|_| DEFAULT_TTL_FUNCTION_NAME.to_string());
        if !postgres::is_valid_function_name(&ttl_function_name) {
            anyhow::bail!("PGBEAT_TTL_FUNCTION_NAME is not a valid function name: '{ttl_function_name}'");
        }

        Ok(Self {
            database_url,
            scheduler_workers,
            lock_name,
            ttl_function_name,
        })
    }
}
