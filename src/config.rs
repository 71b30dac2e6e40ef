//! Service configuration
//!
//! Loaded once from the environment at startup and handed to the components
//! that need it. Nothing here is global.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::worker::WorkerCommand;

/// Default worker deadline (120s)
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_WORKER_PROGRAM: &str = "python3";
const DEFAULT_WORKER_ARGS: &str = "../query/query.py";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Worker command line
    pub command: WorkerCommand,
    /// Deadline for a single invocation
    pub timeout: Duration,
    /// Maximum number of workers alive at once (None = unbounded)
    pub max_concurrency: Option<usize>,
}

impl GatewayConfig {
    pub fn new(command: WorkerCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            max_concurrency: None,
        }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Timeout in milliseconds, as reported to HTTP callers
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    /// Allowed browser origin for CORS (None disables the layer)
    pub cors_origin: Option<String>,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT: {}", v))?,
            Err(_) => DEFAULT_PORT,
        };

        let jwt_secret = jwt_secret_from_env()?;

        let cors_origin = std::env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty());

        let timeout_ms = match std::env::var("QUERY_TIMEOUT") {
            Ok(v) => parse_timeout_ms(&v)?,
            Err(_) => DEFAULT_QUERY_TIMEOUT_MS,
        };

        let program = std::env::var("SEARCH_WORKER_PROGRAM")
            .unwrap_or_else(|_| DEFAULT_WORKER_PROGRAM.into());
        let args =
            std::env::var("SEARCH_WORKER_ARGS").unwrap_or_else(|_| DEFAULT_WORKER_ARGS.into());
        let mut command = WorkerCommand::new(program).with_args(args.split_whitespace());
        if let Ok(dir) = std::env::var("SEARCH_WORKER_DIR") {
            command = command.with_work_dir(PathBuf::from(dir));
        }
        if let Ok(raw) = std::env::var("SEARCH_WORKER_ENV") {
            for (key, value) in parse_worker_env(&raw)? {
                command = command.with_env(key, value);
            }
        }

        let mut gateway = GatewayConfig::new(command, Duration::from_millis(timeout_ms));
        if let Ok(v) = std::env::var("SEARCH_WORKER_MAX_CONCURRENCY") {
            let limit = v
                .parse::<usize>()
                .with_context(|| format!("Invalid SEARCH_WORKER_MAX_CONCURRENCY: {}", v))?;
            if limit == 0 {
                anyhow::bail!("SEARCH_WORKER_MAX_CONCURRENCY must be at least 1");
            }
            gateway = gateway.with_max_concurrency(limit);
        }

        info!(
            "Worker: {:?}, timeout={}ms, max_concurrency={:?}",
            gateway.command.to_vec(),
            timeout_ms,
            gateway.max_concurrency
        );

        Ok(Self {
            port,
            jwt_secret,
            cors_origin,
            gateway,
        })
    }
}

/// Read the shared token secret. Required, never empty.
pub fn jwt_secret_from_env() -> Result<String> {
    let secret = std::env::var("JWT_SECRET")
        .context("JWT_SECRET is not defined in environment variables")?;
    if secret.is_empty() {
        anyhow::bail!("JWT_SECRET must not be empty");
    }
    Ok(secret)
}

/// Parse whitespace-separated `KEY=VALUE` pairs for the worker environment
fn parse_worker_env(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split_whitespace()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => anyhow::bail!("Invalid SEARCH_WORKER_ENV entry: {}", pair),
        })
        .collect()
}

fn parse_timeout_ms(raw: &str) -> Result<u64> {
    let ms = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid QUERY_TIMEOUT: {}", raw))?;
    if ms == 0 {
        anyhow::bail!("QUERY_TIMEOUT must be greater than zero");
    }
    Ok(ms)
}
