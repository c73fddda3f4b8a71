//! Command-line and environment configuration
//!
//! Every option can also be set through the environment (and therefore a
//! `.env` file). [`ServerConfig::from_cli`] validates the parsed arguments
//! into the settings the server starts with.

use clap::Parser;
use directories::ProjectDirs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{PolicyError, StalenessPolicy};
use crate::refresh::SweepConfig;

/// Cache directory used when no platform cache directory can be resolved
const FALLBACK_CACHE_DIR: &str = "data_cache";

/// Error types for configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TTL combination is not allowed
    #[error("invalid cache TTLs: {0}")]
    InvalidPolicy(#[from] PolicyError),

    /// The host is not an IP address
    #[error("Invalid host: '{0}'. Expected an IP address such as 127.0.0.1 or 0.0.0.0")]
    InvalidHost(String),

    /// An interval or timeout of zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Market-data dashboard backend
#[derive(Parser, Debug)]
#[command(name = "macrodash")]
#[command(about = "Serve macro, Treasury yield and Fed odds data from a self-refreshing cache")]
#[command(version)]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "MACRODASH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5001)]
    pub port: u16,

    /// Directory holding cached payloads [default: platform cache directory]
    #[arg(long, env = "MACRODASH_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// How long a payload stays fresh in memory, in seconds
    #[arg(long, env = "MACRODASH_MEMORY_TTL_SECS", default_value_t = 300)]
    pub memory_ttl_secs: u64,

    /// How long a payload on disk stays valid, in days
    #[arg(long, env = "MACRODASH_DISK_TTL_DAYS", default_value_t = 7)]
    pub disk_ttl_days: u64,

    /// Time between background sweeps, in seconds
    #[arg(long, env = "MACRODASH_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    pub sweep_interval_secs: u64,

    /// Time before retrying after a sweep with failures, in seconds
    #[arg(long, env = "MACRODASH_RETRY_INTERVAL_SECS", default_value_t = 300)]
    pub retry_interval_secs: u64,

    /// Disable the background sweep
    #[arg(long)]
    pub no_sweep: bool,

    /// Timeout for each upstream request, in seconds
    #[arg(long, env = "MACRODASH_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// FRED API key; FRED-backed series are skipped without it
    #[arg(long, env = "FRED_API_KEY", hide_env_values = true)]
    pub fred_api_key: Option<String>,

    /// JSON file with the current Fed odds, re-read on every request
    #[arg(long, env = "MACRODASH_FEDWATCH_SNAPSHOT", value_name = "FILE")]
    pub fedwatch_snapshot: Option<PathBuf>,

    /// Built dashboard to serve for non-API paths
    #[arg(long, env = "MACRODASH_STATIC_DIR", value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// Start serving without populating the caches first
    #[arg(long)]
    pub skip_warmup: bool,
}

/// Settings the server starts with
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub cache_dir: PathBuf,
    pub policy: StalenessPolicy,
    pub sweep: SweepConfig,
    pub fetch_timeout: Duration,
    pub fred_api_key: Option<String>,
    pub fedwatch_snapshot: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub warm_up: bool,
}

impl ServerConfig {
    /// Validates parsed CLI arguments into a server configuration
    ///
    /// # Returns
    /// * `Ok(ServerConfig)` with every default resolved
    /// * `Err(ConfigError)` if the host, a duration or the TTL combination
    ///   is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let ip: IpAddr = cli
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(cli.host.clone()))?;

        let policy = StalenessPolicy::new(
            Duration::from_secs(cli.memory_ttl_secs),
            Duration::from_secs(cli.disk_ttl_days.saturating_mul(24 * 60 * 60)),
        )?;

        let sweep = SweepConfig {
            interval: positive(cli.sweep_interval_secs, "sweep interval")?,
            retry_interval: positive(cli.retry_interval_secs, "retry interval")?,
            enabled: !cli.no_sweep,
        };

        Ok(ServerConfig {
            addr: SocketAddr::new(ip, cli.port),
            cache_dir: cli.cache_dir.clone().unwrap_or_else(default_cache_dir),
            policy,
            sweep,
            fetch_timeout: positive(cli.fetch_timeout_secs, "fetch timeout")?,
            fred_api_key: cli.fred_api_key.clone(),
            fedwatch_snapshot: cli.fedwatch_snapshot.clone(),
            static_dir: cli.static_dir.clone(),
            warm_up: !cli.skip_warmup,
        })
    }
}

fn positive(secs: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::ZeroDuration(name));
    }
    Ok(Duration::from_secs(secs))
}

/// Platform cache directory, e.g. `~/.cache/macrodash` on Linux
fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "macrodash")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_CACHE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    /// Parses `args` with every environment fallback switched off
    fn parse(args: &[&str]) -> Cli {
        let command = Cli::command().mut_args(|arg| arg.env(None::<&str>));
        let matches = command.try_get_matches_from(args).unwrap();
        Cli::from_arg_matches(&matches).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let cli = parse(&["macrodash"]);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 5001);
        assert!(cli.fred_api_key.is_none());
        assert!(cli.cache_dir.is_none());
        assert_eq!(cli.memory_ttl_secs, 300);
        assert_eq!(cli.disk_ttl_days, 7);
        assert!(!cli.no_sweep);
        assert!(!cli.skip_warmup);
    }

    #[test]
    fn test_server_config_from_defaults() {
        let cli = parse(&["macrodash"]);
        let config = ServerConfig::from_cli(&cli).unwrap();

        assert_eq!(config.addr, "127.0.0.1:5001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.policy.memory_ttl(), Duration::from_secs(300));
        assert_eq!(config.policy.disk_ttl(), Duration::from_secs(7 * 86400));
        assert_eq!(config.sweep.interval, Duration::from_secs(3600));
        assert!(config.sweep.enabled);
        assert!(config.warm_up);
    }

    #[test]
    fn test_server_config_custom_values() {
        let cli = parse(&[
            "macrodash",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--cache-dir",
            "/tmp/macrodash",
            "--no-sweep",
            "--skip-warmup",
            "--fetch-timeout-secs",
            "3",
        ]);
        let config = ServerConfig::from_cli(&cli).unwrap();

        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/macrodash"));
        assert!(!config.sweep.enabled);
        assert!(!config.warm_up);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_memory_ttl_longer_than_disk_ttl_is_rejected() {
        let cli = parse(&[
            "macrodash",
            "--memory-ttl-secs",
            "1000000",
            "--disk-ttl-days",
            "1",
        ]);
        let err = ServerConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy(_)));
        assert!(err.to_string().contains("TTL"));
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let cli = parse(&["macrodash", "--host", "not a host"]);
        let err = ServerConfig::from_cli(&cli).unwrap_err();
        assert!(err.to_string().contains("Invalid host"));
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let cli = parse(&["macrodash", "--sweep-interval-secs", "0"]);
        assert!(matches!(
            ServerConfig::from_cli(&cli),
            Err(ConfigError::ZeroDuration("sweep interval"))
        ));
    }

    #[test]
    fn test_options_fall_back_to_environment_names() {
        let command = Cli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|name| name.to_string_lossy().into_owned())
        };

        assert_eq!(env_of("port").as_deref(), Some("PORT"));
        assert_eq!(env_of("fred_api_key").as_deref(), Some("FRED_API_KEY"));
        assert_eq!(env_of("disk_ttl_days").as_deref(), Some("MACRODASH_DISK_TTL_DAYS"));
        assert!(env_of("no_sweep").is_none());
    }
}
