use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::cache::DEFAULT_TTL_SECS;

/// Which backing store holds the per-user image list cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    /// Process-local concurrent map. Lost on restart.
    Memory,
    /// Separate SQLite database shared by every process pointed at it.
    Sqlite,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_base_url: String,
    pub cache_backend: CacheBackend,
    pub cache_database_url: String,
    pub cache_ttl_secs: u64,
    pub cache_sweep_secs: u64,
    pub collaborator_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "User image catalog API")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_CATALOG_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_CATALOG_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image blobs are stored (overrides IMAGE_CATALOG_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides IMAGE_CATALOG_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL prefixed to blob keys in upload responses (overrides IMAGE_CATALOG_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Image list cache backend (overrides IMAGE_CATALOG_CACHE_BACKEND)
    #[arg(long, value_enum)]
    pub cache_backend: Option<CacheBackend>,

    /// Cache database URL, used by the sqlite backend (overrides IMAGE_CATALOG_CACHE_DATABASE_URL)
    #[arg(long)]
    pub cache_database_url: Option<String>,

    /// Cached image list lifetime in seconds (overrides IMAGE_CATALOG_CACHE_TTL_SECS)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Expired cache entry sweep interval, 0 disables (overrides IMAGE_CATALOG_CACHE_SWEEP_SECS)
    #[arg(long)]
    pub cache_sweep_secs: Option<u64>,

    /// Upper bound for each store call (overrides IMAGE_CATALOG_COLLABORATOR_TIMEOUT_SECS)
    #[arg(long)]
    pub collaborator_timeout_secs: Option<u64>,

    /// Maximum accepted upload body size (overrides IMAGE_CATALOG_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, &|name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI overrides on top of environment values (read through `lookup`)
    /// and built-in defaults.
    fn merge(
        args: Args,
        lookup: &dyn Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = lookup("IMAGE_CATALOG_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env(lookup, "IMAGE_CATALOG_PORT", 3000u16)?;
        let env_storage =
            lookup("IMAGE_CATALOG_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = lookup("IMAGE_CATALOG_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/catalog.db".into());
        let env_public = lookup("IMAGE_CATALOG_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", args.port.unwrap_or(env_port)));
        let env_backend = match lookup("IMAGE_CATALOG_CACHE_BACKEND") {
            Ok(value) => <CacheBackend as ValueEnum>::from_str(&value, true).map_err(|err| {
                anyhow::anyhow!("parsing IMAGE_CATALOG_CACHE_BACKEND value `{}`: {}", value, err)
            })?,
            Err(_) => CacheBackend::Memory,
        };
        let env_cache_db = lookup("IMAGE_CATALOG_CACHE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/cache/image_cache.db".into());
        let env_ttl = parse_env(lookup, "IMAGE_CATALOG_CACHE_TTL_SECS", DEFAULT_TTL_SECS)?;
        let env_sweep = parse_env(lookup, "IMAGE_CATALOG_CACHE_SWEEP_SECS", 300u64)?;
        let env_timeout = parse_env(lookup, "IMAGE_CATALOG_COLLABORATOR_TIMEOUT_SECS", 10u64)?;
        let env_max_upload =
            parse_env(lookup, "IMAGE_CATALOG_MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            cache_backend: args.cache_backend.unwrap_or(env_backend),
            cache_database_url: args.cache_database_url.unwrap_or(env_cache_db),
            cache_ttl_secs: args.cache_ttl_secs.unwrap_or(env_ttl),
            cache_sweep_secs: args.cache_sweep_secs.unwrap_or(env_sweep),
            collaborator_timeout_secs: args.collaborator_timeout_secs.unwrap_or(env_timeout),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        if cfg.cache_ttl_secs == 0 {
            anyhow::bail!("cache ttl must be at least one second");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

fn parse_env<T>(
    lookup: &dyn Fn(&str) -> Result<String, env::VarError>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
