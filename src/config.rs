use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr};

/// Where cached objects live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// SQLite metadata plus payload files under `storage_dir`.
    Disk,
    /// Process-local map. Nothing survives a restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend `{}` (expected `disk` or `memory`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StorageBackend,
    pub storage_dir: String,
    pub database_url: String,
    pub list_page_size: usize,
    pub public_base_url: String,
    pub gemini_base_url: String,
    pub replicate_base_url: String,
    pub stream_passthrough: bool,
    pub ai_base_url: String,
    pub ai_gateway_base_url: String,
    pub ai_account_id: String,
    pub ai_api_token: String,
    pub ai_gateway_id: Option<String>,
    pub auth_guid: Option<String>,
    pub origin_timeout_secs: u64,
}

// Credentials stay out of the startup log.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("list_page_size", &self.list_page_size)
            .field("public_base_url", &self.public_base_url)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("replicate_base_url", &self.replicate_base_url)
            .field("stream_passthrough", &self.stream_passthrough)
            .field("ai_base_url", &self.ai_base_url)
            .field("ai_gateway_base_url", &self.ai_gateway_base_url)
            .field("ai_account_id", &self.ai_account_id)
            .field("ai_api_token", &redacted(&self.ai_api_token))
            .field("ai_gateway_id", &self.ai_gateway_id)
            .field("auth_guid", &self.auth_guid.as_ref().map(|_| "<redacted>"))
            .field("origin_timeout_secs", &self.origin_timeout_secs)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Cache-aside media proxy")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_CACHE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_CACHE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend, `disk` or `memory` (overrides MEDIA_CACHE_BACKEND)
    #[arg(long)]
    pub backend: Option<String>,

    /// Directory where payloads are stored (overrides MEDIA_CACHE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_CACHE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Objects per listing page (overrides MEDIA_CACHE_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// Base URL prefixed to keys in `/api/media` (overrides MEDIA_CACHE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Stream proxy misses to the client while they are stored
    /// (overrides MEDIA_CACHE_STREAM_PASSTHROUGH)
    #[arg(long)]
    pub stream_passthrough: Option<bool>,

    /// Upstream request timeout in seconds (overrides MEDIA_CACHE_ORIGIN_TIMEOUT_SECS)
    #[arg(long)]
    pub origin_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed CLI args over the environment. CLI wins.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env_or("MEDIA_CACHE_HOST", "0.0.0.0");
        let env_port = env_parse("MEDIA_CACHE_PORT", 3000u16)?;
        let backend = match args.backend {
            Some(value) => value.parse()?,
            None => env_parse("MEDIA_CACHE_BACKEND", StorageBackend::Disk)?,
        };
        let env_storage = env_or("MEDIA_CACHE_STORAGE_DIR", "./data/objects");
        let env_db = env_or(
            "MEDIA_CACHE_DATABASE_URL",
            "sqlite://./data/meta/media_cache.db",
        );
        let env_page_size = env_parse("MEDIA_CACHE_LIST_PAGE_SIZE", 1000usize)?;
        let env_public = env_or("MEDIA_CACHE_PUBLIC_BASE_URL", "http://localhost:3000/media");
        let env_passthrough = env_parse("MEDIA_CACHE_STREAM_PASSTHROUGH", true)?;
        let env_timeout = env_parse("MEDIA_CACHE_ORIGIN_TIMEOUT_SECS", 300u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            list_page_size: args.list_page_size.unwrap_or(env_page_size),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            gemini_base_url: env_or(
                "MEDIA_CACHE_GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            replicate_base_url: env_or(
                "MEDIA_CACHE_REPLICATE_BASE_URL",
                "https://replicate.delivery",
            ),
            stream_passthrough: args.stream_passthrough.unwrap_or(env_passthrough),
            ai_base_url: env_or(
                "MEDIA_CACHE_AI_BASE_URL",
                "https://api.cloudflare.com/client/v4",
            ),
            ai_gateway_base_url: env_or(
                "MEDIA_CACHE_AI_GATEWAY_BASE_URL",
                "https://gateway.ai.cloudflare.com/v1",
            ),
            ai_account_id: env_or("MEDIA_CACHE_AI_ACCOUNT_ID", ""),
            ai_api_token: env_or("MEDIA_CACHE_AI_API_TOKEN", ""),
            ai_gateway_id: env_opt("MEDIA_CACHE_AI_GATEWAY_ID"),
            auth_guid: env_opt("MEDIA_CACHE_AUTH_GUID"),
            origin_timeout_secs: args.origin_timeout_secs.unwrap_or(env_timeout),
        };

        if cfg.list_page_size == 0 {
            bail!("list page size must be at least 1");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

/// Unset and blank both read as `None`.
fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win() {
        let args = Args::parse_from([
            "media-cache-proxy",
            "--host",
            "127.0.0.1",
            "--port",
            "8081",
            "--backend",
            "memory",
            "--list-page-size",
            "25",
            "--stream-passthrough",
            "false",
        ]);
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8081");
        assert_eq!(cfg.backend, StorageBackend::Memory);
        assert_eq!(cfg.list_page_size, 25);
        assert!(!cfg.stream_passthrough);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let args = Args::parse_from(["media-cache-proxy", "--list-page-size", "0"]);
        assert!(AppConfig::from_args(args).is_err());
    }

    #[test]
    fn backend_names() {
        assert_eq!("Disk".parse::<StorageBackend>().unwrap(), StorageBackend::Disk);
        assert_eq!(" memory ".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let args = Args::parse_from(["media-cache-proxy", "--backend", "memory"]);
        let mut cfg = AppConfig::from_args(args).unwrap();
        cfg.ai_api_token = "tok-123".into();
        cfg.auth_guid = Some("guid-456".into());
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("tok-123"));
        assert!(!printed.contains("guid-456"));
    }
}
