use anyhow::Result;
use axum::Router;
use config::{AppConfig, StorageBackend};
use services::{
    cache_service::MediaCacheService,
    disk_store::DiskObjectStore,
    lister::Lister,
    object_store::{InMemoryObjectStore, ObjectStore},
    origins::{
        ClientSuppliedOrigin, GenerativeModelOrigin, RemoteFetchOrigin, WorkersAiRunner,
        model_runner::AiGateway,
    },
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

/// Seconds an AI gateway may serve a cached model response.
const AI_GATEWAY_CACHE_TTL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-cache-proxy with config: {:?}", cfg);

    // --- Initialize object store ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        StorageBackend::Disk => {
            let disk = open_disk_store(&cfg).await?;
            if migrate {
                disk.migrate().await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(disk)
        }
        StorageBackend::Memory => {
            if migrate {
                tracing::warn!("--migrate has nothing to do for the memory backend");
                return Ok(());
            }
            tracing::warn!("Using in-memory storage; cached media is lost on restart");
            Arc::new(InMemoryObjectStore::new(cfg.list_page_size))
        }
    };

    // --- Origins ---
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.origin_timeout_secs))
        .build()?;

    let gateway = cfg.ai_gateway_id.clone().map(|id| AiGateway {
        base_url: cfg.ai_gateway_base_url.clone(),
        id,
        cache_ttl_secs: AI_GATEWAY_CACHE_TTL_SECS,
    });
    if cfg.ai_account_id.is_empty() || cfg.ai_api_token.is_empty() {
        tracing::warn!("Workers AI credentials are not set; generation routes will fail");
    }
    if cfg.auth_guid.is_none() {
        tracing::warn!("MEDIA_CACHE_AUTH_GUID is not set; text-to-image routes will answer 401");
    }
    let runner = WorkersAiRunner::new(
        client.clone(),
        cfg.ai_base_url.clone(),
        cfg.ai_account_id.clone(),
        cfg.ai_api_token.clone(),
        gateway,
    );

    let state = state::AppState {
        cache: MediaCacheService::new(store.clone()),
        lister: Lister::new(store, cfg.public_base_url.clone()),
        remote: RemoteFetchOrigin::new(
            client,
            cfg.gemini_base_url.clone(),
            cfg.replicate_base_url.clone(),
            cfg.stream_passthrough,
        ),
        generative: GenerativeModelOrigin::new(Arc::new(runner)),
        uploads: ClientSuppliedOrigin::new(),
        auth_guid: cfg.auth_guid.as_deref().map(Arc::from),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Prepare directories, connect to SQLite and wrap both in a disk store.
async fn open_disk_store(cfg: &AppConfig) -> Result<DiskObjectStore> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);

    // Create parent directory if needed
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the database file on its own
    if !db_path_obj.exists() {
        fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(db_path_obj)?;
        tracing::info!("Created database file {}", db_path);
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    Ok(DiskObjectStore::new(db, &cfg.storage_dir, cfg.list_page_size))
}
