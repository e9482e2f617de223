use anyhow::Result;
use axum::Router;
use image_catalog::{
    cache::{self, ImageCache, MemoryImageCache, SqliteImageCache},
    config::{AppConfig, CacheBackend},
    db, routes,
    services::{
        catalog_service::CatalogService, description::MockDescriptionGenerator,
        metadata_store::SqliteMetadataStore, object_store::FilesystemObjectStore,
    },
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-catalog with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite metadata store ---
    let meta_db = Arc::new(db::connect(&cfg.database_url, 5).await?);
    db::run_migrations(&meta_db).await?;

    // --- Handle migration mode ---
    if migrate {
        if cfg.cache_backend == CacheBackend::Sqlite {
            let cache_db = db::connect(&cfg.cache_database_url, 1).await?;
            db::run_cache_migrations(&cache_db).await?;
            cache_db.close().await;
        }
        tracing::info!("Database migration complete.");
        meta_db.close().await;
        return Ok(()); // exit after migration
    }

    // --- Initialize image list cache ---
    let cache_db = match cfg.cache_backend {
        CacheBackend::Memory => None,
        CacheBackend::Sqlite => {
            let cache_db = Arc::new(db::connect(&cfg.cache_database_url, 5).await?);
            db::run_cache_migrations(&cache_db).await?;
            Some(cache_db)
        }
    };
    let image_cache: Arc<dyn ImageCache> = match &cache_db {
        Some(pool) => Arc::new(SqliteImageCache::new(pool.clone())),
        None => Arc::new(MemoryImageCache::new()),
    };
    tracing::info!("Image list cache backend: {:?}", cfg.cache_backend);

    let sweeper = (cfg.cache_sweep_secs > 0).then(|| {
        cache::spawn_sweeper(
            image_cache.clone(),
            Duration::from_secs(cfg.cache_sweep_secs),
        )
    });

    // --- Initialize core service ---
    let service = CatalogService::new(
        Arc::new(SqliteMetadataStore::new(meta_db.clone())),
        Arc::new(FilesystemObjectStore::new(
            cfg.storage_dir.clone(),
            cfg.public_base_url.clone(),
        )),
        Arc::new(MockDescriptionGenerator),
        image_cache,
    )
    .with_cache_ttl(cfg.cache_ttl())
    .with_timeout(cfg.collaborator_timeout());

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(service);

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
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Tear down collaborators ---
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Some(cache_db) = cache_db {
        cache_db.close().await;
    }
    meta_db.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
