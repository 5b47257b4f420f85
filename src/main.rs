use anyhow::{Context, Result};
use signed_object_store::{
    Gateway, app, config::AppConfig, services::storage_service::StorageService,
};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting signed-object-store with config: {:?}", cfg);

    let secret = cfg
        .storage
        .hash_secret
        .clone()
        .context("a hash secret is required (FS_HASH_SECRET or --hash-secret)")?;

    // --- Ensure storage directories exist ---
    let store = StorageService::new(
        cfg.storage.base_path.clone(),
        cfg.storage.meta_path.clone(),
        cfg.storage.tmp_path.clone(),
    );
    store
        .ensure_roots()
        .await
        .context("creating storage directories")?;
    for (name, root) in store.roots() {
        tracing::debug!("{} directory => {}", name, root.display());
    }

    // --- Build router ---
    let app = app(Gateway::new(store, secret));

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
    if let Some(public_url) = &cfg.storage.public_url {
        tracing::info!("Signed URLs are expected under {}", public_url);
    }
    axum::serve(listener, app).await?;

    Ok(())
}
