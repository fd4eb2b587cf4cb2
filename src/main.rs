use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use compliance_docs::auth::jwt::JwtService;
use compliance_docs::config::AppConfig;
use compliance_docs::db;
use compliance_docs::routes;
use compliance_docs::s3::build_storage;
use compliance_docs::service::DocumentService;
use compliance_docs::state::AppState;
use compliance_docs::store::PgDocumentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        storage_configured = config.storage_settings().is_some(),
        s3_bucket = config.s3_bucket.as_deref().unwrap_or("-"),
        "loaded backend configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || db::run_migrations(&pool)).await??;
    }

    let storage = build_storage(&config).await;
    let store = Arc::new(PgDocumentStore::new(pool));
    let documents = DocumentService::new(storage, store);
    let jwt = JwtService::from_config(&config)?;

    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let state = AppState::new(config, documents, jwt);
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("server received shutdown signal");
        })
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
