mod ai;
mod config;
mod context;
mod diff;
mod error;
mod pipeline;
mod poster;
mod routes;
mod storage;
mod vault;

use axum::{
    extract::FromRef,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ai::AiClient;
use commitcast_queue::WorkQueue;
use config::AppConfig;
use context::ContextBuilder;
use diff::DiffFetcher;
use pipeline::Pipeline;
use poster::Poster;
use storage::Db;
use vault::Vault;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub queue: WorkQueue<Db, Pipeline>,
    pub vault: Vault,
    pub context: ContextBuilder,
    pub http: reqwest::Client,
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commitcast_server=info,tower_http=info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("data directory: {}", config.data_dir.display());

    let db = storage::init_db(&config.data_dir)?;
    tracing::info!("database initialized");

    let vault = Vault::new(Some(db.clone()), &config.data_dir);

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let pipeline = Pipeline {
        db: db.clone(),
        vault: vault.clone(),
        ai: AiClient::new(
            http.clone(),
            config.ai_base_url.clone(),
            config.ai_api_key.clone(),
            config.ai_model.clone(),
        ),
        diff: DiffFetcher::new(http.clone(), config.codehost_api_base.clone()),
        poster: Poster::new(http.clone(), config.socialnet_api_base.clone()),
        config: config.clone(),
        http: http.clone(),
    };

    // Interrupted `processing` rows are reset to `pending` inside new().
    let queue = WorkQueue::new(db.clone(), pipeline, config.queue.clone())?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    {
        let queue = queue.clone();
        tokio::spawn(async move { queue.run(shutdown_rx).await });
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let state = AppState {
        context: ContextBuilder::new(http.clone(), config.codehost_api_base.clone()),
        db,
        queue,
        vault,
        http,
        config: config.clone(),
    };

    let app = Router::new()
        .route("/health", get(routes::health::health))
        // Webhook ingress
        .route("/webhook/codehost", post(routes::webhook::receive))
        // OAuth
        .route("/auth/codehost", get(routes::oauth::codehost_start))
        .route(
            "/auth/codehost/callback",
            get(routes::oauth::codehost_callback),
        )
        .route("/auth/socialnet", get(routes::oauth::socialnet_start))
        .route(
            "/auth/socialnet/callback",
            get(routes::oauth::socialnet_callback),
        )
        // Admin
        .route("/admin/queue", get(routes::admin::queue_stats))
        .route(
            "/admin/tenants/{id}/quota",
            get(routes::admin::tenant_quota),
        )
        .route(
            "/admin/tenants/{id}/repos",
            get(routes::admin::tenant_repos),
        )
        .route("/admin/repos", post(routes::admin::upsert_repo))
        .route("/admin/og-post", put(routes::admin::set_og_post))
        .route(
            "/admin/credentials/{provider}/{subject}",
            delete(routes::admin::delete_credential),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("listening on port {}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
