//! Chatbox - local API for the tutoring chat widget
//!
//! Serves the widget's conversation history, forwards questions to the
//! answer service and exports transcripts.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatbox::config::{Config, StoreBackend};
use chatbox::core::{Session, SessionOptions};
use chatbox::providers::HttpAnswerService;
use chatbox::routes::{self, AppState};
use chatbox::store::{DocumentStore, FileStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatbox=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let widget = config.widget().context("Failed to load widget configuration")?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let store: Arc<dyn DocumentStore> = match config.store {
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::new(&config.data_dir.join("chatbox.db"))
                .await
                .context("Failed to open SQLite store")?,
        ),
        StoreBackend::Files => Arc::new(
            FileStore::new(config.data_dir.join("documents"))
                .await
                .context("Failed to open file store")?,
        ),
    };
    tracing::info!(backend = ?config.store, dir = %config.data_dir.display(), "Opened document store");

    let service = Arc::new(HttpAnswerService::new(&config.endpoint)?);
    let options = SessionOptions {
        export_dir: config.export_dir(),
        ..widget.session_options()
    };
    let mut session = Session::open(store, options).await?;
    session.refresh_avatars(service.as_ref()).await;
    let topics = session
        .refresh_topics(service.as_ref())
        .await
        .context("Failed to load topics")?;
    tracing::info!(count = topics.len(), "Topics ready");

    let state = AppState::new(session, service);

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(endpoint = %config.endpoint, "Chatbox API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
