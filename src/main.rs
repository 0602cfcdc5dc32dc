use connector_http_client::{
    config::Config,
    infra::InMemoryDocumentStore,
    policy::{Blocklist, ProxySelector},
    routes, Authentication, HttpExecutor,
};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connector_http_client=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let executor = HttpExecutor::new(
        Blocklist::from_env(),
        ProxySelector::from_env()?,
        Authentication::None,
        config.http.clone(),
    )?
    .with_document_store(Arc::new(InMemoryDocumentStore::new()));

    tracing::info!(
        max_body_size = config.http.max_body_size,
        "Starting connector HTTP client on port {}",
        config.port
    );

    let app = routes::router(Arc::new(executor)).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
