use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use service_reminder_api::config::Config;
use service_reminder_api::handlers::{self, AppState};
use service_reminder_api::pipeline::ReminderPipeline;

/// Main entry point for the application.
///
/// Initializes tracing and configuration, wires the reminder pipeline
/// (completion client, circuit breaker, persistence sink) and starts the
/// Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "service_reminder_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tokio::fs::create_dir_all(&config.mail_folder).await?;
    tracing::info!("Mail folder ready: {}", config.mail_folder.display());

    let pipeline = ReminderPipeline::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize reminder pipeline: {}", e))?;
    tracing::info!(
        "✓ Reminder pipeline initialized: {} ({}), {} sink",
        config.openai_base_url,
        config.openai_model,
        pipeline.sink_name()
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
    });

    // Configure rate limiter: 5 requests/second per IP, burst of 10
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let app = handlers::router(app_state)
        .layer(
            ServiceBuilder::new()
                // Uploads larger than the configured limit are rejected before parsing
                .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Governor needs the peer address to key requests
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
