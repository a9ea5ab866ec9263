use anyhow::Context;
use axum::Extension;
use golclub_api::auth::AuthService;
use golclub_api::config::{init_tracing, load_config};
use golclub_api::db::{establish_connection_with_config, run_migrations, DbConfig};
use golclub_api::events::{event_channel, process_events};
use golclub_api::handlers::AppServices;
use golclub_api::services::notifications::ResendMailer;
use golclub_api::services::payments::MercadoPagoGateway;
use golclub_api::services::reconciliation;
use golclub_api::{app_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);
    info!(environment = %config.environment, "Starting golclub-api");

    let db = Arc::new(
        establish_connection_with_config(&DbConfig::from_app_config(&config))
            .await
            .context("failed to connect to database")?,
    );
    if config.auto_migrate {
        run_migrations(&db).await.context("migrations failed")?;
    }

    let (event_sender, event_receiver) = event_channel(1024);
    tokio::spawn(process_events(event_receiver));

    let gateway = Arc::new(MercadoPagoGateway::from_config(&config));
    let mailer = Arc::new(ResendMailer::from_config(&config));
    let services = AppServices::new(
        db.clone(),
        &config,
        event_sender.clone(),
        gateway,
        mailer,
    );

    reconciliation::start_worker(
        services.reconciliation.clone(),
        config.reconciler_interval_secs,
        config.reconciler_batch_size,
    );

    let auth_service = Arc::new(AuthService::new(&config.jwt_secret, config.jwt_expiration));

    let cors = match &config.cors_allowed_origins {
        Some(origins) if origins.trim() != "*" => {
            let parsed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let state = AppState {
        db,
        config: Arc::new(config.clone()),
        event_sender,
        services,
    };

    let app = app_router(state)
        .layer(Extension(auth_service))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(cors);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
