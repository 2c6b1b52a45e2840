use std::{net::SocketAddr, sync::Arc};

use http::HeaderValue;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use order_settlement as app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = app::config::load_config()?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let env = app::environment::Environment::from_config(&cfg, db_arc.clone())?;
    info!(
        stage = %env.policy.stage,
        currency = %env.policy.currency,
        minimum_charge = env.policy.minimum_charge,
        "settlement environment ready"
    );
    if cfg.notification_webhook_url.is_none() {
        info!("Notification webhook URL not configured; confirmations are logged only");
    }

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None => {
            if cfg.is_production() {
                warn!("No CORS origins configured in production; falling back to permissive CORS");
            }
            CorsLayer::permissive()
        }
    };

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let state = app::AppState::new(env, cfg).with_database(db_arc);
    let router = app::app_router(state).layer(cors_layer);

    info!("order-settlement listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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
    info!("shutdown signal received");
}
