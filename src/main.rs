use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};

use parfum_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let auth_service = Arc::new(api::auth::AuthService::new(api::auth::AuthConfig::from(
        &cfg,
    )));

    let services =
        api::handlers::AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, None);

    // Public write routes share one limiter; Redis only when asked for
    let rl_backend = if cfg.rate_limit_use_redis {
        match redis::Client::open(cfg.redis_url.clone()) {
            Ok(client) => api::rate_limiter::RateLimitBackend::Redis {
                client: Arc::new(client),
                namespace: cfg.rate_limit_namespace.clone(),
            },
            Err(e) => {
                warn!(error = %e, "invalid redis_url; rate limiting stays in memory");
                api::rate_limiter::RateLimitBackend::InMemory
            }
        }
    } else {
        api::rate_limiter::RateLimitBackend::InMemory
    };
    let rate_limiter = api::rate_limiter::RateLimiter::new(
        api::rate_limiter::RateLimitConfig::from(&cfg),
        rl_backend,
    );
    tokio::spawn(api::rate_limiter::start_cleanup_task(
        rate_limiter.clone(),
        Duration::from_secs(cfg.rate_limit_window_seconds.max(1) * 5),
    ));

    let cors_layer = build_cors(&cfg)?;

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
        auth_service,
        rate_limiter,
    };

    let app = api::app_router(app_state)
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!(
        store = %cfg.site.store_name,
        environment = %cfg.environment,
        "parfum-api listening on http://{}",
        addr
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("parfum-api stopped");
    Ok(())
}

fn build_cors(cfg: &api::config::AppConfig) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        return Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any));
    }
    if cfg.should_allow_permissive_cors() {
        info!("Using permissive CORS because explicit origins were not configured");
        return Ok(CorsLayer::permissive());
    }
    error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
    Err("Missing CORS configuration".into())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
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
