mod api;
mod cache;
mod config;
mod database;
mod error;
mod health;
mod logging;
mod middleware;
mod payments;
mod services;

// Imports
use crate::config::AppConfig;
use crate::database::user_repository::UserRepository;
use crate::database::webhook_event_repository::WebhookEventRepository;
use crate::health::{HealthChecker, HealthStatus};
use crate::logging::init_tracing;
use crate::payments::{
    HmacSignatureVerifier, InsecureVerifier, PaychanguGateway, PaymentGateway, SignatureVerifier,
};
use crate::services::balance::BalanceService;
use crate::services::ledger::LedgerService;
use crate::services::webhook_processor::WebhookProcessor;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cache::{init_cache_pool, RedisCache};
use middleware::logging::{request_logging_middleware, UuidRequestId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize advanced tracing
    init_tracing();

    let config = AppConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        anyhow::anyhow!(e)
    })?;

    let skip_externals = std::env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "🚀 Starting Chikwama backend service"
    );

    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration loaded"
    );

    // Initialize database connection pool
    let db_pool = if skip_externals {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true)");
        None
    } else {
        info!("📊 Initializing database connection pool...");
        let db_pool = database::init_pool_from_config(&config.database)
            .await
            .map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                anyhow::anyhow!(e)
            })?;

        info!(
            max_connections = config.database.max_connections,
            "✅ Database connection pool initialized"
        );
        Some(db_pool)
    };

    // Initialize cache connection pool
    let redis_cache = if skip_externals {
        info!("⏭️  Skipping Redis initialization (SKIP_EXTERNALS=true)");
        None
    } else {
        info!("🔄 Initializing Redis cache connection pool...");
        let cache_config = cache::CacheConfig {
            redis_url: config.cache.redis_url.clone(),
            max_connections: config.cache.max_connections,
            ..Default::default()
        };

        let cache_pool = init_cache_pool(cache_config).await.map_err(|e| {
            error!("Failed to initialize cache pool: {}", e);
            anyhow::anyhow!(e)
        })?;

        let redis_cache = RedisCache::new(cache_pool);
        info!(redis_url = %config.cache.redis_url, "✅ Cache connection pool initialized");
        Some(redis_cache)
    };

    // Initialize the PayChangu gateway and webhook verifier
    info!("💳 Initializing PayChangu gateway...");
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(PaychanguGateway::new(config.paychangu.clone()).map_err(|e| {
            error!("Failed to initialize PayChangu gateway: {}", e);
            anyhow::anyhow!(e)
        })?);
    info!(api_base = %config.paychangu.api_base, "✅ PayChangu gateway initialized");

    let verifier: Arc<dyn SignatureVerifier> = if config.paychangu.allow_unsigned_webhooks {
        Arc::new(InsecureVerifier::new())
    } else {
        Arc::new(HmacSignatureVerifier::new(config.paychangu.signing_secret()))
    };

    // Initialize health checker
    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(db_pool.clone(), redis_cache.clone());
    info!("✅ Health checker initialized");

    // Create the application router with logging middleware
    info!("🛣️  Setting up application routes...");

    let domain_routes = if let Some(pool) = db_pool.clone() {
        let ledger = Arc::new(
            LedgerService::new(pool.clone(), &config.wallet, redis_cache.clone()).map_err(|e| {
                error!("Failed to initialize ledger service: {}", e);
                anyhow::anyhow!(e)
            })?,
        );
        let balance = Arc::new(BalanceService::new(
            pool.clone(),
            config.wallet.currency.clone(),
            redis_cache.clone(),
        ));
        let users = UserRepository::new(pool.clone());
        let events = WebhookEventRepository::new(pool.clone());

        let processor = Arc::new(WebhookProcessor::new(
            ledger.clone(),
            users.clone(),
            events,
            verifier.clone(),
            gateway.clone(),
        ));

        let webhook_state = Arc::new(api::webhooks::WebhookState {
            processor,
            wallet_page_url: config.wallet.wallet_page_url.clone(),
        });

        let wallet_state = api::wallet::WalletState {
            ledger,
            balance,
            users,
            gateway: gateway.clone(),
            paychangu: config.paychangu.clone(),
        };

        Router::new()
            .route(
                "/api/paychangu/webhook",
                post(api::webhooks::handle_webhook).get(api::webhooks::webhook_redirect),
            )
            .route(
                "/api/paychangu/callback",
                get(api::webhooks::handle_callback).post(api::webhooks::handle_webhook),
            )
            .with_state(webhook_state)
            .merge(
                Router::new()
                    .route("/api/wallet/withdraw", post(api::wallet::withdraw))
                    .route("/api/wallet/deposit", post(api::wallet::deposit))
                    .route("/api/wallet/balance", get(api::wallet::get_balance))
                    .route(
                        "/api/wallet/transactions",
                        get(api::wallet::get_transactions),
                    )
                    .route("/api/wallet/sweep-stuck", post(api::wallet::sweep_stuck))
                    .with_state(wallet_state),
            )
    } else {
        info!("⏭️  Skipping wallet and webhook routes (no database)");
        Router::new()
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .merge(domain_routes)
        .with_state(AppState { health_checker })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    // Print a prominent banner with server information
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                                                              ║");
    println!("║         🚀 CHIKWAMA BACKEND SERVER IS RUNNING 🚀            ║");
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!(
        "║  🌐 Server Address:  http://{}                    ║",
        addr
    );
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║                                                              ║");
    println!("║  GET  /                          - Root endpoint             ║");
    println!("║  GET  /health                    - Health check              ║");
    println!("║  GET  /health/ready              - Readiness probe           ║");
    println!("║  GET  /health/live               - Liveness probe            ║");
    println!("║  POST /api/paychangu/webhook     - Gateway notifications     ║");
    println!("║  GET  /api/paychangu/callback    - Checkout callback         ║");
    println!("║  POST /api/wallet/withdraw       - Bank payout               ║");
    println!("║  POST /api/wallet/deposit        - Hosted checkout           ║");
    println!("║  GET  /api/wallet/balance        - Cached balance            ║");
    println!("║  GET  /api/wallet/transactions   - History                   ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(
        address = %addr,
        "🚀 Server listening on http://{}",
        addr
    );
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    info!("📍 Root endpoint accessed");
    "Welcome to Chikwama Backend API"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    info!("🏥 Health check requested");
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(health_status.status, crate::health::HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        info!("✅ Health check passed");
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    info!("🔍 Readiness probe requested");
    // Readiness checks all dependencies
    let result = health(State(state)).await;
    if result.is_ok() {
        info!("✅ Readiness check passed");
    } else {
        error!("❌ Readiness check failed");
    }
    result
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> Result<&'static str, (StatusCode, String)> {
    info!("💓 Liveness probe requested");
    // Liveness just checks if the service is running
    Ok("OK")
}
