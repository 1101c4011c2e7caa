//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors; request-path errors go through
//! `kernel::error::AppError` (via the platform middleware).

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http,
    http::{Method, header},
    middleware::from_fn_with_state,
    routing::get,
};
use coordination::{
    AdvisoryLockCoordinator, LockNamespace, PeriodicTask, SavepointGuard, TaskError, run_periodic,
};
use platform::rate_limit::{
    LimitCategory, RateLimitSettings, RateLimiter,
    middleware::{RateLimitState, enforce_rate_limit},
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often a world tick is attempted. The advisory lock decides which
/// process actually runs it.
const WORLD_TICK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,platform=info,coordination=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Admission control: per-category limits from the environment, with an
    // optional shared store. Settings problems are fatal here so they can
    // never surface at request time.
    let settings = RateLimitSettings::from_env()?;
    if settings.shared_store_url.is_none() {
        tracing::info!("No REDIS_URL set, rate limiting runs in local-only mode");
    }
    let limiter = RateLimiter::connect(settings).await?;

    // One dedicated lock session per process; worker cycles in the whole
    // fleet coordinate through these.
    let locks = Arc::new(AdvisoryLockCoordinator::connect(&database_url).await?);
    let best_effort = SavepointGuard::from_env();

    tokio::spawn(run_periodic(
        locks.clone(),
        WorldTick {
            pool: pool.clone(),
            best_effort,
        },
        WORLD_TICK_INTERVAL,
    ));

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    let general_limit = RateLimitState {
        limiter: limiter.clone(),
        category: LimitCategory::General,
    };

    // Build router. Game routers (pets, feed, arena) nest under /api and add
    // their own posts/comments limit layers on the write routes.
    let app = Router::new()
        .route("/healthz", get(healthz))
        .layer(from_fn_with_state(general_limit, enforce_rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 31113));
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Periodic world-state advancement.
///
/// The simulation systems (hunger decay, mood, arena scheduling) attach to
/// this cycle; the loop itself only guarantees that at most one process in
/// the fleet runs each tick.
struct WorldTick {
    pool: sqlx::PgPool,
    best_effort: SavepointGuard,
}

impl PeriodicTask for WorldTick {
    fn name(&self) -> &'static str {
        "world-tick"
    }

    fn namespace(&self) -> LockNamespace {
        LockNamespace::WORLD_TICK
    }

    async fn run(&self) -> Result<(), TaskError> {
        let mut tx = self.pool.begin().await?;

        // Tick systems issue their statements on this transaction.

        // Broadcasting the tick to listeners is optional; a lost
        // notification must not fail the cycle.
        self.best_effort
            .run_best_effort(&mut *tx, "tick broadcast", |conn| {
                Box::pin(async move {
                    sqlx::query("SELECT pg_notify('world_tick', '')")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .await;

        tx.commit().await?;
        tracing::debug!("World tick complete");
        Ok(())
    }
}
