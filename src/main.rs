use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod categories;
mod config;
mod dashboard;
mod database;
mod error;
mod export;
mod health;
mod image;
mod pagination;
mod posts;
mod users;

use database::AppState;

fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/healthcheck", get(health::health_check_handler))
        .route("/api/posts", get(posts::list_published))
        .route("/api/posts/:slug", get(posts::read_published))
        .route("/api/search", get(posts::search_published))
        .route("/api/categories", get(categories::public_tree))
        .route("/api/categories/:slug/posts", get(categories::public_posts))
        .route("/api/auth/login", post(auth::login));

    let authed = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    // Session resolution runs first (outer layer), then the role gate.
    let dashboard_routes = Router::new()
        .route("/api/dashboard/stats", get(dashboard::stats_handler))
        .route(
            "/api/admin/categories",
            get(categories::admin_list).post(categories::create),
        )
        .route(
            "/api/admin/categories/:id",
            get(categories::admin_detail)
                .put(categories::update)
                .delete(categories::remove),
        )
        .route(
            "/api/admin/posts",
            get(posts::admin_list).post(posts::create),
        )
        .route(
            "/api/admin/posts/:id",
            get(posts::admin_detail)
                .put(posts::update)
                .delete(posts::remove),
        )
        .route("/api/admin/posts/:id/banner", post(image::upload_banner))
        .route("/api/admin/posts/:id/gallery", put(image::update_gallery))
        .route("/api/admin/export/categories.csv", get(export::categories_csv))
        .route("/api/admin/export/posts.csv", get(export::posts_csv))
        .route_layer(middleware::from_fn(auth::require_dashboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/users", get(users::admin_list).post(users::create))
        .route(
            "/api/admin/users/:id",
            put(users::update).delete(users::remove),
        )
        .route("/api/admin/export/users.csv", get(export::users_csv))
        .route_layer(middleware::from_fn(auth::require_admin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    Router::new()
        .merge(public)
        .merge(authed)
        .merge(dashboard_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // axum logs rejections from built-in extractors with the
                // `axum::rejection` target at TRACE level.
                format!(
                    "{}=debug,tower_http=debug,axum::rejection=trace",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let pool = match database::connect_pool(&config) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("database connection failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = database::ensure_schema(&pool) {
        tracing::error!("schema bootstrap failed: {}", e);
        std::process::exit(1);
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState { pool, config };
    let app = build_router(state);

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("newsdesk listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}
