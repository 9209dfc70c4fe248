mod booking;
mod config;
mod coordinator;
mod db;
mod domain;
mod error;
mod gateway;
mod handlers;
mod models;
mod notify;
mod reconcile;
mod state;
mod store;
mod sweep;

use axum::extract::MatchedPath;
use axum::http::{header, header::HeaderName, Method, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use config::Config;
use gateway::GatewayClient;
use notify::{HttpMailer, LogMailer, Mailer, Notifier};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sweep::DepartureSweep;
use tourbook_common::internal_auth::InternalAuthLayer;
use tourbook_common::request_id::RequestIdLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let pool = match db::connect(&cfg.db_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "db connect failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = db::ensure_schema(&pool, &cfg.db_schema).await {
        tracing::error!(error = %e, "db ensure_schema failed");
        std::process::exit(2);
    }

    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.gateway_timeout_secs))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "http client init failed");
            std::process::exit(2);
        }
    };

    let mailer: Arc<dyn Mailer> = match &cfg.mail_relay_url {
        Some(url) => Arc::new(HttpMailer::new(
            http.clone(),
            url.clone(),
            cfg.mail_relay_secret.clone(),
        )),
        None => {
            tracing::warn!("MAIL_RELAY_URL not set; notifications are only logged");
            Arc::new(LogMailer)
        }
    };
    let notifier = Notifier::new(mailer, cfg.frontend_url.clone());
    let pg_store: Arc<dyn store::Store> = Arc::new(db::PgStore::new(pool, cfg.db_schema.clone()));
    let departure_sweep = Arc::new(DepartureSweep::new(pg_store.clone(), notifier.clone()));

    let gateways = GatewayClient::new(http, cfg.momo.clone(), cfg.vnpay.clone());
    if cfg.momo.is_none() {
        tracing::warn!("momo credentials not set; momo payments disabled");
    }
    if cfg.vnpay.is_none() {
        tracing::warn!("vnpay credentials not set; vnpay payments disabled");
    }

    let state = AppState {
        store: pg_store,
        gateways: Arc::new(gateways),
        notifier,
        sweep: departure_sweep.clone(),
        deposit_rate: cfg.deposit_rate,
        frontend_url: cfg.frontend_url.clone(),
        env_name: cfg.env_name.clone(),
    };

    if cfg.sweep_enabled {
        sweep::spawn_daily(departure_sweep, cfg.sweep_hour_utc);
    }

    let internal = InternalAuthLayer::new(cfg.require_internal_secret, cfg.internal_secret.clone())
        .with_allowed_callers(cfg.internal_allowed_callers.clone());

    let cors = if cfg.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            .allow_credentials(false)
    } else {
        let origins: Vec<axum::http::HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            .allow_credentials(false)
            .allow_origin(AllowOrigin::list(origins))
    };

    let app = build_router(state, internal)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        // Gateway callbacks carry signatures in the query string; only the
        // matched route template is logged.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path,
                    request_id = %request_id
                )
            }),
        )
        .layer(RequestIdLayer::new(HeaderName::from_static("x-request-id")));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    tracing::info!(%addr, env = %cfg.env_name, "starting tourbook_booking_service");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, %addr, "bind failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Gateway callbacks are public (they authenticate by signature); everything
/// else sits behind the internal auth layer.
pub(crate) fn build_router(state: AppState, internal: InternalAuthLayer) -> Router {
    let authed = Router::new()
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/me", get(handlers::my_bookings))
        .route("/bookings/payment-webhook", post(handlers::payment_webhook))
        .route("/bookings/:code", get(handlers::booking_detail))
        .route("/bookings/:code/cancel", put(handlers::cancel_booking))
        .route(
            "/bookings/:code/payment-url",
            post(handlers::create_payment_url),
        )
        .route(
            "/internal/sweeps/departures",
            post(handlers::run_departure_sweep),
        )
        .layer(internal);

    let gateway_callbacks = Router::new()
        .route("/payments/momo/return", get(handlers::momo_return))
        .route("/payments/momo/ipn", post(handlers::momo_ipn))
        .route("/payments/vnpay/return", get(handlers::vnpay_return))
        .route("/payments/vnpay/ipn", get(handlers::vnpay_ipn));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(gateway_callbacks)
        .merge(authed)
        // Unknown routes are 404, not an auth failure.
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn booking_cors_allowed_headers() -> Vec<HeaderName> {
    vec![
        header::ACCEPT,
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-request-id"),
    ]
}
