use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::routing::get;
use axum::Router;
use dvr_core::{AccessToken, DvrEngine};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tower_http::validate_request::ValidateRequestHeaderLayer;
use tracing::{error, info, info_span, warn, Level};

pub mod auth;
pub mod dvr;
pub mod error;

pub use auth::{Owner, TokenValidate};
pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DvrEngine>,
}

/// `/dvr/*` and `/recordings/*` sit behind the token layer; `/healthz` does
/// not.
pub fn router(engine: Arc<DvrEngine>, tokens: &[AccessToken]) -> Router {
    let auth_layer = ValidateRequestHeaderLayer::custom(TokenValidate::new(tokens));
    let recordings = ServeDir::new(engine.recordings_dir());
    Router::new()
        .merge(dvr::route())
        .nest_service("/recordings", recordings)
        .layer(auth_layer)
        .route("/healthz", get(healthz))
        .with_state(AppState { engine })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::WARN)),
        )
}

async fn healthz() -> &'static str {
    "ok"
}

pub async fn server_up<F>(
    engine: Arc<DvrEngine>,
    tokens: Vec<AccessToken>,
    listener: TcpListener,
    signal: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    if tokens.is_empty() {
        warn!("no http tokens configured; every dvr request will be rejected");
    }
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "dvr http server listening");
    }
    let app = router(Arc::clone(&engine), &tokens);
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("dvr http server error: {e}"));
    engine.shutdown();
}
