use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::audio::{get_audio, post_audio};
use crate::metrics::get_metrics;
use crate::state::AppState;
use crate::ws::ws_handler;

async fn ensure_request_id(req: Request<Body>, next: middleware::Next) -> Response {
    let request_id_header = HeaderName::from_static("x-request-id");

    let mut req = req;
    let request_id = req
        .headers()
        .get(&request_id_header)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if req.headers().get(&request_id_header).is_none() {
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(request_id_header.clone(), v);
        }
    }

    let mut res = next.run(req).await;

    if res.headers().get(&request_id_header).is_none() {
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            res.headers_mut().insert(request_id_header, v);
        }
    }

    res
}

/// Builds the full router: the synthesis websocket plus the audio-fetch
/// HTTP surface, grounded on `dog_axum::app`'s `layer_defaults` /
/// `ensure_request_id` idiom (trimmed of the generic `AxumApp<R, P>`
/// service-registration framework, since this core exposes a small, fixed
/// set of concrete routes rather than a pluggable service registry).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ws/tts", get(ws_handler))
        .route("/audio/{variant_hash}", get(get_audio))
        .route("/audio", post(post_audio))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(ensure_request_id))
        .layer(TraceLayer::new_for_http())
}

pub async fn listen<A>(state: AppState, addr: A) -> anyhow::Result<()>
where
    A: ToSocketAddrs,
{
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
