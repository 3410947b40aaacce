//! HTTP surface: the `/ws` upgrade, `/healthz`, and the `/avatars` asset
//! route.
//!
//! This is a collaborator seam, not a reimplementation of the REST surface
//! that mutates entities/scenes — it exists only because the WebSocket
//! upgrade and the avatar asset GET have to live somewhere. The asset
//! route hands the path off to a `tower_http` file service rather than
//! hand-rolling file I/O.

use std::path::PathBuf;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::connection;
use crate::hub::Hub;

/// Shared state handed to every axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Config,
    /// Directory static avatar asset files are served from. `ServeDir`
    /// 404s unknown files on its own; the hub never caches these bytes.
    pub asset_dir: PathBuf,
}

/// Build the router. CORS is permissive: this hub trusts its input and
/// does no authentication or authorization at this layer.
#[must_use]
pub fn router(state: AppState) -> Router {
    let avatar_assets = ServeDir::new(&state.asset_dir);
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .nest_service("/avatars", avatar_assets)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.hub, state.config))
}

/// `GET /healthz` — process liveness plus live connection/session counts,
/// for operators, not clients (clients learn connection counts via the
/// `client_count` broadcast instead).
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.hub.connection_count(),
        "sessions": state.hub.session_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(asset_dir: PathBuf) -> AppState {
        let (hub, _handle) = Hub::spawn("1".to_string());
        AppState {
            hub,
            config: Config::default(),
            asset_dir,
        }
    }

    #[tokio::test]
    async fn healthz_reports_zero_connections_on_a_fresh_hub() {
        let state = test_state(std::env::temp_dir());
        let body = healthz(State(state)).await.into_response();
        assert_eq!(body.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn avatars_route_serves_a_known_asset() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("robot.glb"), b"not a real glb, just bytes")
            .expect("write fixture");

        let app = router(test_state(tmp.path().to_path_buf()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/avatars/robot.glb")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn avatars_route_404s_an_unknown_kind() {
        let tmp = tempfile::TempDir::new().expect("tempdir");

        let app = router(test_state(tmp.path().to_path_buf()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/avatars/does-not-exist.glb")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
