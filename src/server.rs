//! HTTP control surface for the browser controller. Thin layer over
//! [`Console`]: every handler is a single guarded read or write, so slider
//! storms from the UI never touch the transmit cadence.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::console::{BridgeStatus, Console};
use crate::dmx_types::{DmxError, FixtureRole};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn error(message: String) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message),
        })
    }
}

type Rejection<T> = (StatusCode, Json<ApiResponse<T>>);

fn reject<T>(err: DmxError) -> Rejection<T> {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        ApiResponse::error(err.to_string()),
    )
}

/// The controller page may be opened from disk or another origin, so the
/// API is wide open.
pub fn router(console: Arc<Console>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/status", get(status))
        .route("/dmx", post(write_channels))
        .route("/channel", post(write_role))
        .route("/scene", post(select_scene).delete(clear_scene))
        .route("/blackout", post(engage_blackout).delete(release_blackout))
        .route("/audio", post(configure_audio))
        .route("/audio/energy", post(feed_energy))
        .layer(cors)
        .with_state(console)
}

async fn status(State(console): State<Arc<Console>>) -> Json<BridgeStatus> {
    Json(console.status())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelsWrite {
    #[serde(default = "default_start_address")]
    start_address: usize,
    channels: Vec<u8>,
}

fn default_start_address() -> usize {
    1
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelsUpdated {
    address: usize,
    channels_updated: usize,
}

async fn write_channels(
    State(console): State<Arc<Console>>,
    Json(req): Json<ChannelsWrite>,
) -> Result<Json<ApiResponse<ChannelsUpdated>>, Rejection<ChannelsUpdated>> {
    console
        .set_range(req.start_address, &req.channels)
        .map_err(reject)?;
    Ok(ApiResponse::ok(ChannelsUpdated {
        address: req.start_address,
        channels_updated: req.channels.len(),
    }))
}

#[derive(Debug, Deserialize)]
struct RoleWrite {
    role: FixtureRole,
    value: u8,
}

async fn write_role(
    State(console): State<Arc<Console>>,
    Json(req): Json<RoleWrite>,
) -> Result<Json<ApiResponse<()>>, Rejection<()>> {
    console
        .set_manual_channel(req.role, req.value)
        .map_err(reject)?;
    Ok(ApiResponse::ok(()))
}

#[derive(Debug, Deserialize)]
struct SceneSelect {
    id: u8,
}

#[derive(Debug, Serialize)]
struct SceneInfo {
    id: u8,
    name: String,
}

async fn select_scene(
    State(console): State<Arc<Console>>,
    Json(req): Json<SceneSelect>,
) -> Result<Json<ApiResponse<SceneInfo>>, Rejection<SceneInfo>> {
    let preset = console
        .select_scene(req.id, Instant::now())
        .map_err(reject)?;
    tracing::info!(scene = %preset, "scene activated");
    Ok(ApiResponse::ok(SceneInfo {
        id: preset.id(),
        name: preset.to_string(),
    }))
}

async fn clear_scene(State(console): State<Arc<Console>>) -> Json<ApiResponse<()>> {
    console.clear_scene();
    ApiResponse::ok(())
}

async fn engage_blackout(State(console): State<Arc<Console>>) -> Json<ApiResponse<()>> {
    console.trigger_blackout();
    tracing::info!("blackout engaged");
    ApiResponse::ok(())
}

async fn release_blackout(State(console): State<Arc<Console>>) -> Json<ApiResponse<()>> {
    console.release_blackout();
    ApiResponse::ok(())
}

#[derive(Debug, Deserialize)]
struct AudioConfig {
    enabled: Option<bool>,
    sensitivity: Option<f32>,
}

async fn configure_audio(
    State(console): State<Arc<Console>>,
    Json(req): Json<AudioConfig>,
) -> Json<ApiResponse<()>> {
    if let Some(enabled) = req.enabled {
        console.set_audio_enabled(enabled);
    }
    if let Some(sensitivity) = req.sensitivity {
        console.set_audio_sensitivity(sensitivity);
    }
    ApiResponse::ok(())
}

#[derive(Debug, Deserialize)]
struct EnergySample {
    energy: f32,
}

async fn feed_energy(
    State(console): State<Arc<Console>>,
    Json(req): Json<EnergySample>,
) -> Json<ApiResponse<()>> {
    console.feed_energy(req.energy);
    ApiResponse::ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx_types::FixtureMap;

    fn console() -> Arc<Console> {
        Console::new(FixtureMap::default(), 7)
    }

    #[tokio::test]
    async fn test_dmx_write_reports_updated_count() {
        let console = console();
        let response = write_channels(
            State(console.clone()),
            Json(ChannelsWrite {
                start_address: 1,
                channels: vec![9, 9, 9],
            }),
        )
        .await
        .unwrap();
        let data = response.0.data.unwrap();
        assert_eq!(data.channels_updated, 3);
        assert_eq!(console.role_value(FixtureRole::Color), 9);
    }

    #[tokio::test]
    async fn test_bad_range_is_rejected_with_422() {
        let console = console();
        let err = write_channels(
            State(console),
            Json(ChannelsWrite {
                start_address: 512,
                channels: vec![1, 2],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!err.1.0.success);
    }

    #[tokio::test]
    async fn test_unknown_scene_is_rejected() {
        let console = console();
        let err = select_scene(State(console), Json(SceneSelect { id: 12 }))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_status_roundtrip() {
        let console = console();
        console.set_audio_enabled(true);
        let response = status(State(console)).await;
        assert!(response.0.audio_enabled);
        assert_eq!(response.0.connection, "disconnected");
    }
}
