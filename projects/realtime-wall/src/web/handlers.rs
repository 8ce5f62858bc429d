use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    backend::http::DEFAULT_STREAM_CONTENT_TYPE,
    core::{errors::AppError, state::WallSnapshot},
    realtime::{allocator::FullscreenRefusal, frames::FrameTracker},
};

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    app: String,
}

#[derive(Deserialize)]
pub struct VisibilityRequest {
    index: u32,
    visible: bool,
}

#[derive(Debug, Serialize)]
pub struct FullscreenResponse {
    fullscreen: Option<u32>,
}

#[derive(Deserialize)]
pub struct StreamQuery {
    token: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        app: state.config.app_name.clone(),
    })
}

pub async fn wall(State(state): State<Arc<AppState>>) -> Json<WallSnapshot> {
    Json(state.wall.snapshot())
}

pub async fn visibility(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VisibilityRequest>,
) -> Result<StatusCode, AppError> {
    state
        .wall
        .set_visibility(payload.index, payload.visible)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<WallSnapshot>, AppError> {
    state.wall.refresh().await?;
    Ok(Json(state.wall.snapshot()))
}

pub async fn start_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<WallSnapshot>, AppError> {
    state.wall.start_all().await?;
    info!("start-all completed from web");
    Ok(Json(state.wall.snapshot()))
}

pub async fn stop_all(State(state): State<Arc<AppState>>) -> Result<Json<WallSnapshot>, AppError> {
    state.wall.stop_all().await?;
    info!("stop-all completed from web");
    Ok(Json(state.wall.snapshot()))
}

pub async fn toggle_fullscreen(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> Result<Json<FullscreenResponse>, AppError> {
    let fullscreen = state
        .wall
        .toggle_fullscreen(index)
        .await
        .map_err(|err| match err.downcast_ref::<FullscreenRefusal>() {
            Some(FullscreenRefusal::NotFound(_)) => {
                AppError::new(StatusCode::NOT_FOUND, err.to_string())
            }
            Some(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            None => AppError::new(StatusCode::SERVICE_UNAVAILABLE, format!("{err:#}")),
        })?;
    Ok(Json(FullscreenResponse { fullscreen }))
}

pub async fn exit_fullscreen(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FullscreenResponse>, AppError> {
    state.wall.exit_fullscreen().await?;
    Ok(Json(FullscreenResponse { fullscreen: None }))
}

/// Proxies the backend stream for a feed holding a slot. Each connection
/// token serves one client at a time, and the proxy ends as soon as the
/// feed's token changes.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    let mut snapshots = state.wall.subscribe();
    {
        let snapshot = snapshots.borrow_and_update();
        let feed = snapshot.feed(index).ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, format!("camera {index} not found"))
        })?;
        if feed.stream_url.is_none() {
            return Err(AppError::new(
                StatusCode::CONFLICT,
                format!("camera {index} holds no stream slot"),
            ));
        }
        if feed.connection_token != query.token {
            return Err(AppError::new(
                StatusCode::GONE,
                format!("stale connection token for camera {index}"),
            ));
        }
    }

    let token = query.token;
    let permit = state.claim_stream(index, &token).await.ok_or_else(|| {
        AppError::new(
            StatusCode::LOCKED,
            format!("camera {index} stream already has a client"),
        )
    })?;
    let mut upstream = state.backend.open_stream(index, &token).await.map_err(|err| {
        AppError::new(
            StatusCode::BAD_GATEWAY,
            format!("camera {index} stream unavailable: {err:#}"),
        )
    })?;
    let content_type = HeaderValue::from_str(upstream.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_STREAM_CONTENT_TYPE));

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    let task_state = state.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let mut frames = FrameTracker::new();
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    let still_current = changed.is_ok()
                        && snapshots.borrow_and_update().holds_token(index, &token);
                    if !still_current {
                        info!("camera {index} stream superseded, closing proxy");
                        break;
                    }
                }
                _ = tx.closed() => break,
                chunk = upstream.next_chunk() => match chunk {
                    Ok(Some(bytes)) => {
                        if let Some(frame) = frames.push(&bytes) {
                            task_state.set_latest_frame(index, frame).await;
                        }
                        if tx.send(Ok(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("camera {index} upstream stream failed: {err:#}");
                        let _ = tx.send(Err(std::io::Error::other(err.to_string()))).await;
                        break;
                    }
                },
            }
        }

        let released = task_state
            .wall
            .snapshot()
            .feed(index)
            .is_none_or(|feed| feed.stream_url.is_none());
        if released {
            task_state.clear_latest_frame(index).await;
        }
        info!(
            "camera {index} stream proxy closed after {} frames",
            frames.frames_seen()
        );
    });

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        StatusCode::OK,
        headers,
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> Result<Response, AppError> {
    if state.wall.snapshot().feed(index).is_none() {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("camera {index} not found"),
        ));
    }

    let frame = match state.latest_frame(index).await {
        Some(frame) => frame,
        None => state.backend.snapshot(index).await.map_err(|err| {
            AppError::new(
                StatusCode::BAD_GATEWAY,
                format!("snapshot for camera {index} unavailable: {err:#}"),
            )
        })?,
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((StatusCode::OK, headers, frame).into_response())
}
