use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, Stream};

use crate::AppState;
use crate::error::{AppError, RequestError};
use crate::middleware::Identity;
use crate::models::{RequestRef, RideRequest};
use crate::request::RequestService;
use crate::routes::{check_coordinates, check_location, check_request_ref};
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

use super::model::{CreateRideRequest, DriverLocationRequest, OpenRequestsQuery, StreamQuery};

fn service(state: &AppState, identity: Identity) -> RequestService {
    RequestService::new(
        state.store.clone(),
        state.profiles.clone(),
        state.config.clone(),
        identity.uid,
    )
}

fn lifecycle_response(
    result: Result<Option<RideRequest>, RequestError>,
) -> Result<impl IntoResponse, AppError> {
    match result? {
        Some(request) => Ok((StatusCode::OK, success_to_api_response(request))),
        None => Err(AppError::NotFound),
    }
}

pub async fn create_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateRideRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_location(&req.pickup)?;
    if let Some(dropoff) = &req.dropoff {
        check_location(dropoff)?;
    }

    let created = service(&state, identity)
        .create_request(req.pickup, req.dropoff)
        .await;
    Ok(match created {
        Some(request) => (StatusCode::CREATED, success_to_api_response(request)),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_to_api_response::<RideRequest>(
                error_codes::INTERNAL_ERROR,
                "Request write failed".to_string(),
            ),
        ),
    })
}

pub async fn request_heartbeat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RequestRef>,
) -> Result<impl IntoResponse, AppError> {
    check_request_ref(&req)?;
    if service(&state, identity).update_heartbeat(&req).await {
        Ok((StatusCode::OK, success_to_api_response(())))
    } else {
        Err(AppError::NotFound)
    }
}

/// 调用方作为司机接单
pub async fn assign_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RequestRef>,
) -> Result<impl IntoResponse, AppError> {
    check_request_ref(&req)?;
    let driver_uid = identity.uid.clone();
    let result = service(&state, identity)
        .assign_driver(&req, &driver_uid)
        .await;
    lifecycle_response(result)
}

pub async fn complete_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RequestRef>,
) -> Result<impl IntoResponse, AppError> {
    check_request_ref(&req)?;
    lifecycle_response(service(&state, identity).complete_request(&req).await)
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RequestRef>,
) -> Result<impl IntoResponse, AppError> {
    check_request_ref(&req)?;
    lifecycle_response(service(&state, identity).cancel_request(&req).await)
}

pub async fn update_driver_location(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<DriverLocationRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_request_ref(&req.request)?;
    check_coordinates(req.latitude, req.longitude)?;

    let written = service(&state, identity)
        .update_driver_location(&req.request, req.latitude, req.longitude)
        .await;
    if written {
        Ok((StatusCode::OK, success_to_api_response(())))
    } else {
        Err(AppError::NotFound)
    }
}

pub async fn open_requests(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<OpenRequestsQuery>,
) -> Result<impl IntoResponse, AppError> {
    check_coordinates(query.latitude, query.longitude)?;

    let include_neighbors = query.include_neighbors.unwrap_or(true);
    let requests = service(&state, identity)
        .fetch_open_requests(query.latitude, query.longitude, include_neighbors)
        .await;
    Ok(match requests {
        Ok(requests) => (StatusCode::OK, success_to_api_response(requests)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    })
}

pub async fn my_requests(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    match service(&state, identity).fetch_my_requests().await {
        Ok(requests) => (StatusCode::OK, success_to_api_response(requests)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

/// 扩展式搜索的 SSE 推送；连接断开时订阅随流一起释放
pub async fn stream_open_requests(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    check_coordinates(query.latitude, query.longitude)?;

    let expand_delay = query
        .expand_delay_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.expand_delay());
    let watch = service(&state, identity).watch_open_requests_with_expansion(
        query.latitude,
        query.longitude,
        expand_delay,
    );

    let events = stream::unfold(watch, |mut watch| async move {
        let requests = watch.changed().await?;
        let event = Event::default()
            .event("open_requests")
            .json_data(&requests)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to encode open requests event: {}", e);
                Event::default().comment("encode error")
            });
        Some((Ok(event), watch))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
