use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::AppError;
use crate::middleware::Identity;
use crate::models::{PresenceRecord, Role};
use crate::presence::PresenceService;
use crate::routes::{check_cell_id, check_coordinates};
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

use super::model::{DriverCount, HeartbeatRequest, NearbyQuery, OfflineRequest};

fn reader(state: &AppState, identity: Identity) -> PresenceService {
    PresenceService::new(
        state.store.clone(),
        state.config.clone(),
        identity.uid,
        Role::Client,
    )
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_coordinates(req.latitude, req.longitude)?;
    if let Some(previous) = &req.previous_cell_id {
        check_cell_id(previous)?;
    }

    let service = PresenceService::with_last_cell(
        state.store.clone(),
        state.config.clone(),
        identity.uid,
        req.role,
        req.previous_cell_id,
    );

    let written = service
        .update_presence(req.latitude, req.longitude, req.active_ride_id)
        .await;
    Ok(match written {
        Some(record) => (StatusCode::OK, success_to_api_response(record)),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_to_api_response::<PresenceRecord>(
                error_codes::INTERNAL_ERROR,
                "Presence write failed".to_string(),
            ),
        ),
    })
}

pub async fn go_offline(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<OfflineRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_cell_id(&req.cell_id)?;

    let mut service = PresenceService::with_last_cell(
        state.store.clone(),
        state.config.clone(),
        identity.uid,
        req.role,
        Some(req.cell_id),
    );
    service.go_offline().await;
    Ok((StatusCode::OK, success_to_api_response(())))
}

pub async fn nearby_drivers(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, AppError> {
    check_coordinates(query.latitude, query.longitude)?;

    let drivers = reader(&state, identity)
        .fetch_nearby_drivers(query.latitude, query.longitude)
        .await;
    Ok(match drivers {
        Ok(drivers) => (StatusCode::OK, success_to_api_response(drivers)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    })
}

pub async fn count_nearby_drivers(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, AppError> {
    check_coordinates(query.latitude, query.longitude)?;

    let drivers = reader(&state, identity)
        .fetch_nearby_drivers(query.latitude, query.longitude)
        .await;
    Ok(match drivers {
        Ok(drivers) => (
            StatusCode::OK,
            success_to_api_response(DriverCount {
                count: drivers.len(),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    })
}
