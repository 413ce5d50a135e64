use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::AppError;
use crate::geocell::GeoCell;
use crate::routes::check_coordinates;
use crate::utils::success_to_api_response;

use super::model::{CellEntry, CellInfo, CellQuery};

pub async fn get_cells(
    State(state): State<AppState>,
    Query(query): Query<CellQuery>,
) -> Result<impl IntoResponse, AppError> {
    let step_seconds = query.step_seconds.unwrap_or(state.config.cell_step_seconds);
    if step_seconds == 0 {
        return Err(AppError::BadRequest(
            "step_seconds must be positive".to_string(),
        ));
    }
    check_coordinates(query.latitude, query.longitude)?;

    let cell = GeoCell::at(query.latitude, query.longitude, step_seconds);
    let neighborhood = GeoCell::neighborhood(query.latitude, query.longitude, step_seconds)
        .into_iter()
        .map(CellEntry::from)
        .collect();

    Ok((
        StatusCode::OK,
        success_to_api_response(CellInfo {
            canonical: cell.canonical,
            cell_id: cell.id,
            step_seconds,
            neighborhood,
        }),
    ))
}
