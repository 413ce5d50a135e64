use axum::response::IntoResponse;

use crate::error::AppError;
use crate::geocell::decode_cell_id;
use crate::models::{LocationPoint, RequestRef};
use crate::utils::success_to_api_response;

pub mod cell;
pub mod presence;
pub mod request;

pub async fn ping() -> impl IntoResponse {
    success_to_api_response("pong")
}

/// 坐标必须是有限值且在 ±90 / ±180 以内
pub(crate) fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "invalid coordinates: {}, {}",
            latitude, longitude
        )))
    }
}

pub(crate) fn check_location(point: &LocationPoint) -> Result<(), AppError> {
    check_coordinates(point.lat, point.lng)
}

/// 客户端传入的分片ID会拼进存储路径，必须能解码为规范字符串
pub(crate) fn check_cell_id(cell_id: &str) -> Result<(), AppError> {
    match decode_cell_id(cell_id) {
        Some(_) => Ok(()),
        None => Err(AppError::BadRequest(format!("invalid cell id: {}", cell_id))),
    }
}

pub(crate) fn check_request_ref(request: &RequestRef) -> Result<(), AppError> {
    check_cell_id(&request.cell_id)?;
    if request.request_id.is_empty() || request.request_id.contains('/') {
        return Err(AppError::BadRequest(format!(
            "invalid request id: {}",
            request.request_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocell::{compute_canonical, compute_cell_id};

    #[test]
    fn test_coordinates_must_be_finite_and_in_range() {
        assert!(check_coordinates(19.43, -99.13).is_ok());
        assert!(check_coordinates(90.0, 180.0).is_ok());
        assert!(check_coordinates(-90.0, -180.0).is_ok());
        assert!(check_coordinates(f64::INFINITY, 0.0).is_err());
        assert!(check_coordinates(0.0, f64::NAN).is_err());
        assert!(check_coordinates(90.5, 0.0).is_err());
        assert!(check_coordinates(0.0, -1e300).is_err());
    }

    #[test]
    fn test_cell_ids_must_decode_to_canonical() {
        let cell_id = compute_cell_id(&compute_canonical(0.5, 0.5, 30));
        assert!(check_cell_id(&cell_id).is_ok());
        assert!(check_cell_id("a/b/c").is_err());
        assert!(check_cell_id("").is_err());
    }

    #[test]
    fn test_request_ref_rejects_nested_ids() {
        let cell_id = compute_cell_id(&compute_canonical(0.5, 0.5, 30));
        assert!(check_request_ref(&RequestRef::new(cell_id.clone(), "r1")).is_ok());
        assert!(check_request_ref(&RequestRef::new(cell_id.clone(), "r1/x/y")).is_err());
        assert!(check_request_ref(&RequestRef::new(cell_id, "")).is_err());
        assert!(check_request_ref(&RequestRef::new("a/b/c", "r1")).is_err());
    }
}
