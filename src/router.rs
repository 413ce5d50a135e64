use axum::{
    Router,
    routing::{get, post},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;

use crate::AppState;
use crate::middleware::{identity_middleware, log_errors};
use crate::routes;

/// 组装网关路由
pub fn build_router(state: AppState) -> Router {
    // 公开路由
    let public_routes = Router::new()
        .route("/ping", get(routes::ping))
        .route("/cells", get(routes::cell::get_cells));

    // 需要调用方身份的路由
    let protected_routes = Router::new()
        // 在线状态
        .route("/presence/heartbeat", post(routes::presence::heartbeat))
        .route("/presence/offline", post(routes::presence::go_offline))
        .route("/drivers/nearby", get(routes::presence::nearby_drivers))
        .route("/drivers/count", get(routes::presence::count_nearby_drivers))
        // 行程请求
        .route("/requests/create", post(routes::request::create_request))
        .route("/requests/heartbeat", post(routes::request::request_heartbeat))
        .route("/requests/assign", post(routes::request::assign_request))
        .route("/requests/complete", post(routes::request::complete_request))
        .route("/requests/cancel", post(routes::request::cancel_request))
        .route(
            "/requests/driver-location",
            post(routes::request::update_driver_location),
        )
        .route("/requests/open", get(routes::request::open_requests))
        .route(
            "/requests/open/stream",
            get(routes::request::stream_open_requests),
        )
        .route("/requests/mine", get(routes::request::my_requests))
        .layer(axum::middleware::from_fn(identity_middleware));

    let api = Router::new().merge(public_routes).merge(protected_routes);
    let base_uri = state.config.api_base_uri.trim_end_matches('/').to_string();
    let router = if base_uri.is_empty() {
        api
    } else {
        Router::new().nest(&base_uri, api)
    };

    let router = router.layer(axum::middleware::from_fn(log_errors));

    // 开发模式允许所有来源
    #[cfg(debug_assertions)]
    let router = router.layer(CorsLayer::permissive());

    router.with_state(state)
}
