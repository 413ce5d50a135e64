mod handler;
mod model;

pub use handler::{
    assign_request, cancel_request, complete_request, create_request, my_requests,
    open_requests, request_heartbeat, stream_open_requests, update_driver_location,
};
pub use model::{CreateRideRequest, DriverLocationRequest, OpenRequestsQuery, StreamQuery};
