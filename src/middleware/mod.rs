mod error_handler;
mod identity;

pub use error_handler::log_errors;
pub use identity::{Identity, USER_ID_HEADER, identity_middleware};
