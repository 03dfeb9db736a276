pub mod events;
pub mod system;
pub mod upload;

pub use events::*;
pub use system::*;
pub use upload::*;

use crate::api::types::ErrorResponse;
use axum::{http::StatusCode, Json};

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}
