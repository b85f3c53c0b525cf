use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;

/// Success envelope: `{"success": true, "data": ...}`
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return ApiError::internal_server_error("Failed to serialize response data")
                    .into_response();
            }
        };

        Json(json!({ "success": true, "data": data })).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::collections::HashMap;

    #[test]
    fn success_is_ok() {
        let response = ApiResponse::success("fine").into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn unserializable_data_becomes_server_error() {
        // JSON object keys must be strings
        let mut data = HashMap::new();
        data.insert((1, 2), "pair key");
        let response = ApiResponse::success(data).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
