//! The `{success, …}` response envelope and the error-token → HTTP status
//! mapping.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::{Value, json},
};

use mcphost_common::Error;

/// Wrapper turning a domain error into the API error envelope.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

/// HTTP status for a stable error token.
#[must_use]
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "NotFound" => StatusCode::NOT_FOUND,
        "InvalidArgument" | "InvalidSecretName" => StatusCode::BAD_REQUEST,
        "AlreadyExists" | "ServerDisabledForWorkspace" | "PortExhausted" | "InstanceBusy" => {
            StatusCode::CONFLICT
        },
        "UpstreamUnavailable" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        (
            status_for(code),
            Json(json!({
                "success": false,
                "error": self.0.to_string(),
                "code": code,
            })),
        )
            .into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Merge `{"success": true}` into a response object.
#[must_use]
pub fn success(mut body: Value) -> Json<Value> {
    if let Value::Object(map) = &mut body {
        map.insert("success".into(), Value::Bool(true));
        Json(body)
    } else {
        Json(json!({ "success": true, "data": body }))
    }
}
