use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Project #{0} has no agent to run on")]
    NoAgent(i64),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for InspectorError {
    fn into_response(self) -> Response {
        let status = match &self {
            InspectorError::Unauthorized => StatusCode::UNAUTHORIZED,
            InspectorError::NotFound(_) => StatusCode::NOT_FOUND,
            InspectorError::NoAgent(_) => StatusCode::CONFLICT,
            InspectorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InspectorError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_per_variant() {
        let cases = [
            (InspectorError::Unauthorized, StatusCode::UNAUTHORIZED),
            (InspectorError::NotFound("Run #1".into()), StatusCode::NOT_FOUND),
            (InspectorError::NoAgent(3), StatusCode::CONFLICT),
            (
                InspectorError::Validation("bad".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                InspectorError::Other(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
