//! HTTP mapping of [`ServiceError`].

use crate::error::ServiceError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// JSON body of every failed call.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidRange(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::ListNotFound(_) | Self::ItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.error_code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::security::range::RangeError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::from(RangeError::InvalidValue("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::PermissionDenied("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ServiceError::ItemNotFound(1).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::from(DbError::InvalidRow("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_response_status() {
        let response = ServiceError::ListNotFound(3).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_storage_error_message_reaches_caller() {
        let err = ServiceError::from(DbError::InvalidRow("bad state 7".into()));
        let expected = err.to_string();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "storage");
        assert_eq!(body["message"], expected.as_str());
        assert!(expected.contains("bad state 7"));
    }
}
