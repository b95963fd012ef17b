//! HTTP error responses.
//!
//! Every failure is rendered as `{"error": "..."}`. Internal details are
//! logged and replaced by a generic message.

use actix_web::error::BlockingError;
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use log::error;
use serde_json::json;
use std::fmt::{self, Display, Formatter};

use crate::db::store::StoreError;
use crate::services::accounts::AccountError;

pub const SERVER_ERROR: &str = "Erreur serveur";
pub const DATABASE_NOT_READY: &str = "Base de données indisponible, réessayez plus tard";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    /// Logged, never returned verbatim.
    Internal(String),
}

impl ApiError {
    pub fn unknown_zone() -> Self {
        ApiError::NotFound("Zone inconnue".to_string())
    }

    fn public_message(&self) -> &str {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Unavailable(m) => m,
            ApiError::Internal(_) => SERVER_ERROR,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Internal(detail) => write!(f, "internal error: {}", detail),
            other => write!(f, "{}", other.public_message()),
        }
    }
}

impl std::error::Error for ApiError {}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(detail) = self {
            error!("request failed: {}", detail);
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.public_message() }))
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(_) => ApiError::Unavailable(DATABASE_NOT_READY.to_string()),
            StoreError::Conflict(_) => ApiError::Conflict("Nom d'utilisateur ou email déjà utilisé".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(value: AccountError) -> Self {
        match value {
            AccountError::MissingFields | AccountError::UnknownZone(_) => ApiError::BadRequest(value.to_string()),
            AccountError::UnknownUser | AccountError::WrongPassword => ApiError::Unauthorized(value.to_string()),
        }
    }
}

impl From<BlockingError> for ApiError {
    fn from(value: BlockingError) -> Self {
        ApiError::Internal(format!("blocking task failed: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body()).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[actix_web::test]
    async fn internal_details_are_not_leaked() {
        let (status, body) = body_of(ApiError::Internal("connection reset by peer".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": SERVER_ERROR }));
    }

    #[actix_web::test]
    async fn account_errors_map_to_client_statuses() {
        let (status, body) = body_of(AccountError::MissingFields.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Champs manquants");
        let (status, _) = body_of(AccountError::WrongPassword.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_conflicts_become_409() {
        let err = ApiError::from(StoreError::Conflict("users_username_key".into()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let err = ApiError::from(StoreError::Unavailable("timed out".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
