use std::{collections::BTreeMap, time::Duration};

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failure of the underlying relational store. Opaque to callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreFault {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Error taxonomy of the account data layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("record not found")]
    NotFound,
    #[error("duplicate {0}")]
    DuplicateIdentifier(&'static str),
    #[error("edit conflict")]
    EditConflict,
    #[error("invalid credentials")]
    InvalidCredential,
    #[error("password hashing failed: {0}")]
    HashingFailure(String),
    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreFault),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::StoreFailure(StoreFault::Sqlx(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Field name to message, as collected by the validator.
pub type FieldErrors = BTreeMap<String, String>;

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Login failed: unknown email, wrong password.
    InvalidCredentials,
    /// Bearer token missing its scheme, unknown, expired or of the wrong scope.
    InvalidAuthenticationToken,
    AuthenticationRequired,
    InactiveAccount,
    NotPermitted,
    NotFound,
    EditConflict,
    FailedValidation(FieldErrors),
    Internal(Error),
}

impl ApiError {
    /// A validation failure on a single field.
    pub fn field(field: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), message.to_string());
        ApiError::FailedValidation(errors)
    }

    pub fn duplicate(field: &'static str) -> Self {
        Self::field(field, &format!("a user with this {field} already exists"))
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => ApiError::NotFound,
            Error::DuplicateIdentifier(field) => ApiError::duplicate(field),
            Error::EditConflict => ApiError::EditConflict,
            Error::InvalidCredential => ApiError::InvalidCredentials,
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = |status: StatusCode, msg: &str| {
            (status, Json(json!({ "error": msg }))).into_response()
        };
        match self {
            ApiError::InvalidCredentials => {
                message(StatusCode::UNAUTHORIZED, "invalid authentication credentials")
            }
            ApiError::InvalidAuthenticationToken => {
                let mut res = message(
                    StatusCode::UNAUTHORIZED,
                    "invalid or missing authentication token",
                );
                res.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    header::HeaderValue::from_static("Bearer"),
                );
                res
            }
            ApiError::AuthenticationRequired => message(
                StatusCode::UNAUTHORIZED,
                "you must be authenticated to access this resource",
            ),
            ApiError::InactiveAccount => message(
                StatusCode::FORBIDDEN,
                "your user account must be activated to access this resource",
            ),
            ApiError::NotPermitted => message(
                StatusCode::FORBIDDEN,
                "your user account doesn't have the necessary permissions to access this resource",
            ),
            ApiError::NotFound => message(
                StatusCode::NOT_FOUND,
                "the requested resource could not be found",
            ),
            ApiError::EditConflict => message(
                StatusCode::CONFLICT,
                "unable to update the record due to an edit conflict, please try again",
            ),
            ApiError::FailedValidation(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": errors })))
                    .into_response()
            }
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "the server encountered a problem and could not process your request",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_api_errors() {
        assert!(matches!(ApiError::from(Error::NotFound), ApiError::NotFound));
        assert!(matches!(
            ApiError::from(Error::EditConflict),
            ApiError::EditConflict
        ));
        assert!(matches!(
            ApiError::from(Error::InvalidCredential),
            ApiError::InvalidCredentials
        ));
        assert!(matches!(
            ApiError::from(Error::StoreFailure(StoreFault::Timeout(Duration::from_secs(3)))),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn duplicate_identifier_becomes_field_error() {
        match ApiError::from(Error::DuplicateIdentifier("email")) {
            ApiError::FailedValidation(errors) => {
                assert_eq!(
                    errors.get("email").map(String::as_str),
                    Some("a user with this email already exists")
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::EditConflict.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::FailedValidation(FieldErrors::new())
                .into_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        let res = ApiError::InvalidAuthenticationToken.into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
