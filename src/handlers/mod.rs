//! HTTP handlers. Each one checks the admin key, decodes the request, calls
//! the executor or query service and maps the result onto a status code.

pub mod database;
pub mod domain;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::PortalError;
use crate::service::validation::ValidationError;
use crate::types::Outcome;

/// Unwrap a JSON body, turning malformed input into a validation error on
/// the `body` field.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, PortalError> {
    match body {
        Ok(Json(v)) => Ok(v),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(PortalError::PayloadTooLarge)
        }
        Err(rejection) => Err(ValidationError::new("body", rejection.body_text()).into()),
    }
}

/// `201` for a fresh resource, `200` for an update or an idempotent replay.
pub(crate) fn outcome_response<T: Serialize>(outcome: Outcome<T>) -> Response {
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(outcome.into_inner())).into_response()
}
