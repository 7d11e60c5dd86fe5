use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use subtle::ConstantTimeEq;

use crate::error::PortalError;
use crate::router::PortalState;

/// Check the admin key on an inbound request.
/// Accepts either:
/// - Header: `x-admin-key: ...`
/// - Header: `Authorization: Bearer ...`
///
/// An empty `expected` key disables the check.
pub fn ensure_authorized(headers: &HeaderMap, expected: &str) -> Result<(), PortalError> {
    if expected.is_empty() {
        return Ok(());
    }
    let matches = |candidate: &str| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()));

    if let Some(hv) = headers.get("x-admin-key").and_then(|v| v.to_str().ok())
        && matches(hv.trim())
    {
        return Ok(());
    }

    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let auth = auth.trim();
        if let Some(token) = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            && matches(token.trim())
        {
            return Ok(());
        }
    }

    Err(PortalError::Unauthorized)
}

/// Extractor guarding every `/api/v1` handler.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdminKey;

impl FromRequestParts<PortalState> for RequireAdminKey {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &PortalState,
    ) -> Result<Self, Self::Rejection> {
        ensure_authorized(&parts.headers, &state.admin_key)?;
        Ok(Self)
    }
}
