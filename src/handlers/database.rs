use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
};

use super::{json_body, outcome_response};
use crate::error::PortalError;
use crate::middleware::RequireAdminKey;
use crate::router::PortalState;
use crate::types::{
    Database, DatabaseSummary, DatabaseUser, GrantsUpdate, ListFilter, NewDatabase,
    NewDatabaseUser,
};

pub async fn list_databases(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Database>>, PortalError> {
    Ok(Json(state.query.list_databases(&filter).await?))
}

pub async fn create_database(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    body: Result<Json<NewDatabase>, JsonRejection>,
) -> Result<Response, PortalError> {
    let req = json_body(body)?;
    Ok(outcome_response(state.executor.create_database(req).await?))
}

pub async fn get_database(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(name): Path<String>,
) -> Result<Json<Database>, PortalError> {
    Ok(Json(state.query.get_database(&name).await?))
}

pub async fn refresh_database(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(name): Path<String>,
) -> Result<Json<Database>, PortalError> {
    Ok(Json(state.query.refresh_database(&name).await?))
}

pub async fn delete_database(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(name): Path<String>,
) -> Result<StatusCode, PortalError> {
    state.executor.delete_database(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn database_summary(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
) -> Result<Json<DatabaseSummary>, PortalError> {
    Ok(Json(state.query.database_summary().await?))
}

pub async fn list_users(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<DatabaseUser>>, PortalError> {
    Ok(Json(state.query.list_users(&filter).await?))
}

pub async fn create_user(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    body: Result<Json<NewDatabaseUser>, JsonRejection>,
) -> Result<Response, PortalError> {
    let req = json_body(body)?;
    Ok(outcome_response(state.executor.create_user(req).await?))
}

pub async fn update_user_grants(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path((name, host)): Path<(String, String)>,
    body: Result<Json<GrantsUpdate>, JsonRejection>,
) -> Result<Response, PortalError> {
    let req = json_body(body)?;
    let outcome = state
        .executor
        .update_user_grants(&name, &host, req.grants)
        .await?;
    Ok(outcome_response(outcome))
}

pub async fn delete_user(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path((name, host)): Path<(String, String)>,
) -> Result<StatusCode, PortalError> {
    state.executor.delete_user(&name, &host).await?;
    Ok(StatusCode::NO_CONTENT)
}
