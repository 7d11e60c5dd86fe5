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
use crate::service::validation::ValidationError;
use crate::types::{
    DnsRecord, DnsRecordInput, Domain, DomainPatch, DomainSummary, ListFilter, NewDomain,
};

pub async fn list_domains(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Domain>>, PortalError> {
    Ok(Json(state.query.list_domains(&filter).await?))
}

pub async fn create_domain(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    body: Result<Json<NewDomain>, JsonRejection>,
) -> Result<Response, PortalError> {
    let req = json_body(body)?;
    Ok(outcome_response(state.executor.create_domain(req).await?))
}

pub async fn domain_summary(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
) -> Result<Json<DomainSummary>, PortalError> {
    Ok(Json(state.query.domain_summary().await?))
}

pub async fn get_domain(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(domain): Path<String>,
) -> Result<Json<Domain>, PortalError> {
    Ok(Json(state.query.get_domain(&domain).await?))
}

pub async fn update_domain(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(domain): Path<String>,
    body: Result<Json<DomainPatch>, JsonRejection>,
) -> Result<Response, PortalError> {
    let patch = json_body(body)?;
    Ok(outcome_response(
        state.executor.update_domain(&domain, patch).await?,
    ))
}

pub async fn delete_domain(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(domain): Path<String>,
) -> Result<StatusCode, PortalError> {
    state.executor.delete_domain(&domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_dns_records(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(domain): Path<String>,
) -> Result<Json<Vec<DnsRecord>>, PortalError> {
    Ok(Json(state.query.list_dns_records(&domain).await?))
}

pub async fn upsert_dns_record(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path(domain): Path<String>,
    body: Result<Json<DnsRecordInput>, JsonRejection>,
) -> Result<Response, PortalError> {
    let input = json_body(body)?;
    Ok(outcome_response(
        state.executor.upsert_dns_record(&domain, input).await?,
    ))
}

pub async fn delete_dns_record(
    _auth: RequireAdminKey,
    State(state): State<PortalState>,
    Path((domain, id)): Path<(String, String)>,
) -> Result<StatusCode, PortalError> {
    let id: i64 = id
        .parse()
        .map_err(|_| ValidationError::new("id", "record id must be an integer"))?;
    state.executor.delete_dns_record(&domain, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
