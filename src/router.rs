use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use std::sync::Arc;

use crate::handlers::{database, domain};
use crate::service::{CommandExecutor, QueryService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct PortalState {
    pub executor: Arc<CommandExecutor>,
    pub query: Arc<QueryService>,
    pub admin_key: Arc<str>,
}

impl PortalState {
    pub fn new(executor: CommandExecutor, query: QueryService, admin_key: &str) -> Self {
        Self {
            executor: Arc::new(executor),
            query: Arc::new(query),
            admin_key: Arc::from(admin_key),
        }
    }
}

pub fn portal_router(state: PortalState, body_limit: usize) -> Router {
    Router::new()
        // databases and database users
        .route("/api/v1/database", post(database::create_database))
        .route("/api/v1/database/list", get(database::list_databases))
        .route("/api/v1/database/stats", get(database::database_summary))
        .route(
            "/api/v1/database/users",
            get(database::list_users).post(database::create_user),
        )
        .route(
            "/api/v1/database/users/{name}/{host}",
            delete(database::delete_user),
        )
        .route(
            "/api/v1/database/users/{name}/{host}/grants",
            put(database::update_user_grants),
        )
        .route(
            "/api/v1/database/{name}",
            get(database::get_database).delete(database::delete_database),
        )
        .route(
            "/api/v1/database/{name}/refresh",
            post(database::refresh_database),
        )
        // domains and dns
        .route(
            "/api/v1/domains",
            get(domain::list_domains).post(domain::create_domain),
        )
        .route("/api/v1/domains/stats", get(domain::domain_summary))
        .route(
            "/api/v1/domains/{domain}",
            get(domain::get_domain)
                .patch(domain::update_domain)
                .delete(domain::delete_domain),
        )
        .route(
            "/api/v1/domains/{domain}/dns",
            get(domain::list_dns_records).put(domain::upsert_dns_record),
        )
        .route(
            "/api/v1/domains/{domain}/dns/{id}",
            delete(domain::delete_dns_record),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
