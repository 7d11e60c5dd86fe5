pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod service;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use error::PortalError;
pub use router::{PortalState, portal_router};
