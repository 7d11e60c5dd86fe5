pub mod auth;

pub use auth::{RequireAdminKey, ensure_authorized};
