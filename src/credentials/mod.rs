//! Credential store: users, password verification and failed-login lockout.

pub mod models;
pub mod password;
pub mod repo;
pub mod service;

pub use models::User;
pub use repo::{PgUserStore, UserStore};
pub use service::{CredentialService, DEFAULT_LOCKOUT_THRESHOLD};
