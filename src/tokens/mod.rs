//! Refresh-token families: issuance, rotation, revocation and reuse handling.

pub mod models;
pub mod repo;
pub mod reuse;
pub mod service;
pub mod sweep;

pub use models::{ClientContext, IssuedToken, NewRefreshToken, RefreshToken};
pub use repo::{PgTokenStore, SupersedeOutcome, TokenStore};
pub use service::{TokenFamilyManager, TokenPolicy};
pub use sweep::{SweepConfig, spawn_sweep_worker};
