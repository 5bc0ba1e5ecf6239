//! # Gardisto (Auth & Refresh-Token Security Core)
//!
//! `gardisto` is an authentication service built around rotating refresh
//! tokens. It verifies passwords, issues device-scoped token families and
//! watches every rotation for signs of token theft.
//!
//! ## Token Families
//!
//! Each login starts a family of single-use refresh tokens on one device.
//! A refresh supersedes the presented token and mints its successor inside
//! the same family, so at any time exactly one token per family is current.
//! Presenting a superseded token is either a benign retry (same client,
//! within a short window) or reuse:
//!
//! - **Benign retry:** the already-issued successor is returned again.
//! - **Late replay from the same client:** the family is revoked.
//! - **Replay from another IP or device fingerprint:** every token the user
//!   has on that device is revoked and a high-severity alert is raised.
//!
//! ## Sessions
//!
//! Short-lived session state (display name, organisation, role) travels in
//! an encrypted cookie; the server stores nothing. An unreadable or expired
//! cookie simply means "no session", never an error.
//!
//! ## Lockout
//!
//! Failed logins are counted per user. At the configured threshold the
//! account is deactivated and stays deactivated until an operator steps in.
//! A successful login resets the counter.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod cli;
pub mod credentials;
pub mod errors;
pub mod session;
pub mod tokens;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
