//! # Gatekeep (gateway-backed login and provisioning)
//!
//! `gatekeep` authenticates users against secrets held by an API gateway,
//! throttles repeated login failures, and keeps local account rows paired with
//! gateway consumers and rate-limit profiles.
//!
//! ## Login
//!
//! A login fetches the gateway consumer, checks the password against the
//! Argon2 hash stored in its `jwt-auth` block, checks the local account status
//! and signs an HS256 token with that same per-account secret. Rotating the
//! secret (a password change) invalidates every older token.
//!
//! Failures are counted per `(username, address)` in a sliding window; reaching
//! the threshold locks the key for a fixed period. Ledger errors abort the
//! request, the throttle never fails open.
//!
//! ## Provisioning
//!
//! The gateway has no multi-resource transactions, so account and profile
//! changes are ordered sagas:
//!
//! - **Accounts:** profile check, local insert, gateway consumer; a refused
//!   consumer removes the local row again.
//! - **Profiles:** a rename writes the new group before deleting the old one;
//!   a failed delete leaves an orphan that is logged for manual cleanup.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod breach;
pub mod cli;
pub mod email;
pub mod error;
pub mod gateway;
pub mod profiles;
pub mod throttle;

#[cfg(test)]
mod test_support;

pub use self::error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
