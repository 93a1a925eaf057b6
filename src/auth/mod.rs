//! Per-connection authorization.
//!
//! The [`AuthorizationHook`] checks presented SSH public keys against an
//! account, resolves the account's server, and returns a [`Decision`] whose
//! JSON form is the hook's only output.

pub mod decision;
pub mod fingerprint;
pub mod hook;

pub use decision::{Decision, DenyReason};
pub use hook::AuthorizationHook;
