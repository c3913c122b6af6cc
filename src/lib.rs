//! srcprotect library crate: private certificate authority, revocation list,
//! and the sign-then-encrypt envelope used to exchange files between its users.
//!
//! Modules are public so that `tests/` integration tests can drive the CA and
//! the envelope directly via `use srcprotect::...`.
pub mod ca;
pub mod cert;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod registry;
pub mod session;

pub use error::{Result, SrcprotectError};
