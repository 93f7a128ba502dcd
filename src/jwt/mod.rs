//! Offline-verifiable license assertions and raw Ed25519 helpers.

mod claims;
mod signing;

pub use claims::*;
pub use signing::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("signing key unavailable: {0}")]
    SigningUnavailable(String),

    #[error("failed to sign token: {0}")]
    Sign(String),

    #[error("{0}")]
    Verify(String),
}
