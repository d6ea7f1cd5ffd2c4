//! Identity admission for `join-document`.
//!
//! The core trusts whatever identity a client claims. Deployments that can
//! verify identities (session cookie, signed token, …) plug in their own
//! [`IdentityVerifier`]; room and relay logic never change.

use thiserror::Error;

use crate::protocol::Identity;
use crate::registry::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("identity '{0}' rejected")]
    Rejected(String),
}

/// Called by the hub before admitting a join.
///
/// Returns the identity to register, which may differ from the claimed one
/// (e.g. a display name filled in from a directory).
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, connection: ConnectionId, claimed: Identity) -> Result<Identity, VerifyError>;
}

/// Accepts every claimed identity unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustCallerIdentity;

impl IdentityVerifier for TrustCallerIdentity {
    fn verify(&self, _connection: ConnectionId, claimed: Identity) -> Result<Identity, VerifyError> {
        Ok(claimed)
    }
}
