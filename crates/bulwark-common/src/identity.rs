//! Authenticated identity of a connection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crd::LockTarget;

/// Authenticated principal behind a connection
///
/// Built once the client certificate has been verified and never mutated
/// afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User name
    pub username: String,
    /// Roles granted by the certificate
    #[serde(default)]
    pub roles: Vec<String>,
    /// Certificate expiry
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    /// Expiry of the session certificate this one was issued against
    ///
    /// Set when a short-lived MFA-elevated certificate was carved from a
    /// longer-lived session.
    #[serde(default)]
    pub previous_identity_expires: Option<DateTime<Utc>>,
    /// MFA device that verified this certificate, if any
    #[serde(default)]
    pub mfa_verified: Option<String>,
}

impl Identity {
    /// Create an identity for a user with no roles or expiry
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Whether the certificate was MFA-verified
    pub fn is_mfa_verified(&self) -> bool {
        self.mfa_verified.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// Lock targets that apply to this identity
    ///
    /// One target for the user, one per role, and one for the MFA device when
    /// the certificate was MFA-verified.
    pub fn lock_targets(&self) -> Vec<LockTarget> {
        let mut targets = Vec::with_capacity(self.roles.len() + 2);
        if !self.username.is_empty() {
            targets.push(LockTarget::user(&self.username));
        }
        targets.extend(
            self.roles
                .iter()
                .filter(|r| !r.is_empty())
                .map(LockTarget::role),
        );
        if let Some(device) = self.mfa_verified.as_deref().filter(|d| !d.is_empty()) {
            targets.push(LockTarget::mfa_device(device));
        }
        targets
    }
}
