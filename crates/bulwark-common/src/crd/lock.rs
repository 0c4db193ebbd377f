//! Lock CRD for administrative revocation
//!
//! A Lock revokes access for every principal its target selects. Connections
//! whose lock targets match a lock in force are refused at admission and
//! terminated if they are already open.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lock revokes access for the principals selected by its target.
///
/// Example:
/// ```yaml
/// apiVersion: bulwark.dev/v1alpha1
/// kind: Lock
/// metadata:
///   name: offboard-alice
/// spec:
///   target:
///     user: alice
///   message: Offboarding in progress
///   expires: "2026-11-01T00:00:00Z"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "bulwark.dev",
    version = "v1alpha1",
    kind = "Lock",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Expires","type":"date","jsonPath":".spec.expires"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LockSpec {
    /// Principals this lock applies to
    pub target: LockTarget,

    /// Message shown to locked-out principals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the lock stops being in force (never, if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl Lock {
    /// Whether the lock is in force at `now`
    ///
    /// A lock without an expiry is in force until deleted.
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        match self.spec.expires {
            Some(expires) => expires > now,
            None => true,
        }
    }

    /// Lock target
    pub fn target(&self) -> &LockTarget {
        &self.spec.target
    }

    /// Lock message, if any
    pub fn message(&self) -> Option<&str> {
        self.spec.message.as_deref().filter(|m| !m.is_empty())
    }

    /// Resource name, or empty string for unnamed locks
    pub fn lock_name(&self) -> String {
        self.name_any()
    }
}

/// Selector for the principals a lock applies to
///
/// Every non-empty field must match for the lock to apply. An empty target
/// selects nothing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct LockTarget {
    /// User name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Role name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// OS login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    /// Node (server) identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// MFA device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_device: Option<String>,

    /// Windows desktop name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_desktop: Option<String>,

    /// Access request ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_request: Option<String>,

    /// Trusted device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl LockTarget {
    /// Target selecting a user
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: Some(name.into()),
            ..Default::default()
        }
    }

    /// Target selecting a role
    pub fn role(name: impl Into<String>) -> Self {
        Self {
            role: Some(name.into()),
            ..Default::default()
        }
    }

    /// Target selecting a node
    pub fn node(id: impl Into<String>) -> Self {
        Self {
            node: Some(id.into()),
            ..Default::default()
        }
    }

    /// Target selecting an MFA device
    pub fn mfa_device(id: impl Into<String>) -> Self {
        Self {
            mfa_device: Some(id.into()),
            ..Default::default()
        }
    }

    fn fields(&self) -> [(&'static str, Option<&str>); 8] {
        [
            ("user", self.user.as_deref()),
            ("role", self.role.as_deref()),
            ("login", self.login.as_deref()),
            ("node", self.node.as_deref()),
            ("mfa_device", self.mfa_device.as_deref()),
            ("windows_desktop", self.windows_desktop.as_deref()),
            ("access_request", self.access_request.as_deref()),
            ("device", self.device.as_deref()),
        ]
    }

    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.fields()
            .iter()
            .all(|(_, v)| v.map_or(true, str::is_empty))
    }

    /// Whether this selector applies to `candidate`
    ///
    /// Every non-empty field of `self` must equal the corresponding field of
    /// `candidate`. Empty selectors never match.
    pub fn selects(&self, candidate: &LockTarget) -> bool {
        if self.is_empty() {
            return false;
        }
        self.fields()
            .iter()
            .zip(candidate.fields().iter())
            .all(|((_, want), (_, have))| match want {
                Some(want) if !want.is_empty() => *have == Some(*want),
                _ => true,
            })
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields()
            .iter()
            .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| format!("{}:{}", k, v)))
            .collect();
        if parts.is_empty() {
            f.write_str("<empty>")
        } else {
            f.write_str(&parts.join(","))
        }
    }
}
