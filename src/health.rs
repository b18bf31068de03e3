//! Health and authorization status
//!
//! The health projection is a pure function of an acquisition outcome:
//! success means healthy, any classified failure means unhealthy. `Unknown`
//! is only ever the pre-first-check default, and `Degraded` belongs to
//! composite rollups outside this engine; neither is produced here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClassifiedError;

/// Coarse per-server health verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No acquisition has been attempted yet
    #[default]
    Unknown,

    /// Last acquisition succeeded
    Healthy,

    /// Reserved for composite rollups; never produced by this engine
    Degraded,

    /// Last acquisition failed
    Unhealthy,
}

/// Authorization state of a remote server.
///
/// The acquisition engine only reads this to gate connection attempts, and
/// writes `Error` on an authorization-classified failure. Every other
/// transition belongs to the authorization collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    /// Not signed in
    #[default]
    Unauthorized,

    /// Holding usable credentials
    Authorized,

    /// A token refresh is in flight
    Refreshing,

    /// The last refresh or request was rejected
    Error,
}

/// The health verdict derived from one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Verdict
    pub status: HealthStatus,

    /// When the attempt finished
    pub last_checked_at: DateTime<Utc>,
}

/// Project an acquisition outcome to a health verdict.
pub fn project<T>(outcome: &Result<T, ClassifiedError>) -> HealthReport {
    HealthReport {
        status: match outcome {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        },
        last_checked_at: Utc::now(),
    }
}
