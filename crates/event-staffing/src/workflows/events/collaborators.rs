//! Outbound collaborators: qualification lookup, permission checks, notifications.
//!
//! Every call is wrapped by [`bounded`]; a slow or failing collaborator turns into a
//! [`DependencyError`] that callers downgrade to a fallback value or a report entry.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{ControllerId, Occurrence, OccurrenceId, ScopeCode, StationId};
use super::error::EventError;
use super::feasibility::FeasibilityResult;
use super::qualification::QualificationGroup;

/// Grants signup deadline bypass, status overrides, and roster management.
pub const MANAGE_EVENTS: &str = "events.manage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationRequest {
    pub controller_id: ControllerId,
    pub rating: u8,
    pub airport: Option<String>,
    pub scope: ScopeCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationProfile {
    pub group: Option<QualificationGroup>,
    #[serde(default)]
    pub restrictions: Vec<String>,
}

#[async_trait]
pub trait QualificationLookup: Send + Sync {
    async fn lookup(
        &self,
        request: &QualificationRequest,
    ) -> Result<QualificationProfile, CollaboratorError>;
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn has_permission(
        &self,
        controller: ControllerId,
        scope: &ScopeCode,
        permission: &str,
    ) -> Result<bool, CollaboratorError>;
}

/// Per-recipient payload sent when a roster goes out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterPublishedNotice {
    pub occurrence_id: OccurrenceId,
    pub controller_id: ControllerId,
    pub station: Option<StationId>,
}

/// Non-mutating warning that an upcoming occurrence is short of signups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffingAdvisory {
    pub occurrence_id: OccurrenceId,
    pub signups: usize,
    pub required: usize,
    pub feasibility: FeasibilityResult,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_roster_published(
        &self,
        notice: &RosterPublishedNotice,
    ) -> Result<(), CollaboratorError>;
    async fn send_deadline_passed(&self, occurrence: &Occurrence) -> Result<(), CollaboratorError>;
    async fn send_staffing_advisory(
        &self,
        advisory: &StaffingAdvisory,
    ) -> Result<(), CollaboratorError>;
}

/// Failure reported by a collaborator implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

/// Recoverable failure of an external call, including timeouts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u128,
    },
    #[error("{operation} failed: {source}")]
    Failed {
        operation: &'static str,
        #[source]
        source: CollaboratorError,
    },
}

pub async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, DependencyError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(DependencyError::Failed { operation, source }),
        Err(_) => Err(DependencyError::Timeout {
            operation,
            after_ms: limit.as_millis(),
        }),
    }
}

/// Permission check that degrades to "not permitted" on failure or timeout.
pub(crate) async fn permitted(
    checker: &dyn PermissionChecker,
    limit: Duration,
    controller: ControllerId,
    scope: &ScopeCode,
    permission: &'static str,
) -> bool {
    match bounded(
        "permission check",
        limit,
        checker.has_permission(controller, scope, permission),
    )
    .await
    {
        Ok(granted) => granted,
        Err(err) => {
            warn!(%controller, %scope, permission, error = %err, "permission check failed; denying");
            false
        }
    }
}

/// Fail with [`EventError::Permission`] unless `actor` holds `permission` on `scope`.
pub(crate) async fn ensure_permitted(
    checker: &dyn PermissionChecker,
    limit: Duration,
    actor: ControllerId,
    scope: &ScopeCode,
    permission: &'static str,
) -> Result<(), EventError> {
    if permitted(checker, limit, actor, scope, permission).await {
        Ok(())
    } else {
        Err(EventError::Permission {
            controller: actor,
            scope: scope.clone(),
            permission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_values_through() {
        let value = bounded("echo", Duration::from_millis(50), async { Ok(7) })
            .await
            .expect("value returned");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn bounded_maps_collaborator_failures() {
        let result: Result<(), _> = bounded("notify", Duration::from_millis(50), async {
            Err(CollaboratorError::Unavailable("smtp down".to_string()))
        })
        .await;
        assert!(matches!(
            result,
            Err(DependencyError::Failed {
                operation: "notify",
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_slow_calls() {
        let result: Result<(), _> = bounded("lookup", Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(DependencyError::Timeout {
                operation: "lookup",
                after_ms: 20
            })
        );
    }
}
