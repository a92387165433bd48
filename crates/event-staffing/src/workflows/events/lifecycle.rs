//! Signup availability of an occurrence.
//!
//! The stored `signup_status` is only an override. Whether signups are open is
//! recomputed on every read from the override, the deadline, the roster flag, and
//! the auto-open window:
//!
//! 1. a published roster closes signups regardless of the override;
//! 2. `Closed` closes;
//! 3. `Open` opens until the deadline passes;
//! 4. `Auto` opens `auto_open_lead` before the deadline (or the start when no
//!    deadline is set) and closes at that instant.
//!
//! Overrides are immediate and unconditional. The deadline sweep is the only
//! automatic writer.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::collaborators::{ensure_permitted, PermissionChecker, MANAGE_EVENTS};
use super::domain::{ControllerId, Occurrence, OccurrenceId, ScopeCode, SignupStatus};
use super::error::EventError;
use super::repository::EventRepository;
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
    RosterPublished,
    ClosedByOverride,
    OpenedByOverride,
    DeadlinePassed,
    EventStarted,
    NotYetOpen,
    WithinSignupWindow,
}

impl StatusReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::RosterPublished => "roster has been published",
            Self::ClosedByOverride => "closed by an administrator",
            Self::OpenedByOverride => "opened by an administrator",
            Self::DeadlinePassed => "signup deadline has passed",
            Self::EventStarted => "event has started",
            Self::NotYetOpen => "signups are not open yet",
            Self::WithinSignupWindow => "within the signup window",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveStatus {
    pub is_open: bool,
    pub reason: StatusReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opens_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closes_at: Option<DateTime<Utc>>,
}

impl EffectiveStatus {
    fn closed(reason: StatusReason) -> Self {
        Self {
            is_open: false,
            reason,
            opens_at: None,
            closes_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub auto_open_lead: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            auto_open_lead: Duration::days(14),
        }
    }
}

pub fn effective_status(
    occurrence: &Occurrence,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> EffectiveStatus {
    if occurrence.roster_published {
        return EffectiveStatus::closed(StatusReason::RosterPublished);
    }

    match occurrence.signup_status {
        SignupStatus::Closed => EffectiveStatus::closed(StatusReason::ClosedByOverride),
        SignupStatus::Open if occurrence.deadline_passed(now) => {
            EffectiveStatus::closed(StatusReason::DeadlinePassed)
        }
        SignupStatus::Open => EffectiveStatus {
            is_open: true,
            reason: StatusReason::OpenedByOverride,
            opens_at: None,
            closes_at: occurrence.signup_deadline,
        },
        SignupStatus::Auto => {
            let closes_at = occurrence.signup_deadline.unwrap_or(occurrence.starts_at);
            let opens_at = closes_at - policy.auto_open_lead;

            if now >= closes_at {
                let reason = if occurrence.signup_deadline.is_some() {
                    StatusReason::DeadlinePassed
                } else {
                    StatusReason::EventStarted
                };
                EffectiveStatus::closed(reason)
            } else if now < opens_at {
                EffectiveStatus {
                    is_open: false,
                    reason: StatusReason::NotYetOpen,
                    opens_at: Some(opens_at),
                    closes_at: Some(closes_at),
                }
            } else {
                EffectiveStatus {
                    is_open: true,
                    reason: StatusReason::WithinSignupWindow,
                    opens_at: None,
                    closes_at: Some(closes_at),
                }
            }
        }
    }
}

/// Reads effective status through the injected clock and applies admin overrides.
pub struct OccurrenceLifecycle<R> {
    repository: Arc<R>,
    permissions: Arc<dyn PermissionChecker>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    call_timeout: StdDuration,
}

impl<R> OccurrenceLifecycle<R>
where
    R: EventRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        permissions: Arc<dyn PermissionChecker>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            repository,
            permissions,
            clock,
            policy,
            call_timeout,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn status(&self, occurrence: &Occurrence) -> EffectiveStatus {
        effective_status(occurrence, &self.policy, self.clock.now())
    }

    pub fn status_of(&self, id: OccurrenceId) -> Result<EffectiveStatus, EventError> {
        let occurrence = self.fetch(id)?;
        Ok(self.status(&occurrence))
    }

    /// Set the stored override. Requires manage rights on the pattern's scope.
    pub async fn override_status(
        &self,
        actor: ControllerId,
        id: OccurrenceId,
        status: SignupStatus,
    ) -> Result<Occurrence, EventError> {
        let mut occurrence = self.fetch(id)?;
        let pattern = self
            .repository
            .fetch_pattern(occurrence.pattern_id)?
            .ok_or(EventError::NotFound)?;

        self.ensure_manager(actor, &pattern.scope).await?;

        let previous = occurrence.signup_status;
        occurrence.signup_status = status;
        self.repository.update_occurrence(occurrence.clone())?;
        info!(
            occurrence_id = %id,
            %actor,
            from = previous.label(),
            to = status.label(),
            "signup status overridden"
        );
        Ok(occurrence)
    }

    /// Fail unless `actor` holds manage rights on `scope`.
    pub async fn ensure_manager(
        &self,
        actor: ControllerId,
        scope: &ScopeCode,
    ) -> Result<(), EventError> {
        ensure_permitted(
            self.permissions.as_ref(),
            self.call_timeout,
            actor,
            scope,
            MANAGE_EVENTS,
        )
        .await
    }

    fn fetch(&self, id: OccurrenceId) -> Result<Occurrence, EventError> {
        self.repository
            .fetch_occurrence(id)?
            .ok_or(EventError::NotFound)
    }
}
