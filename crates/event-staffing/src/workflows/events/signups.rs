use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::collaborators::{
    bounded, ensure_permitted, permitted, PermissionChecker, QualificationLookup,
    QualificationRequest, MANAGE_EVENTS,
};
use super::domain::{ControllerId, Occurrence, OccurrenceId, Pattern, Signup};
use super::error::EventError;
use super::lifecycle::{effective_status, LifecyclePolicy};
use super::qualification::QualificationGroup;
use super::repository::EventRepository;
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub controller_id: ControllerId,
    pub rating: u8,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Creates, edits, and withdraws signups.
///
/// Controllers act on their own signup while the occurrence is effectively open.
/// Holders of `events.manage` on the pattern's scope may act on anyone's signup
/// and ignore the deadline.
pub struct SignupService<R> {
    repository: Arc<R>,
    qualifications: Arc<dyn QualificationLookup>,
    permissions: Arc<dyn PermissionChecker>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    call_timeout: StdDuration,
}

impl<R> SignupService<R>
where
    R: EventRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        qualifications: Arc<dyn QualificationLookup>,
        permissions: Arc<dyn PermissionChecker>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            repository,
            qualifications,
            permissions,
            clock,
            policy,
            call_timeout,
        }
    }

    pub async fn sign_up(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
        request: SignupRequest,
    ) -> Result<Signup, EventError> {
        let (occurrence, pattern) = self.load(occurrence_id)?;
        self.gate(actor, request.controller_id, &occurrence, &pattern)
            .await?;

        let qualification_group = self
            .qualification(request.controller_id, request.rating, &pattern)
            .await;

        let signup = Signup {
            occurrence_id,
            controller_id: request.controller_id,
            qualification_group,
            remarks: request.remarks,
            created_at: self.clock.now(),
        };
        let stored = self.repository.insert_signup(signup)?;
        info!(
            occurrence_id = %occurrence_id,
            controller_id = %stored.controller_id,
            group = ?stored.qualification_group,
            "signup recorded"
        );
        Ok(stored)
    }

    pub async fn update_remarks(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
        controller: ControllerId,
        remarks: Option<String>,
    ) -> Result<Signup, EventError> {
        let (occurrence, pattern) = self.load(occurrence_id)?;
        self.gate(actor, controller, &occurrence, &pattern).await?;

        let mut signup = self
            .repository
            .fetch_signup(occurrence_id, controller)?
            .ok_or(EventError::NotFound)?;
        signup.remarks = remarks;
        self.repository.update_signup(signup.clone())?;
        Ok(signup)
    }

    /// Remove a signup together with any roster assignment the controller held.
    pub async fn withdraw(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
        controller: ControllerId,
    ) -> Result<Signup, EventError> {
        let (occurrence, pattern) = self.load(occurrence_id)?;
        self.gate(actor, controller, &occurrence, &pattern).await?;

        if self
            .repository
            .fetch_signup(occurrence_id, controller)?
            .is_none()
        {
            return Err(EventError::NotFound);
        }
        // Assignments go first so a failure never leaves one without its signup.
        for assignment in self.repository.assignments_for(occurrence_id)? {
            if assignment.controller_id == controller {
                self.repository
                    .delete_assignment(occurrence_id, &assignment.station)?;
            }
        }
        let removed = self.repository.delete_signup(occurrence_id, controller)?;
        info!(occurrence_id = %occurrence_id, controller_id = %controller, "signup withdrawn");
        Ok(removed)
    }

    pub fn list(&self, occurrence_id: OccurrenceId) -> Result<Vec<Signup>, EventError> {
        Ok(self.repository.signups_for(occurrence_id)?)
    }

    fn load(&self, occurrence_id: OccurrenceId) -> Result<(Occurrence, Pattern), EventError> {
        let occurrence = self
            .repository
            .fetch_occurrence(occurrence_id)?
            .ok_or(EventError::NotFound)?;
        let pattern = self
            .repository
            .fetch_pattern(occurrence.pattern_id)?
            .ok_or(EventError::NotFound)?;
        Ok((occurrence, pattern))
    }

    async fn gate(
        &self,
        actor: ControllerId,
        subject: ControllerId,
        occurrence: &Occurrence,
        pattern: &Pattern,
    ) -> Result<(), EventError> {
        let status = effective_status(occurrence, &self.policy, self.clock.now());

        if actor != subject {
            return ensure_permitted(
                self.permissions.as_ref(),
                self.call_timeout,
                actor,
                &pattern.scope,
                MANAGE_EVENTS,
            )
            .await;
        }
        if status.is_open {
            return Ok(());
        }

        if permitted(
            self.permissions.as_ref(),
            self.call_timeout,
            actor,
            &pattern.scope,
            MANAGE_EVENTS,
        )
        .await
        {
            info!(occurrence_id = %occurrence.id, %actor, "deadline bypassed by manager");
            Ok(())
        } else {
            Err(EventError::SignupClosed {
                occurrence: occurrence.id,
                reason: status.reason,
            })
        }
    }

    /// Qualification group for `controller`, or `None` when the lookup fails.
    async fn qualification(
        &self,
        controller: ControllerId,
        rating: u8,
        pattern: &Pattern,
    ) -> Option<QualificationGroup> {
        let request = QualificationRequest {
            controller_id: controller,
            rating,
            airport: pattern.airports.primary().map(str::to_string),
            scope: pattern.scope.clone(),
        };

        match bounded(
            "qualification lookup",
            self.call_timeout,
            self.qualifications.lookup(&request),
        )
        .await
        {
            Ok(profile) => profile.group,
            Err(err) => {
                warn!(controller_id = %controller, error = %err, "qualification lookup failed; treating as unqualified");
                None
            }
        }
    }
}
