use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::Serialize;
use tracing::{info, warn};

use super::collaborators::{
    bounded, ensure_permitted, NotificationSender, PermissionChecker, RosterPublishedNotice,
    MANAGE_EVENTS,
};
use super::domain::{
    ControllerId, Occurrence, OccurrenceId, Pattern, RosterAssignment, StationId,
    ValidationError,
};
use super::error::EventError;
use super::repository::EventRepository;
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub controller_id: ControllerId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub occurrence: Occurrence,
    pub already_published: bool,
    pub delivered: Vec<ControllerId>,
    pub failures: Vec<DeliveryFailure>,
}

/// Station assignments and roster publication. Every operation requires
/// `events.manage` on the pattern's scope.
pub struct RosterService<R> {
    repository: Arc<R>,
    permissions: Arc<dyn PermissionChecker>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    call_timeout: StdDuration,
}

impl<R> RosterService<R>
where
    R: EventRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        permissions: Arc<dyn PermissionChecker>,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            repository,
            permissions,
            notifier,
            clock,
            call_timeout,
        }
    }

    pub async fn assign(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
        station: StationId,
        controller: ControllerId,
    ) -> Result<RosterAssignment, EventError> {
        let (_, pattern) = self.authorized(actor, occurrence_id).await?;

        if !pattern.staffed_stations.contains(&station) {
            return Err(ValidationError::UnknownStation(station).into());
        }
        if self
            .repository
            .fetch_signup(occurrence_id, controller)?
            .is_none()
        {
            return Err(EventError::Conflict(format!(
                "controller {controller} has not signed up for occurrence {occurrence_id}"
            )));
        }

        let assignment = self.repository.insert_assignment(RosterAssignment {
            occurrence_id,
            station,
            controller_id: controller,
        })?;
        info!(
            occurrence_id = %occurrence_id,
            station = %assignment.station,
            controller_id = %controller,
            "station assigned"
        );
        Ok(assignment)
    }

    pub async fn unassign(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
        station: &StationId,
    ) -> Result<RosterAssignment, EventError> {
        self.authorized(actor, occurrence_id).await?;
        Ok(self.repository.delete_assignment(occurrence_id, station)?)
    }

    pub fn roster(&self, occurrence_id: OccurrenceId) -> Result<Vec<RosterAssignment>, EventError> {
        Ok(self.repository.assignments_for(occurrence_id)?)
    }

    /// Mark the roster published and notify every signup holder.
    ///
    /// Delivery failures are reported and never roll back the publication.
    /// Publishing an already published roster sends nothing.
    pub async fn publish(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
    ) -> Result<PublishReport, EventError> {
        let (mut occurrence, _) = self.authorized(actor, occurrence_id).await?;

        if occurrence.roster_published {
            return Ok(PublishReport {
                occurrence,
                already_published: true,
                delivered: Vec::new(),
                failures: Vec::new(),
            });
        }

        occurrence.roster_published = true;
        occurrence.roster_published_at = Some(self.clock.now());
        self.repository.update_occurrence(occurrence.clone())?;

        let stations: HashMap<ControllerId, StationId> = self
            .repository
            .assignments_for(occurrence_id)?
            .into_iter()
            .map(|assignment| (assignment.controller_id, assignment.station))
            .collect();

        let mut delivered = Vec::new();
        let mut failures = Vec::new();
        for signup in self.repository.signups_for(occurrence_id)? {
            let notice = RosterPublishedNotice {
                occurrence_id,
                controller_id: signup.controller_id,
                station: stations.get(&signup.controller_id).cloned(),
            };
            match bounded(
                "roster notification",
                self.call_timeout,
                self.notifier.send_roster_published(&notice),
            )
            .await
            {
                Ok(()) => delivered.push(signup.controller_id),
                Err(err) => {
                    warn!(
                        occurrence_id = %occurrence_id,
                        controller_id = %signup.controller_id,
                        error = %err,
                        "roster notification failed"
                    );
                    failures.push(DeliveryFailure {
                        controller_id: signup.controller_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            occurrence_id = %occurrence_id,
            delivered = delivered.len(),
            failed = failures.len(),
            "roster published"
        );
        Ok(PublishReport {
            occurrence,
            already_published: false,
            delivered,
            failures,
        })
    }

    pub async fn unpublish(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
    ) -> Result<Occurrence, EventError> {
        let (mut occurrence, _) = self.authorized(actor, occurrence_id).await?;
        occurrence.roster_published = false;
        occurrence.roster_published_at = None;
        self.repository.update_occurrence(occurrence.clone())?;
        info!(occurrence_id = %occurrence_id, %actor, "roster unpublished");
        Ok(occurrence)
    }

    async fn authorized(
        &self,
        actor: ControllerId,
        occurrence_id: OccurrenceId,
    ) -> Result<(Occurrence, Pattern), EventError> {
        let occurrence = self
            .repository
            .fetch_occurrence(occurrence_id)?
            .ok_or(EventError::NotFound)?;
        let pattern = self
            .repository
            .fetch_pattern(occurrence.pattern_id)?
            .ok_or(EventError::NotFound)?;
        ensure_permitted(
            self.permissions.as_ref(),
            self.call_timeout,
            actor,
            &pattern.scope,
            MANAGE_EVENTS,
        )
        .await?;
        Ok((occurrence, pattern))
    }
}
