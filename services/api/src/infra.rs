use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_staffing::clock::Clock;
use event_staffing::config::SchedulingConfig;
use event_staffing::workflows::events::{
    CollaboratorError, ControllerId, DeadlineMonitor, FeasibilityChecker, LifecyclePolicy,
    MemoryEventStore, MemoryLedger, MonitorPolicy, NotificationSender, Occurrence,
    OccurrenceLifecycle, PatternExpander, PermissionChecker, QualificationGroup,
    QualificationLookup, QualificationProfile, QualificationRequest, RosterPublishedNotice,
    RosterService, ScopeCode, SignupService, StaffingAdvisory, StaffingApi,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub(crate) struct LoggingNotifier;

#[async_trait]
impl NotificationSender for LoggingNotifier {
    async fn send_roster_published(
        &self,
        notice: &RosterPublishedNotice,
    ) -> Result<(), CollaboratorError> {
        info!(
            occurrence_id = %notice.occurrence_id,
            controller_id = %notice.controller_id,
            station = ?notice.station.as_ref().map(|station| station.as_str()),
            "roster published notice"
        );
        Ok(())
    }

    async fn send_deadline_passed(&self, occurrence: &Occurrence) -> Result<(), CollaboratorError> {
        info!(
            occurrence_id = %occurrence.id,
            date = %occurrence.date,
            "signup deadline passed notice"
        );
        Ok(())
    }

    async fn send_staffing_advisory(
        &self,
        advisory: &StaffingAdvisory,
    ) -> Result<(), CollaboratorError> {
        info!(
            occurrence_id = %advisory.occurrence_id,
            signups = advisory.signups,
            required = advisory.required,
            feasible = advisory.feasibility.is_feasible,
            "staffing advisory"
        );
        Ok(())
    }
}

/// Grants `events.manage` on every scope to a fixed set of controllers.
#[derive(Debug, Default, Clone)]
pub(crate) struct AllowListPermissions {
    managers: HashSet<ControllerId>,
}

impl AllowListPermissions {
    pub(crate) fn new(managers: impl IntoIterator<Item = ControllerId>) -> Self {
        Self {
            managers: managers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PermissionChecker for AllowListPermissions {
    async fn has_permission(
        &self,
        controller: ControllerId,
        _scope: &ScopeCode,
        _permission: &str,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.managers.contains(&controller))
    }
}

/// Derives the qualification group from the network controller rating alone.
#[derive(Debug, Default, Clone)]
pub(crate) struct RatingQualifications;

pub(crate) fn group_for_rating(rating: u8) -> Option<QualificationGroup> {
    match rating {
        2 => Some(QualificationGroup::Gnd),
        3 => Some(QualificationGroup::Twr),
        4 => Some(QualificationGroup::App),
        5..=12 => Some(QualificationGroup::Ctr),
        _ => None,
    }
}

#[async_trait]
impl QualificationLookup for RatingQualifications {
    async fn lookup(
        &self,
        request: &QualificationRequest,
    ) -> Result<QualificationProfile, CollaboratorError> {
        Ok(QualificationProfile {
            group: group_for_rating(request.rating),
            restrictions: Vec::new(),
        })
    }
}

/// Shared store, collaborators, and scheduling settings behind every service.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) store: Arc<MemoryEventStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) permissions: Arc<dyn PermissionChecker>,
    pub(crate) qualifications: Arc<dyn QualificationLookup>,
    pub(crate) notifier: Arc<dyn NotificationSender>,
    pub(crate) ledger: Arc<MemoryLedger>,
    pub(crate) scheduling: SchedulingConfig,
}

impl Services {
    pub(crate) fn new(
        scheduling: SchedulingConfig,
        clock: Arc<dyn Clock>,
        managers: impl IntoIterator<Item = ControllerId>,
    ) -> Self {
        Self {
            store: Arc::new(MemoryEventStore::new()),
            clock,
            permissions: Arc::new(AllowListPermissions::new(managers)),
            qualifications: Arc::new(RatingQualifications),
            notifier: Arc::new(LoggingNotifier),
            ledger: Arc::new(MemoryLedger::default()),
            scheduling,
        }
    }

    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            auto_open_lead: self.scheduling.auto_open_lead(),
        }
    }

    pub(crate) fn api(&self) -> Arc<StaffingApi<MemoryEventStore>> {
        let timeout = self.scheduling.collaborator_timeout();
        Arc::new(StaffingApi::new(
            self.store.clone(),
            PatternExpander::new(
                self.store.clone(),
                self.clock.clone(),
                self.scheduling.expansion_horizon(),
            ),
            OccurrenceLifecycle::new(
                self.store.clone(),
                self.permissions.clone(),
                self.clock.clone(),
                self.policy(),
                timeout,
            ),
            FeasibilityChecker::new(self.store.clone()),
            DeadlineMonitor::new(
                self.store.clone(),
                self.notifier.clone(),
                self.ledger.clone(),
                self.clock.clone(),
                MonitorPolicy::default(),
                timeout,
            ),
            self.signups(),
            self.roster(),
        ))
    }

    pub(crate) fn signups(&self) -> SignupService<MemoryEventStore> {
        SignupService::new(
            self.store.clone(),
            self.qualifications.clone(),
            self.permissions.clone(),
            self.clock.clone(),
            self.policy(),
            self.scheduling.collaborator_timeout(),
        )
    }

    pub(crate) fn roster(&self) -> RosterService<MemoryEventStore> {
        RosterService::new(
            self.store.clone(),
            self.permissions.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.scheduling.collaborator_timeout(),
        )
    }
}

pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_instant_normalizes_offsets() {
        let instant = parse_instant("2025-03-06T20:00:00+01:00").expect("valid timestamp");
        assert_eq!(instant.to_rfc3339(), "2025-03-06T19:00:00+00:00");
        assert!(parse_instant("next friday").is_err());
    }

    #[test]
    fn ratings_map_onto_groups() {
        assert_eq!(group_for_rating(1), None);
        assert_eq!(group_for_rating(2), Some(QualificationGroup::Gnd));
        assert_eq!(group_for_rating(4), Some(QualificationGroup::App));
        assert_eq!(group_for_rating(7), Some(QualificationGroup::Ctr));
    }
}
