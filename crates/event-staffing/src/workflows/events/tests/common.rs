use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use crate::clock::FixedClock;
use crate::workflows::events::collaborators::{
    CollaboratorError, NotificationSender, PermissionChecker, QualificationLookup,
    QualificationProfile, QualificationRequest, RosterPublishedNotice, StaffingAdvisory,
};
use crate::workflows::events::domain::{
    AirportList, ControllerId, Occurrence, OccurrenceId, Pattern, PatternId, ScopeCode,
    ScopeSettings, StationList,
};
use crate::workflows::events::{
    DeadlineMonitor, EventRepository, FeasibilityChecker, LifecyclePolicy, MemoryEventStore,
    MemoryLedger, MonitorPolicy, OccurrenceLifecycle, PatternExpander, QualificationGroup,
    RosterService, SignupService, StaffingApi,
};

pub(super) const MANAGER: ControllerId = ControllerId(900);

pub(super) fn scope() -> ScopeCode {
    ScopeCode("GER".to_string())
}

pub(super) fn instant(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, hour, 0, 0).unwrap()
}

pub(super) fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, month, day).expect("valid date")
}

/// Weekly Friday event at Frankfurt, 18:00 UTC, deadline 24 hours before start.
pub(super) fn friday_pattern() -> Pattern {
    Pattern {
        id: PatternId(1),
        scope: scope(),
        name: "Frankfurt Friday Night".to_string(),
        weekday: 4,
        weeks_on: 1,
        weeks_off: 0,
        start_date: date(1, 3),
        start_time: NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
        enabled: true,
        requires_roster: true,
        staffed_stations: StationList::new(["EDDF_APP", "EDDF_TWR", "EDDF_GND"]),
        airports: AirportList::new(["EDDF"]),
        signup_deadline_hours: 24,
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    roster: Mutex<Vec<RosterPublishedNotice>>,
    deadlines: Mutex<Vec<OccurrenceId>>,
    advisories: Mutex<Vec<StaffingAdvisory>>,
    failing: AtomicBool,
    failing_recipients: Mutex<HashSet<ControllerId>>,
    failing_occurrences: Mutex<HashSet<OccurrenceId>>,
}

impl RecordingNotifier {
    pub(super) fn roster(&self) -> Vec<RosterPublishedNotice> {
        self.roster.lock().expect("roster mutex").clone()
    }

    pub(super) fn deadlines(&self) -> Vec<OccurrenceId> {
        self.deadlines.lock().expect("deadline mutex").clone()
    }

    pub(super) fn advisories(&self) -> Vec<StaffingAdvisory> {
        self.advisories.lock().expect("advisory mutex").clone()
    }

    pub(super) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(super) fn fail_for(&self, controller: ControllerId) {
        self.failing_recipients
            .lock()
            .expect("recipient mutex")
            .insert(controller);
    }

    pub(super) fn fail_deadline_for(&self, occurrence: OccurrenceId) {
        self.failing_occurrences
            .lock()
            .expect("occurrence mutex")
            .insert(occurrence);
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CollaboratorError::Unavailable("mail relay down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_roster_published(
        &self,
        notice: &RosterPublishedNotice,
    ) -> Result<(), CollaboratorError> {
        self.check()?;
        if self
            .failing_recipients
            .lock()
            .expect("recipient mutex")
            .contains(&notice.controller_id)
        {
            return Err(CollaboratorError::Rejected("mailbox full".to_string()));
        }
        self.roster.lock().expect("roster mutex").push(notice.clone());
        Ok(())
    }

    async fn send_deadline_passed(&self, occurrence: &Occurrence) -> Result<(), CollaboratorError> {
        self.check()?;
        if self
            .failing_occurrences
            .lock()
            .expect("occurrence mutex")
            .contains(&occurrence.id)
        {
            return Err(CollaboratorError::Rejected("distribution list missing".to_string()));
        }
        self.deadlines
            .lock()
            .expect("deadline mutex")
            .push(occurrence.id);
        Ok(())
    }

    async fn send_staffing_advisory(
        &self,
        advisory: &StaffingAdvisory,
    ) -> Result<(), CollaboratorError> {
        self.check()?;
        self.advisories
            .lock()
            .expect("advisory mutex")
            .push(advisory.clone());
        Ok(())
    }
}

/// Grants `events.manage` to a fixed set of controllers.
#[derive(Default)]
pub(super) struct ScriptedPermissions {
    managers: Mutex<HashSet<ControllerId>>,
    unavailable: AtomicBool,
}

impl ScriptedPermissions {
    pub(super) fn with_managers(managers: &[ControllerId]) -> Self {
        let permissions = Self::default();
        permissions
            .managers
            .lock()
            .expect("manager mutex")
            .extend(managers.iter().copied());
        permissions
    }

    pub(super) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionChecker for ScriptedPermissions {
    async fn has_permission(
        &self,
        controller: ControllerId,
        _scope: &ScopeCode,
        _permission: &str,
    ) -> Result<bool, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("directory offline".to_string()));
        }
        Ok(self
            .managers
            .lock()
            .expect("manager mutex")
            .contains(&controller))
    }
}

/// Qualification lookup answering from a fixed table; unknown controllers fail.
#[derive(Default)]
pub(super) struct StubQualifications {
    groups: HashMap<ControllerId, QualificationGroup>,
    requests: Mutex<Vec<QualificationRequest>>,
}

impl StubQualifications {
    pub(super) fn with_groups(groups: &[(ControllerId, QualificationGroup)]) -> Self {
        Self {
            groups: groups.iter().copied().collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn requests(&self) -> Vec<QualificationRequest> {
        self.requests.lock().expect("request mutex").clone()
    }
}

#[async_trait]
impl QualificationLookup for StubQualifications {
    async fn lookup(
        &self,
        request: &QualificationRequest,
    ) -> Result<QualificationProfile, CollaboratorError> {
        self.requests
            .lock()
            .expect("request mutex")
            .push(request.clone());
        match self.groups.get(&request.controller_id) {
            Some(group) => Ok(QualificationProfile {
                group: Some(*group),
                restrictions: Vec::new(),
            }),
            None => Err(CollaboratorError::Rejected("unknown controller".to_string())),
        }
    }
}

pub(super) const CALL_TIMEOUT: StdDuration = StdDuration::from_millis(200);

/// Fully wired services over one in-memory store, with the clock at Monday
/// 2025-03-03 09:00 UTC.
pub(super) struct Harness {
    pub(super) store: Arc<MemoryEventStore>,
    pub(super) clock: FixedClock,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) permissions: Arc<ScriptedPermissions>,
    pub(super) qualifications: Arc<StubQualifications>,
    pub(super) ledger: Arc<MemoryLedger>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_groups(&[
            (ControllerId(1), QualificationGroup::App),
            (ControllerId(2), QualificationGroup::Twr),
            (ControllerId(3), QualificationGroup::Gnd),
            (ControllerId(4), QualificationGroup::Del),
        ])
    }

    pub(super) fn with_groups(groups: &[(ControllerId, QualificationGroup)]) -> Self {
        let store = Arc::new(MemoryEventStore::new());
        store
            .upsert_scope(ScopeSettings {
                code: scope(),
                automated_notifications: true,
            })
            .expect("scope stored");
        Self {
            store,
            clock: FixedClock::at(instant(3, 3, 9)),
            notifier: Arc::new(RecordingNotifier::default()),
            permissions: Arc::new(ScriptedPermissions::with_managers(&[MANAGER])),
            qualifications: Arc::new(StubQualifications::with_groups(groups)),
            ledger: Arc::new(MemoryLedger::default()),
        }
    }

    pub(super) fn expander(&self) -> PatternExpander<MemoryEventStore> {
        PatternExpander::new(
            self.store.clone(),
            Arc::new(self.clock.clone()),
            Duration::days(28),
        )
    }

    pub(super) fn lifecycle(&self) -> OccurrenceLifecycle<MemoryEventStore> {
        OccurrenceLifecycle::new(
            self.store.clone(),
            self.permissions.clone(),
            Arc::new(self.clock.clone()),
            LifecyclePolicy::default(),
            CALL_TIMEOUT,
        )
    }

    pub(super) fn signups(&self) -> SignupService<MemoryEventStore> {
        SignupService::new(
            self.store.clone(),
            self.qualifications.clone(),
            self.permissions.clone(),
            Arc::new(self.clock.clone()),
            LifecyclePolicy::default(),
            CALL_TIMEOUT,
        )
    }

    pub(super) fn roster(&self) -> RosterService<MemoryEventStore> {
        RosterService::new(
            self.store.clone(),
            self.permissions.clone(),
            self.notifier.clone(),
            Arc::new(self.clock.clone()),
            CALL_TIMEOUT,
        )
    }

    pub(super) fn monitor(&self) -> DeadlineMonitor<MemoryEventStore> {
        DeadlineMonitor::new(
            self.store.clone(),
            self.notifier.clone(),
            self.ledger.clone(),
            Arc::new(self.clock.clone()),
            MonitorPolicy::default(),
            CALL_TIMEOUT,
        )
    }

    pub(super) fn api(&self) -> Arc<StaffingApi<MemoryEventStore>> {
        Arc::new(StaffingApi::new(
            self.store.clone(),
            self.expander(),
            self.lifecycle(),
            FeasibilityChecker::new(self.store.clone()),
            self.monitor(),
            self.signups(),
            self.roster(),
        ))
    }

    /// Store the Friday pattern, expand it, and return its occurrences in date order.
    pub(super) fn seed(&self) -> Vec<Occurrence> {
        self.store
            .insert_pattern(friday_pattern())
            .expect("pattern stored");
        self.expander()
            .expand_pattern(PatternId(1))
            .expect("pattern expanded");
        self.store
            .occurrences_for_pattern(PatternId(1))
            .expect("occurrences listed")
    }

    pub(super) fn occurrence(&self, id: OccurrenceId) -> Occurrence {
        self.store
            .fetch_occurrence(id)
            .expect("fetch")
            .expect("occurrence exists")
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
