//! Periodic deadline sweep.
//!
//! For every unpublished occurrence in the window whose scope has opted into
//! automated notification, the sweep closes signups once the deadline has passed
//! (explicit `Open` overrides included) and sends one "deadline passed" notice,
//! guarded by the idempotency ledger. Deadlines older than the notification
//! grace period are marked handled without notifying. Independently, occurrences
//! starting 24 to 36 hours out with fewer signups than stations get a staffing
//! advisory.
//!
//! Each occurrence is processed in isolation; failures land in the report. A
//! failed delivery leaves the ledger untouched so the next sweep retries it.
//! Callers must not run two sweeps concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::collaborators::{bounded, NotificationSender, StaffingAdvisory};
use super::domain::{Occurrence, OccurrenceId, Pattern, PatternId, ScopeCode, SignupStatus};
use super::feasibility::{assess, SignupCandidate};
use super::ledger::{advisory_key, deadline_key, IdempotencyLedger};
use super::repository::{EventRepository, RepositoryError};
use crate::clock::Clock;

/// Occurrences whose start lies in `[now - lookback, now + lookahead]` are swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepWindow {
    pub lookback: Duration,
    pub lookahead: Duration,
}

impl Default for SweepWindow {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            lookahead: Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    /// Deadlines older than this are marked handled without a notification.
    pub notify_grace: Duration,
    pub ledger_ttl: Duration,
    pub advisory_from: Duration,
    pub advisory_until: Duration,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            notify_grace: Duration::hours(24),
            ledger_ttl: Duration::days(7),
            advisory_from: Duration::hours(24),
            advisory_until: Duration::hours(36),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
    Listing,
    Lookup,
    StatusWrite,
    Ledger,
    DeadlineNotification,
    StaffingAdvisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub occurrence_id: Option<OccurrenceId>,
    pub stage: SweepStage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub examined: usize,
    pub skipped_published: usize,
    pub skipped_scope: usize,
    pub evicted: usize,
    pub closed: Vec<OccurrenceId>,
    pub notified: Vec<OccurrenceId>,
    pub suppressed: Vec<OccurrenceId>,
    pub advisories: Vec<OccurrenceId>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn new(now: DateTime<Utc>, window: SweepWindow) -> Self {
        Self {
            started_at: now,
            window_start: now - window.lookback,
            window_end: now + window.lookahead,
            examined: 0,
            skipped_published: 0,
            skipped_scope: 0,
            evicted: 0,
            closed: Vec::new(),
            notified: Vec::new(),
            suppressed: Vec::new(),
            advisories: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, occurrence: Option<OccurrenceId>, stage: SweepStage, error: impl ToString) {
        let error = error.to_string();
        warn!(occurrence_id = ?occurrence.map(|id| id.0), ?stage, %error, "sweep step failed");
        self.failures.push(SweepFailure {
            occurrence_id: occurrence,
            stage,
            error,
        });
    }
}

pub struct DeadlineMonitor<R> {
    repository: Arc<R>,
    notifier: Arc<dyn NotificationSender>,
    ledger: Arc<dyn IdempotencyLedger>,
    clock: Arc<dyn Clock>,
    policy: MonitorPolicy,
    call_timeout: StdDuration,
}

/// Per-sweep memo of pattern and scope lookups.
#[derive(Default)]
struct SweepCache {
    patterns: HashMap<PatternId, Pattern>,
    scopes: HashMap<ScopeCode, bool>,
}

impl<R> DeadlineMonitor<R>
where
    R: EventRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        notifier: Arc<dyn NotificationSender>,
        ledger: Arc<dyn IdempotencyLedger>,
        clock: Arc<dyn Clock>,
        policy: MonitorPolicy,
        call_timeout: StdDuration,
    ) -> Self {
        Self {
            repository,
            notifier,
            ledger,
            clock,
            policy,
            call_timeout,
        }
    }

    /// Sweep the default window at the clock's current instant.
    pub async fn sweep(&self) -> SweepReport {
        self.run_sweep(self.clock.now(), SweepWindow::default()).await
    }

    pub async fn run_sweep(&self, now: DateTime<Utc>, window: SweepWindow) -> SweepReport {
        let mut report = SweepReport::new(now, window);

        match self.ledger.evict(now) {
            Ok(evicted) => report.evicted = evicted,
            Err(err) => report.fail(None, SweepStage::Ledger, err),
        }

        let occurrences = match self
            .repository
            .occurrences_starting_between(report.window_start, report.window_end)
        {
            Ok(occurrences) => occurrences,
            Err(err) => {
                report.fail(None, SweepStage::Listing, err);
                return report;
            }
        };

        let mut cache = SweepCache::default();
        for occurrence in occurrences {
            report.examined += 1;
            if occurrence.roster_published {
                report.skipped_published += 1;
                continue;
            }

            let pattern = match self.pattern(&mut cache, occurrence.pattern_id) {
                Ok(pattern) => pattern,
                Err(err) => {
                    report.fail(Some(occurrence.id), SweepStage::Lookup, err);
                    continue;
                }
            };
            match self.opted_in(&mut cache, &pattern.scope) {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped_scope += 1;
                    continue;
                }
                Err(err) => {
                    report.fail(Some(occurrence.id), SweepStage::Lookup, err);
                    continue;
                }
            }

            self.apply_deadline(occurrence.clone(), now, &mut report).await;
            self.advise_staffing(&occurrence, &pattern, now, &mut report).await;
        }

        info!(
            examined = report.examined,
            closed = report.closed.len(),
            notified = report.notified.len(),
            advisories = report.advisories.len(),
            failures = report.failures.len(),
            "deadline sweep finished"
        );
        report
    }

    async fn apply_deadline(
        &self,
        mut occurrence: Occurrence,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let Some(deadline) = occurrence.signup_deadline else {
            return;
        };
        if now < deadline {
            return;
        }

        if matches!(
            occurrence.signup_status,
            SignupStatus::Auto | SignupStatus::Open
        ) {
            occurrence.signup_status = SignupStatus::Closed;
            if let Err(err) = self.repository.update_occurrence(occurrence.clone()) {
                report.fail(Some(occurrence.id), SweepStage::StatusWrite, err);
                return;
            }
            info!(occurrence_id = %occurrence.id, %deadline, "signups closed at deadline");
            report.closed.push(occurrence.id);
        }

        let key = deadline_key(occurrence.id);
        match self.ledger.get(&key, now) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                report.fail(Some(occurrence.id), SweepStage::Ledger, err);
                return;
            }
        }

        if now - deadline > self.policy.notify_grace {
            debug!(occurrence_id = %occurrence.id, "deadline too old to announce; marking handled");
            match self.ledger.set(&key, now, self.policy.ledger_ttl) {
                Ok(()) => report.suppressed.push(occurrence.id),
                Err(err) => report.fail(Some(occurrence.id), SweepStage::Ledger, err),
            }
            return;
        }

        let delivery = bounded(
            "deadline notification",
            self.call_timeout,
            self.notifier.send_deadline_passed(&occurrence),
        )
        .await;
        match delivery {
            Ok(()) => match self.ledger.set(&key, now, self.policy.ledger_ttl) {
                Ok(()) => report.notified.push(occurrence.id),
                Err(err) => report.fail(Some(occurrence.id), SweepStage::Ledger, err),
            },
            Err(err) => report.fail(Some(occurrence.id), SweepStage::DeadlineNotification, err),
        }
    }

    async fn advise_staffing(
        &self,
        occurrence: &Occurrence,
        pattern: &Pattern,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let lead = occurrence.starts_at - now;
        if lead < self.policy.advisory_from || lead > self.policy.advisory_until {
            return;
        }

        let signups = match self.repository.signups_for(occurrence.id) {
            Ok(signups) => signups,
            Err(err) => {
                report.fail(Some(occurrence.id), SweepStage::Lookup, err);
                return;
            }
        };
        let required = pattern.staffed_stations.len();
        if signups.len() >= required {
            return;
        }

        let key = advisory_key(occurrence.id);
        match self.ledger.get(&key, now) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                report.fail(Some(occurrence.id), SweepStage::Ledger, err);
                return;
            }
        }

        let candidates: Vec<SignupCandidate> = signups.iter().map(SignupCandidate::from).collect();
        let advisory = StaffingAdvisory {
            occurrence_id: occurrence.id,
            signups: signups.len(),
            required,
            feasibility: assess(pattern.staffed_stations.as_slice(), &candidates),
        };

        let delivery = bounded(
            "staffing advisory",
            self.call_timeout,
            self.notifier.send_staffing_advisory(&advisory),
        )
        .await;
        match delivery {
            Ok(()) => match self.ledger.set(&key, now, self.policy.ledger_ttl) {
                Ok(()) => report.advisories.push(occurrence.id),
                Err(err) => report.fail(Some(occurrence.id), SweepStage::Ledger, err),
            },
            Err(err) => report.fail(Some(occurrence.id), SweepStage::StaffingAdvisory, err),
        }
    }

    fn pattern(&self, cache: &mut SweepCache, id: PatternId) -> Result<Pattern, RepositoryError> {
        if let Some(pattern) = cache.patterns.get(&id) {
            return Ok(pattern.clone());
        }
        let pattern = self
            .repository
            .fetch_pattern(id)?
            .ok_or(RepositoryError::NotFound)?;
        cache.patterns.insert(id, pattern.clone());
        Ok(pattern)
    }

    fn opted_in(&self, cache: &mut SweepCache, scope: &ScopeCode) -> Result<bool, RepositoryError> {
        if let Some(opted) = cache.scopes.get(scope) {
            return Ok(*opted);
        }
        let opted = self
            .repository
            .scope_settings(scope)?
            .is_some_and(|settings| settings.automated_notifications);
        cache.scopes.insert(scope.clone(), opted);
        Ok(opted)
    }
}
