use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    ControllerId, NewOccurrence, Occurrence, OccurrenceId, Pattern, PatternId, RosterAssignment,
    ScopeCode, ScopeSettings, Signup, StationId,
};
use super::repository::{EventRepository, RepositoryError, UpsertOutcome};

#[derive(Debug, Default)]
struct StoreState {
    patterns: BTreeMap<PatternId, Pattern>,
    scopes: HashMap<ScopeCode, ScopeSettings>,
    occurrences: BTreeMap<OccurrenceId, Occurrence>,
    by_date: HashMap<(PatternId, NaiveDate), OccurrenceId>,
    signups: BTreeMap<(OccurrenceId, ControllerId), Signup>,
    assignments: BTreeMap<(OccurrenceId, StationId), RosterAssignment>,
    next_occurrence: u64,
}

impl StoreState {
    fn remove_occurrence(&mut self, id: OccurrenceId) {
        if let Some(occurrence) = self.occurrences.remove(&id) {
            self.by_date
                .remove(&(occurrence.pattern_id, occurrence.date));
        }
        self.signups.retain(|(occurrence, _), _| *occurrence != id);
        self.assignments.retain(|(occurrence, _), _| *occurrence != id);
    }
}

/// Mutex-guarded store used by the API service and tests.
///
/// Every operation takes the single lock, so the `(pattern, date)` upsert and the
/// cascade on occurrence deletion are atomic.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("event store mutex poisoned".to_string()))
    }
}

impl EventRepository for MemoryEventStore {
    fn insert_pattern(&self, pattern: Pattern) -> Result<Pattern, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.patterns.contains_key(&pattern.id) {
            return Err(RepositoryError::Conflict(format!(
                "pattern {} already exists",
                pattern.id
            )));
        }
        guard.patterns.insert(pattern.id, pattern.clone());
        Ok(pattern)
    }

    fn update_pattern(&self, pattern: Pattern) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        match guard.patterns.get_mut(&pattern.id) {
            Some(slot) => {
                *slot = pattern;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_pattern(&self, id: PatternId) -> Result<Option<Pattern>, RepositoryError> {
        Ok(self.lock()?.patterns.get(&id).cloned())
    }

    fn list_patterns(&self) -> Result<Vec<Pattern>, RepositoryError> {
        Ok(self.lock()?.patterns.values().cloned().collect())
    }

    fn upsert_scope(&self, settings: ScopeSettings) -> Result<(), RepositoryError> {
        self.lock()?.scopes.insert(settings.code.clone(), settings);
        Ok(())
    }

    fn scope_settings(&self, code: &ScopeCode) -> Result<Option<ScopeSettings>, RepositoryError> {
        Ok(self.lock()?.scopes.get(code).cloned())
    }

    fn upsert_occurrence(
        &self,
        occurrence: NewOccurrence,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let mut guard = self.lock()?;
        let key = (occurrence.pattern_id, occurrence.date);
        if let Some(existing) = guard
            .by_date
            .get(&key)
            .and_then(|id| guard.occurrences.get(id))
        {
            return Ok(UpsertOutcome::Existing(existing.clone()));
        }

        guard.next_occurrence += 1;
        let id = OccurrenceId(guard.next_occurrence);
        let stored = Occurrence::from_new(id, occurrence);
        guard.by_date.insert(key, id);
        guard.occurrences.insert(id, stored.clone());
        Ok(UpsertOutcome::Inserted(stored))
    }

    fn update_occurrence(&self, occurrence: Occurrence) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        let Some(slot) = guard.occurrences.get_mut(&occurrence.id) else {
            return Err(RepositoryError::NotFound);
        };
        if slot.pattern_id != occurrence.pattern_id || slot.date != occurrence.date {
            return Err(RepositoryError::Conflict(format!(
                "occurrence {} cannot move to another pattern or date",
                occurrence.id
            )));
        }
        *slot = occurrence;
        Ok(())
    }

    fn fetch_occurrence(&self, id: OccurrenceId) -> Result<Option<Occurrence>, RepositoryError> {
        Ok(self.lock()?.occurrences.get(&id).cloned())
    }

    fn occurrences_for_pattern(&self, id: PatternId) -> Result<Vec<Occurrence>, RepositoryError> {
        let guard = self.lock()?;
        let mut occurrences: Vec<Occurrence> = guard
            .occurrences
            .values()
            .filter(|occurrence| occurrence.pattern_id == id)
            .cloned()
            .collect();
        occurrences.sort_by_key(|occurrence| occurrence.date);
        Ok(occurrences)
    }

    fn occurrences_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, RepositoryError> {
        let guard = self.lock()?;
        let mut occurrences: Vec<Occurrence> = guard
            .occurrences
            .values()
            .filter(|occurrence| occurrence.starts_at >= from && occurrence.starts_at <= to)
            .cloned()
            .collect();
        occurrences.sort_by_key(|occurrence| (occurrence.starts_at, occurrence.id));
        Ok(occurrences)
    }

    fn delete_occurrences_from(
        &self,
        pattern: PatternId,
        from: NaiveDate,
    ) -> Result<usize, RepositoryError> {
        let mut guard = self.lock()?;
        let doomed: Vec<OccurrenceId> = guard
            .occurrences
            .values()
            .filter(|occurrence| occurrence.pattern_id == pattern && occurrence.date >= from)
            .map(|occurrence| occurrence.id)
            .collect();
        for id in &doomed {
            guard.remove_occurrence(*id);
        }
        Ok(doomed.len())
    }

    fn insert_signup(&self, signup: Signup) -> Result<Signup, RepositoryError> {
        let mut guard = self.lock()?;
        if !guard.occurrences.contains_key(&signup.occurrence_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (signup.occurrence_id, signup.controller_id);
        if guard.signups.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "controller {} already signed up for occurrence {}",
                signup.controller_id, signup.occurrence_id
            )));
        }
        guard.signups.insert(key, signup.clone());
        Ok(signup)
    }

    fn update_signup(&self, signup: Signup) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        match guard
            .signups
            .get_mut(&(signup.occurrence_id, signup.controller_id))
        {
            Some(slot) => {
                *slot = signup;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_signup(
        &self,
        occurrence: OccurrenceId,
        controller: ControllerId,
    ) -> Result<Option<Signup>, RepositoryError> {
        Ok(self.lock()?.signups.get(&(occurrence, controller)).cloned())
    }

    fn delete_signup(
        &self,
        occurrence: OccurrenceId,
        controller: ControllerId,
    ) -> Result<Signup, RepositoryError> {
        self.lock()?
            .signups
            .remove(&(occurrence, controller))
            .ok_or(RepositoryError::NotFound)
    }

    fn signups_for(&self, occurrence: OccurrenceId) -> Result<Vec<Signup>, RepositoryError> {
        let guard = self.lock()?;
        let mut signups: Vec<Signup> = guard
            .signups
            .values()
            .filter(|signup| signup.occurrence_id == occurrence)
            .cloned()
            .collect();
        signups.sort_by_key(|signup| (signup.created_at, signup.controller_id));
        Ok(signups)
    }

    fn insert_assignment(
        &self,
        assignment: RosterAssignment,
    ) -> Result<RosterAssignment, RepositoryError> {
        let mut guard = self.lock()?;
        if !guard.occurrences.contains_key(&assignment.occurrence_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (assignment.occurrence_id, assignment.station.clone());
        if guard.assignments.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "station {} is already assigned",
                assignment.station
            )));
        }
        let double_booked = guard.assignments.values().any(|existing| {
            existing.occurrence_id == assignment.occurrence_id
                && existing.controller_id == assignment.controller_id
        });
        if double_booked {
            return Err(RepositoryError::Conflict(format!(
                "controller {} already holds a station",
                assignment.controller_id
            )));
        }
        guard.assignments.insert(key, assignment.clone());
        Ok(assignment)
    }

    fn delete_assignment(
        &self,
        occurrence: OccurrenceId,
        station: &StationId,
    ) -> Result<RosterAssignment, RepositoryError> {
        self.lock()?
            .assignments
            .remove(&(occurrence, station.clone()))
            .ok_or(RepositoryError::NotFound)
    }

    fn assignments_for(
        &self,
        occurrence: OccurrenceId,
    ) -> Result<Vec<RosterAssignment>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .assignments
            .values()
            .filter(|assignment| assignment.occurrence_id == occurrence)
            .cloned()
            .collect())
    }
}
