use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    ControllerId, NewOccurrence, Occurrence, OccurrenceId, Pattern, PatternId, RosterAssignment,
    ScopeCode, ScopeSettings, Signup, StationId,
};

/// Result of an upsert keyed by `(pattern_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(Occurrence),
    Existing(Occurrence),
}

impl UpsertOutcome {
    pub fn occurrence(&self) -> &Occurrence {
        match self {
            UpsertOutcome::Inserted(occurrence) | UpsertOutcome::Existing(occurrence) => {
                occurrence
            }
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Storage abstraction for patterns, occurrences, signups, and roster assignments.
///
/// Implementations own the uniqueness rules: one occurrence per `(pattern, date)`,
/// one signup per `(occurrence, controller)`, one controller per `(occurrence, station)`
/// and at most one station per controller within an occurrence. Deleting an
/// occurrence removes its signups and assignments.
pub trait EventRepository: Send + Sync {
    fn insert_pattern(&self, pattern: Pattern) -> Result<Pattern, RepositoryError>;
    fn update_pattern(&self, pattern: Pattern) -> Result<(), RepositoryError>;
    fn fetch_pattern(&self, id: PatternId) -> Result<Option<Pattern>, RepositoryError>;
    fn list_patterns(&self) -> Result<Vec<Pattern>, RepositoryError>;

    fn upsert_scope(&self, settings: ScopeSettings) -> Result<(), RepositoryError>;
    fn scope_settings(&self, code: &ScopeCode) -> Result<Option<ScopeSettings>, RepositoryError>;

    fn upsert_occurrence(&self, occurrence: NewOccurrence)
        -> Result<UpsertOutcome, RepositoryError>;
    fn update_occurrence(&self, occurrence: Occurrence) -> Result<(), RepositoryError>;
    fn fetch_occurrence(&self, id: OccurrenceId) -> Result<Option<Occurrence>, RepositoryError>;
    fn occurrences_for_pattern(&self, id: PatternId) -> Result<Vec<Occurrence>, RepositoryError>;
    /// Occurrences whose start instant lies in `[from, to]`, ordered by start.
    fn occurrences_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, RepositoryError>;
    /// Delete every occurrence of `pattern` dated on or after `from`, returning the count.
    fn delete_occurrences_from(
        &self,
        pattern: PatternId,
        from: NaiveDate,
    ) -> Result<usize, RepositoryError>;

    fn insert_signup(&self, signup: Signup) -> Result<Signup, RepositoryError>;
    fn update_signup(&self, signup: Signup) -> Result<(), RepositoryError>;
    fn fetch_signup(
        &self,
        occurrence: OccurrenceId,
        controller: ControllerId,
    ) -> Result<Option<Signup>, RepositoryError>;
    fn delete_signup(
        &self,
        occurrence: OccurrenceId,
        controller: ControllerId,
    ) -> Result<Signup, RepositoryError>;
    fn signups_for(&self, occurrence: OccurrenceId) -> Result<Vec<Signup>, RepositoryError>;

    fn insert_assignment(
        &self,
        assignment: RosterAssignment,
    ) -> Result<RosterAssignment, RepositoryError>;
    fn delete_assignment(
        &self,
        occurrence: OccurrenceId,
        station: &StationId,
    ) -> Result<RosterAssignment, RepositoryError>;
    fn assignments_for(
        &self,
        occurrence: OccurrenceId,
    ) -> Result<Vec<RosterAssignment>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
