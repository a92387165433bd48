use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{Occurrence, Pattern, PatternId, ValidationError};
use super::error::EventError;
use super::repository::EventRepository;
use crate::clock::Clock;

/// Every date on or before `until` that `pattern` schedules.
///
/// Starts from the first date on or after `start_date` falling on the pattern's
/// weekday and walks one week at a time. Week 0 of the cycle is that first
/// matching week; weeks `0..weeks_on` of every `weeks_on + weeks_off` cycle are on.
pub fn occurrence_dates(
    pattern: &Pattern,
    until: NaiveDate,
) -> Result<Vec<NaiveDate>, ValidationError> {
    pattern.validate()?;
    let weekday = pattern.chrono_weekday()?;

    let target = i64::from(weekday.num_days_from_monday());
    let current = i64::from(pattern.start_date.weekday().num_days_from_monday());
    let offset = (target - current + 7) % 7;

    let cycle_length = pattern.cycle_length();
    let weeks_on = u64::from(pattern.weeks_on);
    let mut dates = Vec::new();
    let Some(mut date) = pattern.start_date.checked_add_signed(Duration::days(offset)) else {
        return Ok(dates);
    };
    let mut week_in_cycle: u64 = 0;

    while date <= until {
        if week_in_cycle < weeks_on && date >= pattern.start_date {
            dates.push(date);
        }
        match date.checked_add_signed(Duration::days(7)) {
            Some(next) => date = next,
            None => break,
        }
        week_in_cycle = (week_in_cycle + 1) % cycle_length;
    }

    Ok(dates)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionOutcome {
    pub pattern_id: Option<PatternId>,
    pub inserted: usize,
    pub existing: usize,
    pub removed: usize,
    pub retimed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpansionFailure {
    pub pattern_id: PatternId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionReport {
    pub outcomes: Vec<ExpansionOutcome>,
    pub failures: Vec<ExpansionFailure>,
}

impl ExpansionReport {
    pub fn inserted(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.inserted).sum()
    }
}

/// Upserts occurrences for patterns over a rolling horizon.
pub struct PatternExpander<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    horizon: Duration,
}

impl<R> PatternExpander<R>
where
    R: EventRepository + 'static,
{
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>, horizon: Duration) -> Self {
        Self {
            repository,
            clock,
            horizon,
        }
    }

    pub fn expand_pattern(&self, id: PatternId) -> Result<ExpansionOutcome, EventError> {
        let pattern = self
            .repository
            .fetch_pattern(id)?
            .ok_or(EventError::NotFound)?;
        self.expand(&pattern)
    }

    /// Store a new pattern and expand it right away.
    pub fn create_pattern(&self, pattern: Pattern) -> Result<ExpansionOutcome, EventError> {
        pattern.validate()?;
        let stored = self.repository.insert_pattern(pattern)?;
        info!(pattern_id = %stored.id, scope = %stored.scope, "pattern created");
        self.expand(&stored)
    }

    pub fn fetch_pattern(&self, id: PatternId) -> Result<Pattern, EventError> {
        self.repository
            .fetch_pattern(id)?
            .ok_or(EventError::NotFound)
    }

    /// Stored occurrences of a pattern in date order.
    pub fn occurrences(&self, id: PatternId) -> Result<Vec<Occurrence>, EventError> {
        self.fetch_pattern(id)?;
        Ok(self.repository.occurrences_for_pattern(id)?)
    }

    /// Insert any missing future occurrences. Existing rows are never touched.
    pub fn expand(&self, pattern: &Pattern) -> Result<ExpansionOutcome, EventError> {
        pattern.validate()?;

        let mut outcome = ExpansionOutcome {
            pattern_id: Some(pattern.id),
            ..ExpansionOutcome::default()
        };
        if !pattern.enabled {
            debug!(pattern_id = %pattern.id, "pattern disabled; skipping expansion");
            return Ok(outcome);
        }

        let today = self.clock.now().date_naive();
        let until = today + self.horizon;

        for date in occurrence_dates(pattern, until)? {
            if date < today {
                continue;
            }
            if self
                .repository
                .upsert_occurrence(pattern.occurrence_on(date)?)?
                .was_inserted()
            {
                outcome.inserted += 1;
            } else {
                outcome.existing += 1;
            }
        }

        if outcome.inserted > 0 {
            info!(
                pattern_id = %pattern.id,
                inserted = outcome.inserted,
                existing = outcome.existing,
                "pattern expanded"
            );
        }
        Ok(outcome)
    }

    /// Store a changed pattern and bring its future occurrences in line.
    ///
    /// A shape change (weekday, cycle, start date) drops every occurrence dated
    /// today or later, with their signups and assignments, and regenerates them.
    /// A timing change only recomputes start and deadline on future occurrences
    /// whose roster is not published. Past occurrences are never modified.
    pub fn update_pattern(&self, next: Pattern) -> Result<ExpansionOutcome, EventError> {
        next.validate()?;
        let previous = self
            .repository
            .fetch_pattern(next.id)?
            .ok_or(EventError::NotFound)?;
        self.repository.update_pattern(next.clone())?;

        let today = self.clock.now().date_naive();
        let mut removed = 0;
        let mut retimed = 0;

        if previous.shape_differs(&next) {
            removed = self.repository.delete_occurrences_from(next.id, today)?;
            info!(pattern_id = %next.id, removed, "pattern shape changed; regenerating future occurrences");
        } else if previous.timing_differs(&next) {
            for mut occurrence in self.repository.occurrences_for_pattern(next.id)? {
                if occurrence.date < today || occurrence.roster_published {
                    continue;
                }
                occurrence.starts_at = next.starts_at(occurrence.date);
                occurrence.signup_deadline = next.signup_deadline(occurrence.date)?;
                self.repository.update_occurrence(occurrence)?;
                retimed += 1;
            }
        }

        let mut outcome = self.expand(&next)?;
        outcome.removed = removed;
        outcome.retimed = retimed;
        Ok(outcome)
    }

    /// Expand every enabled pattern; one failing pattern does not stop the rest.
    pub fn expand_all(&self) -> Result<ExpansionReport, EventError> {
        let mut report = ExpansionReport::default();
        for pattern in self.repository.list_patterns()? {
            if !pattern.enabled {
                continue;
            }
            match self.expand(&pattern) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    warn!(pattern_id = %pattern.id, error = %err, "pattern expansion failed");
                    report.failures.push(ExpansionFailure {
                        pattern_id: pattern.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}
