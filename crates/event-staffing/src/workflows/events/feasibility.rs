//! Decides whether a one-controller-per-station roster can exist for an occurrence.
//!
//! Two passes: a per-station staffability check, then a greedy assignment that
//! walks stations from the most senior tier down and hands each one the first
//! unassigned qualified controller. The greedy pass does not backtrack, so a
//! combination that only a different ordering would satisfy is reported as a
//! conflict. The result is advisory and never blocks signups.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::domain::{ControllerId, OccurrenceId, Signup, StationId};
use super::qualification::{can_staff, extract_group, minimum_group, QualificationGroup};
use super::repository::{EventRepository, RepositoryError};

/// The slice of a signup that matters for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignupCandidate {
    pub controller_id: ControllerId,
    pub qualification_group: Option<QualificationGroup>,
}

impl From<&Signup> for SignupCandidate {
    fn from(signup: &Signup) -> Self {
        Self {
            controller_id: signup.controller_id,
            qualification_group: signup.qualification_group,
        }
    }
}

/// A station that is staffable on its own but lost every qualified controller
/// to a more senior station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationConflict {
    pub station: StationId,
    pub required_group: QualificationGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeasibilityResult {
    pub is_feasible: bool,
    pub total_signups: usize,
    pub required_count: usize,
    pub assigned_count: usize,
    pub unstaffable_stations: Vec<StationId>,
    pub conflicts: Vec<StationConflict>,
    pub reasons: Vec<String>,
}

/// Evaluate `required` stations against the current `signups`.
pub fn assess(required: &[StationId], signups: &[SignupCandidate]) -> FeasibilityResult {
    let mut reasons = Vec::new();

    let unstaffable_stations = unstaffable(required, signups, &mut reasons);

    let mut ordered: Vec<(&StationId, QualificationGroup)> = required
        .iter()
        .filter_map(|station| extract_group(station).map(|group| (station, group)))
        .collect();
    // Stable: stations of equal tier keep their configured order.
    ordered.sort_by(|a, b| b.1.rank().cmp(&a.1.rank()));

    let mut consumed: HashSet<ControllerId> = HashSet::new();
    let mut assigned_count = 0;
    let mut conflicts = Vec::new();

    for (station, group) in ordered {
        let candidate = signups.iter().find(|signup| {
            !consumed.contains(&signup.controller_id)
                && can_staff(signup.qualification_group, Some(group))
        });

        match candidate {
            Some(signup) => {
                consumed.insert(signup.controller_id);
                assigned_count += 1;
            }
            None if !unstaffable_stations.contains(station) => {
                reasons.push(format!(
                    "{station} ({}) is staffable alone but every qualified controller is needed for a higher station",
                    group.label()
                ));
                conflicts.push(StationConflict {
                    station: station.clone(),
                    required_group: group,
                });
            }
            None => {}
        }
    }

    if signups.len() < required.len() {
        reasons.push(format!(
            "{} signup(s) for {} required station(s)",
            signups.len(),
            required.len()
        ));
    }

    FeasibilityResult {
        is_feasible: unstaffable_stations.is_empty() && assigned_count == required.len(),
        total_signups: signups.len(),
        required_count: required.len(),
        assigned_count,
        unstaffable_stations,
        conflicts,
        reasons,
    }
}

fn unstaffable(
    required: &[StationId],
    signups: &[SignupCandidate],
    reasons: &mut Vec<String>,
) -> Vec<StationId> {
    let floor = minimum_group(required);
    let anyone_reaches_floor = signups
        .iter()
        .any(|signup| can_staff(signup.qualification_group, floor));

    let mut stations = Vec::new();
    for station in required {
        let Some(group) = extract_group(station) else {
            reasons.push(format!("{station} has no recognized qualification suffix"));
            stations.push(station.clone());
            continue;
        };

        let staffable = anyone_reaches_floor
            && signups
                .iter()
                .any(|signup| can_staff(signup.qualification_group, Some(group)));
        if !staffable {
            reasons.push(format!(
                "{station} requires {} or higher and no signup holds it",
                group.label()
            ));
            stations.push(station.clone());
        }
    }
    stations
}

/// Loads an occurrence's stations and signups from storage and runs [`assess`].
pub struct FeasibilityChecker<R> {
    repository: Arc<R>,
}

impl<R> FeasibilityChecker<R>
where
    R: EventRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn check(&self, occurrence_id: OccurrenceId) -> Result<FeasibilityResult, RepositoryError> {
        let occurrence = self
            .repository
            .fetch_occurrence(occurrence_id)?
            .ok_or(RepositoryError::NotFound)?;
        let pattern = self
            .repository
            .fetch_pattern(occurrence.pattern_id)?
            .ok_or(RepositoryError::NotFound)?;
        let signups = self.repository.signups_for(occurrence_id)?;

        let candidates: Vec<SignupCandidate> = signups.iter().map(SignupCandidate::from).collect();
        Ok(assess(pattern.staffed_stations.as_slice(), &candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stations(raw: &[&str]) -> Vec<StationId> {
        raw.iter().map(StationId::new).collect()
    }

    fn candidate(id: u64, group: Option<QualificationGroup>) -> SignupCandidate {
        SignupCandidate {
            controller_id: ControllerId(id),
            qualification_group: group,
        }
    }

    #[test]
    fn greedy_order_reports_conflict_for_lower_station() {
        let required = stations(&["X_APP", "X_TWR"]);
        let signups = [
            candidate(1, Some(QualificationGroup::App)),
            candidate(2, Some(QualificationGroup::Gnd)),
        ];

        let result = assess(&required, &signups);

        assert!(result.unstaffable_stations.is_empty());
        assert!(!result.is_feasible);
        assert_eq!(result.assigned_count, 1);
        assert_eq!(
            result.conflicts,
            vec![StationConflict {
                station: StationId::new("X_TWR"),
                required_group: QualificationGroup::Twr,
            }]
        );
    }

    #[test]
    fn senior_stations_claim_candidates_first() {
        let required = stations(&["X_TWR", "X_CTR"]);
        let signups = [
            candidate(1, Some(QualificationGroup::Ctr)),
            candidate(2, Some(QualificationGroup::Twr)),
        ];

        let result = assess(&required, &signups);

        assert!(result.is_feasible);
        assert_eq!(result.assigned_count, 2);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn unstaffable_station_blocks_feasibility() {
        let required = stations(&["X_CTR", "X_GND"]);
        let signups = [
            candidate(1, Some(QualificationGroup::Twr)),
            candidate(2, Some(QualificationGroup::Gnd)),
        ];

        let result = assess(&required, &signups);

        assert!(!result.is_feasible);
        assert_eq!(result.unstaffable_stations, stations(&["X_CTR"]));
        assert!(result.conflicts.is_empty());
        assert!(result.reasons.iter().any(|reason| reason.contains("X_CTR")));
    }

    #[test]
    fn unrecognized_station_is_unstaffable() {
        let required = stations(&["X_ATIS"]);
        let signups = [candidate(1, Some(QualificationGroup::Ctr))];

        let result = assess(&required, &signups);

        assert!(!result.is_feasible);
        assert_eq!(result.unstaffable_stations, stations(&["X_ATIS"]));
    }

    #[test]
    fn unqualified_signups_staff_nothing() {
        let required = stations(&["X_DEL"]);
        let signups = [candidate(1, None), candidate(2, None)];

        let result = assess(&required, &signups);

        assert!(!result.is_feasible);
        assert_eq!(result.unstaffable_stations, stations(&["X_DEL"]));
        assert_eq!(result.total_signups, 2);
    }

    #[test]
    fn shortage_is_reported_as_conflict_and_reason() {
        let required = stations(&["X_TWR", "X_GND"]);
        let signups = [candidate(1, Some(QualificationGroup::Twr))];

        let result = assess(&required, &signups);

        assert!(!result.is_feasible);
        assert!(result.unstaffable_stations.is_empty());
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].station, StationId::new("X_GND"));
        assert!(result
            .reasons
            .iter()
            .any(|reason| reason.contains("1 signup(s) for 2")));
    }

    #[test]
    fn no_required_stations_is_trivially_feasible() {
        let result = assess(&[], &[candidate(1, None)]);
        assert!(result.is_feasible);
        assert_eq!(result.required_count, 0);
    }

    #[test]
    fn never_feasible_with_unstaffable_stations() {
        let tiers: Vec<Option<QualificationGroup>> = std::iter::once(None)
            .chain(QualificationGroup::ordered().into_iter().map(Some))
            .collect();
        let required = stations(&["X_DEL", "X_GND", "X_TWR", "X_APP", "X_CTR", "X_FSS"]);

        for (offset, group) in tiers.iter().enumerate() {
            let signups: Vec<SignupCandidate> = (0..6)
                .map(|i| candidate(i + offset as u64 * 10, *group))
                .collect();
            let result = assess(&required, &signups);
            assert!(!(result.is_feasible && !result.unstaffable_stations.is_empty()));
            assert!(!result.is_feasible, "X_FSS is never staffable");
        }
    }
}
