//! Recurring staffing events: pattern expansion, signup lifecycle, staffing
//! feasibility, rosters, and the periodic deadline sweep.

pub mod collaborators;
pub mod domain;
pub mod error;
pub mod expansion;
pub mod feasibility;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod monitor;
pub mod qualification;
pub mod repository;
pub mod roster;
pub mod router;
pub mod signups;

#[cfg(test)]
mod tests;

pub use collaborators::{
    bounded, CollaboratorError, DependencyError, NotificationSender, PermissionChecker,
    QualificationLookup, QualificationProfile, QualificationRequest, RosterPublishedNotice,
    StaffingAdvisory, MANAGE_EVENTS,
};
pub use domain::{
    AirportList, ControllerId, NewOccurrence, Occurrence, OccurrenceId, Pattern, PatternId,
    RosterAssignment, ScopeCode, ScopeSettings, Signup, SignupStatus, StationId, StationList,
    ValidationError,
};
pub use error::EventError;
pub use expansion::{
    occurrence_dates, ExpansionFailure, ExpansionOutcome, ExpansionReport, PatternExpander,
};
pub use feasibility::{assess, FeasibilityChecker, FeasibilityResult, SignupCandidate};
pub use ledger::{IdempotencyLedger, MemoryLedger};
pub use lifecycle::{
    effective_status, EffectiveStatus, LifecyclePolicy, OccurrenceLifecycle, StatusReason,
};
pub use memory::MemoryEventStore;
pub use monitor::{DeadlineMonitor, MonitorPolicy, SweepReport, SweepStage, SweepWindow};
pub use qualification::{can_staff, extract_group, QualificationGroup};
pub use repository::{EventRepository, RepositoryError, UpsertOutcome};
pub use roster::{PublishReport, RosterService};
pub use router::{staffing_router, StaffingApi, ACTOR_HEADER};
pub use signups::{SignupRequest, SignupService};
