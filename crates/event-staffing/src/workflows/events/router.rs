use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use super::domain::{
    ControllerId, OccurrenceId, Pattern, PatternId, ScopeCode, ScopeSettings, SignupStatus,
    StationId,
};
use super::error::EventError;
use super::expansion::{ExpansionOutcome, ExpansionReport, PatternExpander};
use super::feasibility::FeasibilityChecker;
use super::lifecycle::{EffectiveStatus, OccurrenceLifecycle};
use super::monitor::{DeadlineMonitor, SweepReport};
use super::repository::EventRepository;
use super::roster::RosterService;
use super::signups::{SignupRequest, SignupService};
use crate::error::AppError;

/// Header carrying the acting controller on mutating requests.
pub const ACTOR_HEADER: &str = "x-controller-id";

/// Services reachable over HTTP, plus the lock that keeps sweeps from overlapping.
pub struct StaffingApi<R> {
    pub expander: PatternExpander<R>,
    pub lifecycle: OccurrenceLifecycle<R>,
    pub feasibility: FeasibilityChecker<R>,
    pub monitor: DeadlineMonitor<R>,
    pub signups: SignupService<R>,
    pub roster: RosterService<R>,
    repository: Arc<R>,
    sweep_lock: Mutex<()>,
}

impl<R> StaffingApi<R>
where
    R: EventRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        expander: PatternExpander<R>,
        lifecycle: OccurrenceLifecycle<R>,
        feasibility: FeasibilityChecker<R>,
        monitor: DeadlineMonitor<R>,
        signups: SignupService<R>,
        roster: RosterService<R>,
    ) -> Self {
        Self {
            expander,
            lifecycle,
            feasibility,
            monitor,
            signups,
            roster,
            repository,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Run a sweep unless one is already in flight, in which case `None` is returned.
    pub async fn try_sweep(&self) -> Option<SweepReport> {
        let _guard = self.sweep_lock.try_lock().ok()?;
        Some(self.monitor.sweep().await)
    }

    /// Expand every pattern and sweep, waiting for any in-flight sweep to finish first.
    pub async fn scheduled_pass(&self) -> (Result<ExpansionReport, EventError>, SweepReport) {
        let _guard = self.sweep_lock.lock().await;
        let expansion = self.expander.expand_all();
        if let Err(err) = &expansion {
            warn!(error = %err, "scheduled expansion failed");
        }
        (expansion, self.monitor.sweep().await)
    }

    /// Create a pattern in a scope `actor` manages and expand it.
    pub async fn create_pattern(
        &self,
        actor: ControllerId,
        pattern: Pattern,
    ) -> Result<ExpansionOutcome, EventError> {
        self.lifecycle.ensure_manager(actor, &pattern.scope).await?;
        self.expander.create_pattern(pattern)
    }

    /// Replace a pattern. Moving it between scopes needs rights on both.
    pub async fn update_pattern(
        &self,
        actor: ControllerId,
        pattern: Pattern,
    ) -> Result<ExpansionOutcome, EventError> {
        let previous = self.expander.fetch_pattern(pattern.id)?;
        self.lifecycle.ensure_manager(actor, &previous.scope).await?;
        if previous.scope != pattern.scope {
            self.lifecycle.ensure_manager(actor, &pattern.scope).await?;
        }
        self.expander.update_pattern(pattern)
    }

    pub async fn configure_scope(
        &self,
        actor: ControllerId,
        settings: ScopeSettings,
    ) -> Result<ScopeSettings, EventError> {
        self.lifecycle.ensure_manager(actor, &settings.code).await?;
        self.repository.upsert_scope(settings.clone())?;
        Ok(settings)
    }

    #[cfg(test)]
    pub(crate) async fn hold_sweep_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.sweep_lock.lock().await
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScopeToggle {
    pub(crate) automated_notifications: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusOverride {
    pub(crate) status: SignupStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemarksUpdate {
    #[serde(default)]
    pub(crate) remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StationAssignment {
    pub(crate) controller_id: ControllerId,
}

/// Router builder exposing pattern, occurrence, signup, roster, and sweep endpoints.
pub fn staffing_router<R>(api: Arc<StaffingApi<R>>) -> Router
where
    R: EventRepository + 'static,
{
    Router::new()
        .route("/api/v1/patterns", post(create_pattern_handler::<R>))
        .route("/api/v1/patterns/:pattern_id", put(update_pattern_handler::<R>))
        .route("/api/v1/patterns/:pattern_id/expand", post(expand_handler::<R>))
        .route(
            "/api/v1/patterns/:pattern_id/occurrences",
            get(occurrences_handler::<R>),
        )
        .route("/api/v1/scopes/:scope", put(scope_handler::<R>))
        .route(
            "/api/v1/occurrences/:occurrence_id/status",
            get(status_handler::<R>).put(override_handler::<R>),
        )
        .route(
            "/api/v1/occurrences/:occurrence_id/feasibility",
            get(feasibility_handler::<R>),
        )
        .route(
            "/api/v1/occurrences/:occurrence_id/signups",
            get(list_signups_handler::<R>).post(sign_up_handler::<R>),
        )
        .route(
            "/api/v1/occurrences/:occurrence_id/signups/:controller_id",
            patch(remarks_handler::<R>).delete(withdraw_handler::<R>),
        )
        .route(
            "/api/v1/occurrences/:occurrence_id/roster",
            get(roster_handler::<R>),
        )
        .route(
            "/api/v1/occurrences/:occurrence_id/roster/:station",
            put(assign_handler::<R>).delete(unassign_handler::<R>),
        )
        .route(
            "/api/v1/occurrences/:occurrence_id/publication",
            post(publish_handler::<R>).delete(unpublish_handler::<R>),
        )
        .route("/api/v1/sweeps", post(sweep_handler::<R>))
        .with_state(api)
}

/// Acting controller from [`ACTOR_HEADER`], or a 401 response.
fn actor_from(headers: &HeaderMap) -> Result<ControllerId, Response> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(ControllerId)
        .ok_or_else(|| {
            let payload = json!({
                "error": format!("missing or invalid {ACTOR_HEADER} header"),
            });
            (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
        })
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, EventError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

fn status_payload(id: OccurrenceId, status: &EffectiveStatus) -> serde_json::Value {
    json!({
        "occurrence_id": id,
        "is_open": status.is_open,
        "reason": status.reason,
        "reason_label": status.reason.label(),
        "opens_at": status.opens_at,
        "closes_at": status.closes_at,
    })
}

pub(crate) async fn create_pattern_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    headers: HeaderMap,
    Json(pattern): Json<Pattern>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        api.create_pattern(actor, pattern).await,
    )
}

pub(crate) async fn update_pattern_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(pattern_id): Path<u64>,
    headers: HeaderMap,
    Json(mut pattern): Json<Pattern>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    pattern.id = PatternId(pattern_id);
    respond(StatusCode::OK, api.update_pattern(actor, pattern).await)
}

pub(crate) async fn expand_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(pattern_id): Path<u64>,
) -> Response
where
    R: EventRepository + 'static,
{
    respond(
        StatusCode::OK,
        api.expander.expand_pattern(PatternId(pattern_id)),
    )
}

pub(crate) async fn occurrences_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(pattern_id): Path<u64>,
) -> Response
where
    R: EventRepository + 'static,
{
    respond(
        StatusCode::OK,
        api.expander.occurrences(PatternId(pattern_id)),
    )
}

pub(crate) async fn scope_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(scope): Path<String>,
    headers: HeaderMap,
    Json(toggle): Json<ScopeToggle>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let settings = ScopeSettings {
        code: ScopeCode(scope),
        automated_notifications: toggle.automated_notifications,
    };
    respond(StatusCode::OK, api.configure_scope(actor, settings).await)
}

pub(crate) async fn status_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
) -> Response
where
    R: EventRepository + 'static,
{
    let id = OccurrenceId(occurrence_id);
    match api.lifecycle.status_of(id) {
        Ok(status) => (StatusCode::OK, Json(status_payload(id, &status))).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn override_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
    headers: HeaderMap,
    Json(update): Json<StatusOverride>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let id = OccurrenceId(occurrence_id);
    match api.lifecycle.override_status(actor, id, update.status).await {
        Ok(occurrence) => {
            let status = api.lifecycle.status(&occurrence);
            (StatusCode::OK, Json(status_payload(id, &status))).into_response()
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn feasibility_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
) -> Response
where
    R: EventRepository + 'static,
{
    respond(
        StatusCode::OK,
        api.feasibility
            .check(OccurrenceId(occurrence_id))
            .map_err(EventError::from),
    )
}

pub(crate) async fn list_signups_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
) -> Response
where
    R: EventRepository + 'static,
{
    respond(StatusCode::OK, api.signups.list(OccurrenceId(occurrence_id)))
}

pub(crate) async fn sign_up_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
    headers: HeaderMap,
    Json(request): Json<SignupRequest>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        api.signups
            .sign_up(actor, OccurrenceId(occurrence_id), request)
            .await,
    )
}

pub(crate) async fn remarks_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path((occurrence_id, controller_id)): Path<(u64, u64)>,
    headers: HeaderMap,
    Json(update): Json<RemarksUpdate>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        api.signups
            .update_remarks(
                actor,
                OccurrenceId(occurrence_id),
                ControllerId(controller_id),
                update.remarks,
            )
            .await,
    )
}

pub(crate) async fn withdraw_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path((occurrence_id, controller_id)): Path<(u64, u64)>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        api.signups
            .withdraw(
                actor,
                OccurrenceId(occurrence_id),
                ControllerId(controller_id),
            )
            .await,
    )
}

pub(crate) async fn roster_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
) -> Response
where
    R: EventRepository + 'static,
{
    respond(StatusCode::OK, api.roster.roster(OccurrenceId(occurrence_id)))
}

pub(crate) async fn assign_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path((occurrence_id, station)): Path<(u64, String)>,
    headers: HeaderMap,
    Json(assignment): Json<StationAssignment>,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        api.roster
            .assign(
                actor,
                OccurrenceId(occurrence_id),
                StationId::new(station),
                assignment.controller_id,
            )
            .await,
    )
}

pub(crate) async fn unassign_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path((occurrence_id, station)): Path<(u64, String)>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        api.roster
            .unassign(actor, OccurrenceId(occurrence_id), &StationId::new(station))
            .await,
    )
}

pub(crate) async fn publish_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        api.roster.publish(actor, OccurrenceId(occurrence_id)).await,
    )
}

pub(crate) async fn unpublish_handler<R>(
    State(api): State<Arc<StaffingApi<R>>>,
    Path(occurrence_id): Path<u64>,
    headers: HeaderMap,
) -> Response
where
    R: EventRepository + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        api.roster
            .unpublish(actor, OccurrenceId(occurrence_id))
            .await,
    )
}

pub(crate) async fn sweep_handler<R>(State(api): State<Arc<StaffingApi<R>>>) -> Response
where
    R: EventRepository + 'static,
{
    match api.try_sweep().await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => {
            let payload = json!({
                "error": "a sweep is already running",
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
    }
}
