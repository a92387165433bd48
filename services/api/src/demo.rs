use crate::infra::{parse_instant, Services};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use clap::Args;
use event_staffing::clock::{Clock, FixedClock};
use event_staffing::config::SchedulingConfig;
use event_staffing::error::AppError;
use event_staffing::workflows::events::{
    AirportList, ControllerId, EventError, EventRepository, Occurrence, Pattern, PatternId,
    ScopeCode, ScopeSettings, SignupRequest, StationList, SweepReport,
};
use std::sync::Arc;

const DEMO_STAFF: ControllerId = ControllerId(1_000_001);

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Pretend the demo starts at this instant (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_instant)]
    pub(crate) at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Run the sweep at this instant (RFC 3339). Defaults to one hour past the
    /// first seeded deadline.
    #[arg(long, value_parser = parse_instant)]
    pub(crate) at: Option<DateTime<Utc>>,
}

/// Weekly pattern whose first occurrence falls two days after `now`.
fn demo_pattern(now: DateTime<Utc>) -> Pattern {
    let today = now.date_naive();
    let weekday = (today.weekday().num_days_from_monday() + 2) % 7;
    Pattern {
        id: PatternId(1),
        scope: ScopeCode("DEMO".to_string()),
        name: "Frankfurt Evening Ops".to_string(),
        weekday: weekday as u8,
        weeks_on: 1,
        weeks_off: 0,
        start_date: today,
        start_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN),
        enabled: true,
        requires_roster: true,
        staffed_stations: StationList::parse("EDDF_APP, EDDF_TWR, EDDF_GND"),
        airports: AirportList::new(["EDDF"]),
        signup_deadline_hours: 24,
    }
}

fn seed(services: &Services) -> Result<Vec<Occurrence>, AppError> {
    let store = &services.store;
    store
        .upsert_scope(ScopeSettings {
            code: ScopeCode("DEMO".to_string()),
            automated_notifications: true,
        })
        .map_err(EventError::from)?;
    store
        .insert_pattern(demo_pattern(services.clock.now()))
        .map_err(EventError::from)?;
    services.api().expander.expand_pattern(PatternId(1))?;
    Ok(store
        .occurrences_for_pattern(PatternId(1))
        .map_err(EventError::from)?)
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let clock = FixedClock::at(args.at.unwrap_or_else(Utc::now));
    let services = Services::new(
        SchedulingConfig::default(),
        Arc::new(clock.clone()),
        [DEMO_STAFF],
    );

    println!("Event staffing demo");
    let occurrences = seed(&services)?;
    println!(
        "- Expanded pattern 1 into {} occurrence(s) over the next {} days",
        occurrences.len(),
        services.scheduling.expansion_horizon_days
    );
    let Some(first) = occurrences.first().cloned() else {
        println!("  No upcoming occurrences; nothing else to show.");
        return Ok(());
    };
    println!(
        "- First occurrence {} on {} (starts {}, signup deadline {})",
        first.id,
        first.date,
        first.starts_at,
        first
            .signup_deadline
            .map(|deadline| deadline.to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    let api = services.api();
    let status = api.lifecycle.status_of(first.id)?;
    println!(
        "  Signups {}: {}",
        if status.is_open { "open" } else { "closed" },
        status.reason.label()
    );

    println!("\nSignups");
    let signups = services.signups();
    for (controller, rating) in [(1_000_101, 4), (1_000_102, 3), (1_000_103, 1)] {
        let controller = ControllerId(controller);
        let request = SignupRequest {
            controller_id: controller,
            rating,
            remarks: None,
        };
        match signups.sign_up(controller, first.id, request).await {
            Ok(signup) => println!(
                "  - {} signed up as {}",
                controller,
                signup
                    .qualification_group
                    .map(|group| group.label())
                    .unwrap_or("unqualified")
            ),
            Err(err) => println!("  - {} rejected: {}", controller, err),
        }
    }

    let feasibility = api.feasibility.check(first.id).map_err(EventError::from)?;
    println!("\nFeasibility");
    println!(
        "  {} | {} of {} station(s) covered by {} signup(s)",
        if feasibility.is_feasible {
            "feasible"
        } else {
            "not feasible"
        },
        feasibility.assigned_count,
        feasibility.required_count,
        feasibility.total_signups
    );
    for reason in &feasibility.reasons {
        println!("  - {}", reason);
    }

    if let Some(deadline) = first.signup_deadline {
        clock.set(deadline + Duration::hours(1));
        println!("\nDeadline sweep at {}", clock.now());
        if let Some(report) = api.try_sweep().await {
            render_sweep(&report);
        }
        let status = api.lifecycle.status_of(first.id)?;
        println!("  Signups now: {}", status.reason.label());
    }

    Ok(())
}

pub(crate) async fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let clock = FixedClock::at(Utc::now());
    let services = Services::new(
        SchedulingConfig::default(),
        Arc::new(clock.clone()),
        [DEMO_STAFF],
    );
    let occurrences = seed(&services)?;

    let at = args.at.or_else(|| {
        occurrences
            .first()
            .and_then(|occurrence| occurrence.signup_deadline)
            .map(|deadline| deadline + Duration::hours(1))
    });
    if let Some(at) = at {
        clock.set(at);
    }

    match services.api().try_sweep().await {
        Some(report) => render_sweep(&report),
        None => println!("A sweep is already running"),
    }
    Ok(())
}

fn render_sweep(report: &SweepReport) {
    println!(
        "  Window {} .. {} | {} examined | {} evicted ledger entries",
        report.window_start, report.window_end, report.examined, report.evicted
    );
    println!(
        "  Closed {:?} | notified {:?} | suppressed {:?} | advisories {:?}",
        ids(&report.closed),
        ids(&report.notified),
        ids(&report.suppressed),
        ids(&report.advisories)
    );
    if report.skipped_published + report.skipped_scope > 0 {
        println!(
            "  Skipped {} published and {} opted-out occurrence(s)",
            report.skipped_published, report.skipped_scope
        );
    }
    for failure in &report.failures {
        println!(
            "  ! {:?} failed for {:?}: {}",
            failure.stage,
            failure.occurrence_id.map(|id| id.0),
            failure.error
        );
    }
}

fn ids<T: std::fmt::Display>(values: &[T]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn demo_pattern_lands_two_days_out() {
        // 2025-03-03 is a Monday.
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let pattern = demo_pattern(now);
        assert_eq!(pattern.weekday, 2);

        let services = Services::new(
            SchedulingConfig::default(),
            Arc::new(FixedClock::at(now)),
            [DEMO_STAFF],
        );
        let occurrences = seed(&services).expect("seeded");
        assert_eq!(
            occurrences[0].date,
            now.date_naive() + Duration::days(2)
        );
        assert_eq!(occurrences.len(), 26);
    }

    #[tokio::test]
    async fn sweep_command_runs_against_seeded_data() {
        let args = SweepArgs {
            at: Some(Utc::now() + Duration::days(3)),
        };
        run_sweep(args).await.expect("sweep runs");
    }
}
