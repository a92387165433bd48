use crate::cli::ServeArgs;
use crate::infra::{AppState, Services};
use crate::routes::with_staffing_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use event_staffing::clock::SystemClock;
use event_staffing::config::AppConfig;
use event_staffing::error::AppError;
use event_staffing::telemetry;
use event_staffing::workflows::events::{ControllerId, EventRepository, StaffingApi};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let services = Services::new(
        config.scheduling.clone(),
        Arc::new(SystemClock),
        config.access.managers.iter().copied().map(ControllerId),
    );
    let api = services.api();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = tokio::spawn(run_schedule(
        api.clone(),
        config.scheduling.sweep_interval(),
        shutdown_rx,
    ));

    let app = with_staffing_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        sweep_interval_minutes = config.scheduling.sweep_interval_minutes,
        managers = config.access.managers.len(),
        "event staffing service ready"
    );

    let served = axum::serve(listener, app).await;
    let _ = shutdown_tx.send(true);
    if let Err(err) = background.await {
        warn!(error = %err, "scheduler task ended abnormally");
    }
    served?;
    Ok(())
}

/// Expand every pattern and sweep deadlines once per `period` until shutdown.
pub(crate) async fn run_schedule<R>(
    api: Arc<StaffingApi<R>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    R: EventRepository + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (expansion, sweep) = api.scheduled_pass().await;
                let inserted = expansion.as_ref().map(|report| report.inserted()).unwrap_or(0);
                info!(
                    inserted,
                    closed = sweep.closed.len(),
                    notified = sweep.notified.len(),
                    failures = sweep.failures.len(),
                    "scheduled pass finished"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use event_staffing::clock::FixedClock;
    use event_staffing::config::SchedulingConfig;
    use event_staffing::workflows::events::{
        AirportList, Pattern, PatternId, ScopeCode, StationList,
    };

    #[tokio::test(start_paused = true)]
    async fn schedule_expands_patterns_until_shutdown() {
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap());
        let services = Services::new(SchedulingConfig::default(), Arc::new(clock), Vec::new());
        services
            .store
            .insert_pattern(Pattern {
                id: PatternId(1),
                scope: ScopeCode("GER".to_string()),
                name: "Weekly".to_string(),
                weekday: 4,
                weeks_on: 1,
                weeks_off: 0,
                start_date: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
                start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                enabled: true,
                requires_roster: false,
                staffed_stations: StationList::parse("EDDF_TWR"),
                airports: AirportList::new(["EDDF"]),
                signup_deadline_hours: 24,
            })
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_schedule(
            services.api(),
            Duration::from_secs(900),
            rx,
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(!services
            .store
            .occurrences_for_pattern(PatternId(1))
            .unwrap()
            .is_empty());
    }
}
