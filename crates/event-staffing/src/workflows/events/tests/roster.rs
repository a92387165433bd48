use super::common::*;

use crate::workflows::events::domain::{ControllerId, OccurrenceId, SignupStatus, StationId};
use crate::workflows::events::{
    EventError, QualificationGroup, SignupRequest, StatusReason, ValidationError,
};

async fn signed_up(harness: &Harness, occurrence: OccurrenceId, controllers: &[u64]) {
    let service = harness.signups();
    for controller in controllers {
        service
            .sign_up(
                ControllerId(*controller),
                occurrence,
                SignupRequest {
                    controller_id: ControllerId(*controller),
                    rating: 5,
                    remarks: None,
                },
            )
            .await
            .expect("signup");
    }
}

#[tokio::test]
async fn assignment_requires_staffed_station_and_signup() {
    let harness = Harness::new();
    let occurrence = harness.seed()[0].id;
    signed_up(&harness, occurrence, &[1, 2]).await;
    let roster = harness.roster();

    let err = roster
        .assign(MANAGER, occurrence, StationId::new("EDDF_CTR"), ControllerId(1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EventError::Validation(ValidationError::UnknownStation(StationId::new("EDDF_CTR")))
    );

    let err = roster
        .assign(MANAGER, occurrence, StationId::new("EDDF_TWR"), ControllerId(3))
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Conflict(_)));

    roster
        .assign(MANAGER, occurrence, StationId::new("eddf_app"), ControllerId(1))
        .await
        .expect("assigned");
    let err = roster
        .assign(MANAGER, occurrence, StationId::new("EDDF_APP"), ControllerId(2))
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Conflict(_)));
}

#[tokio::test]
async fn roster_changes_require_manage_permission() {
    let harness = Harness::new();
    let occurrence = harness.seed()[0].id;
    signed_up(&harness, occurrence, &[1]).await;

    let err = harness
        .roster()
        .assign(
            ControllerId(1),
            occurrence,
            StationId::new("EDDF_APP"),
            ControllerId(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Permission { .. }));

    let err = harness
        .roster()
        .publish(ControllerId(1), occurrence)
        .await
        .unwrap_err();
    assert!(matches!(err, EventError::Permission { .. }));
}

#[tokio::test]
async fn publishing_notifies_every_signup_once() {
    let harness = Harness::new();
    let occurrence = harness.seed()[0].id;
    signed_up(&harness, occurrence, &[1, 2]).await;
    let roster = harness.roster();
    roster
        .assign(MANAGER, occurrence, StationId::new("EDDF_APP"), ControllerId(1))
        .await
        .expect("assigned");

    let report = roster.publish(MANAGER, occurrence).await.expect("published");
    assert!(!report.already_published);
    assert!(report.occurrence.roster_published);
    assert_eq!(report.occurrence.roster_published_at, Some(instant(3, 3, 9)));
    assert_eq!(report.delivered.len(), 2);

    let notices = harness.notifier.roster();
    let station_of = |id: u64| {
        notices
            .iter()
            .find(|notice| notice.controller_id == ControllerId(id))
            .map(|notice| notice.station.clone())
    };
    assert_eq!(station_of(1), Some(Some(StationId::new("EDDF_APP"))));
    assert_eq!(station_of(2), Some(None));

    let again = roster.publish(MANAGER, occurrence).await.expect("idempotent");
    assert!(again.already_published);
    assert_eq!(harness.notifier.roster().len(), 2);
}

#[tokio::test]
async fn delivery_failures_do_not_roll_back_publication() {
    let harness = Harness::new();
    let occurrence = harness.seed()[0].id;
    signed_up(&harness, occurrence, &[1, 2, 3]).await;
    harness.notifier.fail_for(ControllerId(2));

    let report = harness
        .roster()
        .publish(MANAGER, occurrence)
        .await
        .expect("published");

    assert_eq!(report.delivered, vec![ControllerId(1), ControllerId(3)]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].controller_id, ControllerId(2));
    assert!(harness.occurrence(occurrence).roster_published);
}

#[tokio::test]
async fn publication_closes_signups_until_unpublished() {
    let harness = Harness::new();
    let occurrence = harness.seed()[0].id;
    harness
        .lifecycle()
        .override_status(MANAGER, occurrence, SignupStatus::Open)
        .await
        .expect("override");
    harness
        .roster()
        .publish(MANAGER, occurrence)
        .await
        .expect("published");

    let status = harness.lifecycle().status_of(occurrence).expect("status");
    assert!(!status.is_open);
    assert_eq!(status.reason, StatusReason::RosterPublished);

    let occ = harness
        .roster()
        .unpublish(MANAGER, occurrence)
        .await
        .expect("unpublished");
    assert!(!occ.roster_published);
    assert_eq!(occ.roster_published_at, None);
    assert!(harness.lifecycle().status_of(occurrence).expect("status").is_open);
}

#[tokio::test]
async fn unassign_frees_station() {
    let harness = Harness::with_groups(&[(ControllerId(1), QualificationGroup::Ctr)]);
    let occurrence = harness.seed()[0].id;
    signed_up(&harness, occurrence, &[1]).await;
    let roster = harness.roster();
    let station = StationId::new("EDDF_GND");

    roster
        .assign(MANAGER, occurrence, station.clone(), ControllerId(1))
        .await
        .expect("assigned");
    roster
        .unassign(MANAGER, occurrence, &station)
        .await
        .expect("unassigned");
    assert!(roster.roster(occurrence).expect("roster").is_empty());

    let err = roster
        .unassign(MANAGER, occurrence, &station)
        .await
        .unwrap_err();
    assert_eq!(err, EventError::NotFound);
}
