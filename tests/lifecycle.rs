mod common;

use sqlx::SqlitePool;

use common::{fixture, future_start, Fixture};
use salonsync::booking::book;
use salonsync::lifecycle::{apply, LifecycleEvent};
use salonsync::models::{Appointment, AppointmentStatus};

async fn booked(fx: &Fixture, hour_offset: i64) -> Appointment {
    book(&fx.state, fx.cut_request(&future_start(hour_offset)))
        .await
        .unwrap()
}

#[sqlx::test]
async fn worker_accepts_pending_appointment(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;

    let confirmed = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();

    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert!(confirmed.accepted_at.is_some());
    assert!(fx
        .history_actions(&appointment.id)
        .await
        .contains(&"appointment_accepted".to_string()));
}

#[sqlx::test]
async fn owner_may_accept_on_workers_behalf(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;

    let confirmed = apply(
        &fx.state,
        &fx.owner_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
}

#[sqlx::test]
async fn unassigned_worker_may_not_accept(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;

    let err = apply(
        &fx.state,
        &fx.second_worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "authorization");
}

#[sqlx::test]
async fn client_may_only_cancel_and_only_their_own(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;

    // Anything other than cancel is an authorization error for a client,
    // including transitions on their own appointment.
    for event in [
        LifecycleEvent::Accept,
        LifecycleEvent::Start,
        LifecycleEvent::Complete {
            payment_method: "cash".to_string(),
        },
    ] {
        let err = apply(&fx.state, &fx.client_actor(), &appointment.id, event)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "authorization");
    }

    // Someone else's appointment cannot be cancelled by a stranger client.
    let mut stranger = fx.client_actor();
    stranger.id = "someone-else".to_string();
    let err = apply(
        &fx.state,
        &stranger,
        &appointment.id,
        LifecycleEvent::Cancel,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "authorization");

    // Their own Pending appointment cancels fine.
    let cancelled = apply(
        &fx.state,
        &fx.client_actor(),
        &appointment.id,
        LifecycleEvent::Cancel,
    )
    .await
    .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(fx
        .history_actions(&appointment.id)
        .await
        .contains(&"appointment_cancelled_by_client".to_string()));
}

#[sqlx::test]
async fn cancel_audit_distinguishes_worker_from_client(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;
    apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();

    apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Cancel,
    )
    .await
    .unwrap();

    let actions = fx.history_actions(&appointment.id).await;
    assert!(actions.contains(&"appointment_cancelled_by_worker".to_string()));
    assert!(!actions.contains(&"appointment_cancelled_by_client".to_string()));
}

#[sqlx::test]
async fn reject_sets_rejected_at_and_notifies_client(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;

    let rejected = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Reject,
    )
    .await
    .unwrap();
    assert_eq!(rejected.status, AppointmentStatus::Cancelled);
    assert!(rejected.rejected_at.is_some());

    let notified: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND event = 'appointment_rejected'",
    )
    .bind(&fx.client_id)
    .fetch_one(&fx.state.db)
    .await
    .unwrap();
    assert_eq!(notified, 1);
}

#[sqlx::test]
async fn transitions_validate_the_from_state(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;

    // Start before acceptance.
    let err = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Start,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "validation");

    // Complete before starting.
    apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();
    let err = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Complete {
            payment_method: "cash".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "validation");

    // Reject after acceptance (only Pending rejects).
    let err = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Reject,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[sqlx::test]
async fn only_assigned_worker_starts_and_completes(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;
    apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();

    let err = apply(
        &fx.state,
        &fx.owner_actor(),
        &appointment.id,
        LifecycleEvent::Start,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "authorization");

    let started = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Start,
    )
    .await
    .unwrap();
    assert_eq!(started.status, AppointmentStatus::InProgress);
    assert!(started.started_at.is_some());
}

#[sqlx::test]
async fn completion_records_payment_and_first_visit(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;
    for event in [LifecycleEvent::Accept, LifecycleEvent::Start] {
        apply(&fx.state, &fx.worker_actor(), &appointment.id, event)
            .await
            .unwrap();
    }

    let completed = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Complete {
            payment_method: "card".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert!(completed.completed_at.is_some());

    let (amount, method): (i64, String) = sqlx::query_as(
        "SELECT amount_cents, method FROM payments WHERE appointment_id = ?",
    )
    .bind(&appointment.id)
    .fetch_one(&fx.state.db)
    .await
    .unwrap();
    assert_eq!(amount, 5000);
    assert_eq!(method, "card");

    assert!(fx
        .history_actions(&appointment.id)
        .await
        .contains(&"appointment_completed_first_visit".to_string()));
}

#[sqlx::test]
async fn second_completion_logs_repeat_visit(pool: SqlitePool) {
    let fx = fixture(pool).await;

    let first = booked(&fx, 0).await;
    for event in [
        LifecycleEvent::Accept,
        LifecycleEvent::Start,
        LifecycleEvent::Complete {
            payment_method: "cash".to_string(),
        },
    ] {
        apply(&fx.state, &fx.worker_actor(), &first.id, event)
            .await
            .unwrap();
    }

    let second = booked(&fx, 3).await;
    for event in [
        LifecycleEvent::Accept,
        LifecycleEvent::Start,
        LifecycleEvent::Complete {
            payment_method: "cash".to_string(),
        },
    ] {
        apply(&fx.state, &fx.worker_actor(), &second.id, event)
            .await
            .unwrap();
    }

    assert!(fx
        .history_actions(&first.id)
        .await
        .contains(&"appointment_completed_first_visit".to_string()));
    assert!(fx
        .history_actions(&second.id)
        .await
        .contains(&"appointment_completed_repeat_visit".to_string()));
}

#[sqlx::test]
async fn reassignment_is_owner_only_and_resets_confirmation(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;
    apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();

    let err = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Reassign {
            new_worker_id: fx.second_worker_id.clone(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "authorization");

    let reassigned = apply(
        &fx.state,
        &fx.owner_actor(),
        &appointment.id,
        LifecycleEvent::Reassign {
            new_worker_id: fx.second_worker_id.clone(),
        },
    )
    .await
    .unwrap();

    // Confirmed resets to Pending and the new worker must re-accept.
    assert_eq!(reassigned.status, AppointmentStatus::Pending);
    assert_eq!(reassigned.worker_id, fx.second_worker_id);

    let actions = fx.history_actions(&appointment.id).await;
    assert!(actions.contains(&"appointment_reassigned_from".to_string()));
    assert!(actions.contains(&"appointment_reassigned_to".to_string()));
}

#[sqlx::test]
async fn reassignment_checks_the_new_workers_calendar(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let start = future_start(0);
    let appointment = book(&fx.state, fx.cut_request(&start)).await.unwrap();

    // The second worker already has a booking on the same slot.
    let mut blocking = fx.cut_request(&start);
    blocking.worker_id = fx.second_worker_id.clone();
    book(&fx.state, blocking).await.unwrap();

    let err = apply(
        &fx.state,
        &fx.owner_actor(),
        &appointment.id,
        LifecycleEvent::Reassign {
            new_worker_id: fx.second_worker_id.clone(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "slot_conflict");
}

#[sqlx::test]
async fn accepted_at_survives_reassign_and_reaccept(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;
    let confirmed = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();
    let first_accepted_at = confirmed.accepted_at.clone().unwrap();

    apply(
        &fx.state,
        &fx.owner_actor(),
        &appointment.id,
        LifecycleEvent::Reassign {
            new_worker_id: fx.second_worker_id.clone(),
        },
    )
    .await
    .unwrap();

    let reaccepted = apply(
        &fx.state,
        &fx.second_worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap();

    // Lifecycle timestamps are set exactly once.
    assert_eq!(reaccepted.accepted_at.unwrap(), first_accepted_at);
}

#[sqlx::test]
async fn terminal_states_refuse_further_transitions(pool: SqlitePool) {
    let fx = fixture(pool).await;
    let appointment = booked(&fx, 0).await;
    apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Reject,
    )
    .await
    .unwrap();

    let err = apply(
        &fx.state,
        &fx.owner_actor(),
        &appointment.id,
        LifecycleEvent::Reassign {
            new_worker_id: fx.second_worker_id.clone(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = apply(
        &fx.state,
        &fx.worker_actor(),
        &appointment.id,
        LifecycleEvent::Accept,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "validation");
}
