use std::sync::Arc;

use gsm_idempotency::{InMemoryLedger, SharedLedger};
use gsm_testutil::InMemoryTickets;
use gsm_threading::{
    EventRef, InboundEvent, ReconcileError, Reconciliation, ReconcilerConfig, ThreadReconciler,
    TicketRef,
};
use time::OffsetDateTime;

fn reconciler(tickets: &InMemoryTickets) -> ThreadReconciler {
    let ledger: SharedLedger = Arc::new(InMemoryLedger::new());
    ThreadReconciler::new(ReconcilerConfig::default(), Arc::new(tickets.clone()), ledger)
        .expect("default pattern compiles")
}

fn email(message_id: &str) -> InboundEvent {
    InboundEvent::new("gmail", message_id, b"raw mime".to_vec())
}

#[tokio::test]
async fn correlation_hint_continues_thread() {
    let tickets = InMemoryTickets::new();
    let ticket = TicketRef::new("t-1").with_reference("INC-1");
    tickets
        .link_conversation("gmail", "thread-abc", ticket.clone())
        .await;
    let reconciler = reconciler(&tickets);

    let event = email("<m1@mail>")
        .with_correlation_hint("thread-abc")
        .with_subject("something unrelated");
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::ContinuesThread(ticket)
    );
}

#[tokio::test]
async fn hint_wins_over_reference_token() {
    let tickets = InMemoryTickets::new();
    let by_hint = TicketRef::new("t-hint");
    tickets
        .link_conversation("gmail", "thread-abc", by_hint.clone())
        .await;
    tickets
        .add_reference("INC-1042", TicketRef::new("t-ref"))
        .await;
    let reconciler = reconciler(&tickets);

    let event = email("<m2@mail>")
        .with_correlation_hint("thread-abc")
        .with_subject("RE: [INC-1042] disk full");
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::ContinuesThread(by_hint)
    );
}

#[tokio::test]
async fn reference_token_in_subject_continues_thread() {
    let tickets = InMemoryTickets::new();
    let ticket = TicketRef::new("t-1042").with_reference("INC-1042");
    tickets.add_reference("INC-1042", ticket.clone()).await;
    let reconciler = reconciler(&tickets);

    // The hint is present but unknown, so the text fallback applies.
    let event = email("<m3@mail>")
        .with_correlation_hint("thread-from-other-client")
        .with_subject("RE: [INC-1042] disk full");
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::ContinuesThread(ticket)
    );
}

#[tokio::test]
async fn later_tokens_and_body_are_tried() {
    let tickets = InMemoryTickets::new();
    let ticket = TicketRef::new("t-77");
    tickets.add_reference("CHG-77", ticket.clone()).await;
    let reconciler = reconciler(&tickets);

    let event = email("<m4@mail>")
        .with_subject("Fwd: [INC-9999] old thread")
        .with_body_text("see also [CHG-77] for the change");
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::ContinuesThread(ticket)
    );
}

#[tokio::test]
async fn unmatched_event_starts_new_thread() {
    let tickets = InMemoryTickets::new();
    let reconciler = reconciler(&tickets);

    let event = email("<m5@mail>")
        .with_correlation_hint("thread-unknown")
        .with_subject("[INC-404] nobody knows this one");
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::NewThread
    );
}

#[tokio::test]
async fn events_without_message_id_are_never_duplicates() {
    let tickets = InMemoryTickets::new();
    let reconciler = reconciler(&tickets);

    let first = InboundEvent::new("chat", "", b"{}".to_vec()).with_subject("printer on fire");
    let second = InboundEvent::new("chat", "  ", b"{}".to_vec()).with_subject("lunch?");
    assert_eq!(
        reconciler.reconcile(&first).await.unwrap(),
        Reconciliation::NewThread
    );
    assert_eq!(
        reconciler.reconcile(&second).await.unwrap(),
        Reconciliation::NewThread
    );
    assert_eq!(
        reconciler.reconcile(&first).await.unwrap(),
        Reconciliation::NewThread
    );
}

#[tokio::test]
async fn already_reconciled_message_is_duplicate_even_with_hint() {
    let tickets = InMemoryTickets::new();
    tickets
        .link_conversation("gmail", "thread-abc", TicketRef::new("t-1"))
        .await;
    let reconciler = reconciler(&tickets);

    let first = email("<m6@mail>").with_correlation_hint("thread-abc");
    assert!(matches!(
        reconciler.reconcile(&first).await.unwrap(),
        Reconciliation::ContinuesThread(_)
    ));

    let redelivery = email("<m6@mail>")
        .with_correlation_hint("thread-abc")
        .received_at(first.received_at + time::Duration::seconds(30));
    assert_eq!(
        reconciler.reconcile(&redelivery).await.unwrap(),
        Reconciliation::DuplicateOf(first.event_ref())
    );
}

#[tokio::test]
async fn reconciling_twice_yields_duplicate() {
    let tickets = InMemoryTickets::new();
    let reconciler = reconciler(&tickets);
    let event = email("<m7@mail>").with_subject("hello");

    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::NewThread
    );
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::DuplicateOf(event.event_ref())
    );
}

#[tokio::test]
async fn store_reported_duplicate_is_used_when_ledger_is_fresh() {
    let tickets = InMemoryTickets::new();
    let earlier = EventRef {
        provider: "gmail".into(),
        message_id: "<m8@mail>".into(),
        received_at: OffsetDateTime::now_utc() - time::Duration::hours(2),
    };
    tickets.mark_processed(earlier.clone()).await;
    let reconciler = reconciler(&tickets);

    assert_eq!(
        reconciler.reconcile(&email("<m8@mail>")).await.unwrap(),
        Reconciliation::DuplicateOf(earlier)
    );
}

#[tokio::test]
async fn same_message_id_on_other_provider_is_independent() {
    let tickets = InMemoryTickets::new();
    let reconciler = reconciler(&tickets);
    let gmail = email("42");
    let graph = InboundEvent::new("graph", "42", Vec::new());

    assert_eq!(reconciler.reconcile(&gmail).await.unwrap(), Reconciliation::NewThread);
    assert_eq!(reconciler.reconcile(&graph).await.unwrap(), Reconciliation::NewThread);
}

#[tokio::test]
async fn lookup_failure_releases_claim() {
    let tickets = InMemoryTickets::new();
    let reconciler = reconciler(&tickets);
    let event = email("<m9@mail>").with_correlation_hint("thread-abc");

    tickets.set_unavailable(true).await;
    let err = reconciler.reconcile(&event).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Lookup(_)), "{err}");

    tickets.set_unavailable(false).await;
    assert_eq!(
        reconciler.reconcile(&event).await.unwrap(),
        Reconciliation::NewThread
    );
}

#[tokio::test]
async fn invalid_reference_pattern_is_rejected() {
    let tickets = InMemoryTickets::new();
    let ledger: SharedLedger = Arc::new(InMemoryLedger::new());
    let config = ReconcilerConfig {
        reference_pattern: "[unclosed".into(),
        ..Default::default()
    };
    assert!(matches!(
        ThreadReconciler::new(config, Arc::new(tickets), ledger),
        Err(ReconcileError::Pattern(_))
    ));
}
