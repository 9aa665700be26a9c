use super::*;

fn test_conn() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open db");
    (dir, conn)
}

fn seed_evidence(conn: &Connection, title: &str) -> EvidenceRecord {
    create_evidence_capture(
        conn,
        &EvidenceCaptureInput {
            inspection_id: "insp-1".to_string(),
            checklist_item_key: "structure.walls".to_string(),
            title: title.to_string(),
            note_text: String::new(),
            device_timestamp: "2026-08-06T09:30:00Z".to_string(),
            timezone: "UTC".to_string(),
            gps: None,
            metadata_hash: "b".repeat(64),
            photo: None,
        },
    )
    .expect("seed evidence")
}

fn audit_payload(entity_id: &str, action: &str) -> QueuePayload {
    QueuePayload::AppendAudit(AppendAuditPayload {
        entity_type: "evidence_item".to_string(),
        entity_id: entity_id.to_string(),
        action: action.to_string(),
        payload: serde_json::json!({ "action": action }),
    })
}

#[test]
fn list_for_sync_drains_in_enqueue_order() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "fifo");

    let a = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "a")).expect("a");
    let b = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "b")).expect("b");
    let c = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "c")).expect("c");

    let eligible = list_queue_for_sync(&conn, 10).expect("list");
    let ids: Vec<&str> = eligible.iter().map(|item| item.id.as_str()).collect();
    // The capture's own CREATE_EVIDENCE operation precedes the three audits.
    assert_eq!(ids.len(), 4);
    assert_eq!(&ids[1..], &[a.id.as_str(), b.id.as_str(), c.id.as_str()]);
}

#[test]
fn list_for_sync_only_returns_pending_and_failed() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "eligibility");

    let pending = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "p")).expect("p");
    let failed = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "f")).expect("f");
    let in_flight = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "i")).expect("i");
    let synced = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "s")).expect("s");
    let review = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "r")).expect("r");

    mark_queue_item_failed(&conn, &failed.id, "one failure", DEFAULT_MAX_ATTEMPTS).expect("fail");
    mark_queue_item_in_flight(&conn, &in_flight.id).expect("in flight");
    mark_queue_item_synced(&conn, &synced.id).expect("synced");
    for _ in 0..DEFAULT_MAX_ATTEMPTS {
        mark_queue_item_failed(&conn, &review.id, "exhausted", DEFAULT_MAX_ATTEMPTS).expect("fail");
    }

    // Clear the seed operation so only the five above remain eligible-or-not.
    let seed_op = &list_queue(&conn, 10).expect("list")[0];
    mark_queue_item_synced(&conn, &seed_op.id).expect("seed synced");

    let eligible = list_queue_for_sync(&conn, 10).expect("list");
    let ids: Vec<&str> = eligible.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, &[pending.id.as_str(), failed.id.as_str()]);
}

#[test]
fn mark_failed_increments_attempts_and_escalates() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "escalation");
    let op = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "x")).expect("op");

    let first = mark_queue_item_failed(&conn, &op.id, "timeout", DEFAULT_MAX_ATTEMPTS).expect("1");
    assert_eq!(first, SyncStatus::Failed);
    let second = mark_queue_item_failed(&conn, &op.id, "timeout", DEFAULT_MAX_ATTEMPTS).expect("2");
    assert_eq!(second, SyncStatus::Failed);
    let third = mark_queue_item_failed(&conn, &op.id, "timeout", DEFAULT_MAX_ATTEMPTS).expect("3");
    assert_eq!(third, SyncStatus::RequiresReview);

    let stored = get_queue_item(&conn, &op.id).expect("get").expect("exists");
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.status, SyncStatus::RequiresReview);
    assert_eq!(stored.last_error.as_deref(), Some("timeout"));
}

#[test]
fn mark_failed_honors_configured_threshold() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "threshold");
    let op = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "x")).expect("op");

    assert_eq!(
        mark_queue_item_failed(&conn, &op.id, "boom", 1).expect("fail"),
        SyncStatus::RequiresReview
    );
}

#[test]
fn mark_failed_truncates_long_errors() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "truncation");
    let op = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "x")).expect("op");

    let long_error = "e".repeat(2000);
    mark_queue_item_failed(&conn, &op.id, &long_error, DEFAULT_MAX_ATTEMPTS).expect("fail");

    let stored = get_queue_item(&conn, &op.id).expect("get").expect("exists");
    assert_eq!(stored.last_error.expect("error").len(), 400);
}

#[test]
fn mark_in_flight_and_synced_clear_last_error() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "errors");
    let op = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "x")).expect("op");

    mark_queue_item_failed(&conn, &op.id, "first failure", DEFAULT_MAX_ATTEMPTS).expect("fail");
    mark_queue_item_in_flight(&conn, &op.id).expect("in flight");
    let stored = get_queue_item(&conn, &op.id).expect("get").expect("exists");
    assert_eq!(stored.status, SyncStatus::InFlight);
    assert!(stored.last_error.is_none());

    mark_queue_item_synced(&conn, &op.id).expect("synced");
    let stored = get_queue_item(&conn, &op.id).expect("get").expect("exists");
    assert_eq!(stored.status, SyncStatus::Synced);
    assert!(stored.last_error.is_none());
    // Attempts only move on failed deliveries.
    assert_eq!(stored.attempts, 1);
}

#[test]
fn mark_failed_on_unknown_operation_is_an_error() {
    let (_dir, conn) = test_conn();
    let err = mark_queue_item_failed(&conn, "missing", "x", DEFAULT_MAX_ATTEMPTS)
        .expect_err("must fail");
    assert!(err.to_string().contains("missing"));
}

#[test]
fn summary_counts_per_status_and_total() {
    let (_dir, conn) = test_conn();
    let evidence = seed_evidence(&conn, "summary");

    let failed = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "f")).expect("f");
    let synced = enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "s")).expect("s");
    enqueue_operation(&conn, &evidence.id, &audit_payload(&evidence.id, "p")).expect("p");

    mark_queue_item_failed(&conn, &failed.id, "x", DEFAULT_MAX_ATTEMPTS).expect("fail");
    mark_queue_item_synced(&conn, &synced.id).expect("synced");

    let summary = get_queue_summary(&conn).expect("summary");
    // The seed CREATE_EVIDENCE operation is still pending.
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.synced, 1);
    assert_eq!(summary.in_flight, 0);
    assert_eq!(summary.requires_review, 0);
    assert_eq!(summary.total, 4);
}

#[test]
fn payload_decode_rejects_shape_mismatch() {
    let payload = audit_payload("ev-1", "a").to_json().expect("encode");
    let err = QueuePayload::decode(OperationType::CreateEvidence, &payload).expect_err("must fail");
    assert!(!err.to_string().is_empty());

    let ok = QueuePayload::decode(OperationType::AppendAudit, &payload).expect("decode");
    assert_eq!(ok.operation_type(), OperationType::AppendAudit);
}

#[test]
fn enqueue_requires_entity_id() {
    let (_dir, conn) = test_conn();
    let err = enqueue_operation(&conn, "  ", &audit_payload("x", "a")).expect_err("must fail");
    assert!(err.to_string().contains("entity_id"));
}
