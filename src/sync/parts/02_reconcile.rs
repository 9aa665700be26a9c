/// Runs one bounded reconciliation pass: drains up to `batch_size` eligible
/// operations in FIFO order, delivering each strictly sequentially. One
/// operation's failure never aborts the batch; a local storage failure does,
/// because queue state can no longer be trusted.
///
/// Assumes at most one concurrent pass per database; preventing overlapping
/// passes is the caller's responsibility.
pub fn run_sync_pass(
    conn: &Connection,
    api: &impl EvidenceApi,
    config: &SyncConfig,
) -> Result<SyncResult> {
    let batch = db::list_queue_for_sync(conn, config.batch_size)?;
    if batch.is_empty() {
        let summary = db::get_queue_summary(conn)?;
        return Ok(SyncResult {
            processed: 0,
            synced: 0,
            failed: 0,
            requires_review: 0,
            pending: summary.pending,
            message: "No pending queue operations.".to_string(),
        });
    }

    tracing::debug!(batch = batch.len(), "starting reconciliation pass");

    let mut synced: i64 = 0;
    let mut failed: i64 = 0;
    let mut requires_review: i64 = 0;

    for item in &batch {
        db::mark_queue_item_in_flight(conn, &item.id)?;
        db::refresh_evidence_sync_status(conn, &item.entity_id)?;

        match sync_item(conn, api, item) {
            Ok(()) => {
                db::mark_queue_item_synced(conn, &item.id)?;
                synced += 1;
            }
            Err(err) if is_storage_error(&err) => {
                // Local durability can no longer be trusted; blind
                // continuation risks corrupting queue state.
                return Err(err);
            }
            Err(err) => {
                let error_text = format!("{err:#}");
                tracing::warn!(
                    operation = %item.id,
                    entity = %item.entity_id,
                    error = %error_text,
                    "queue operation failed"
                );
                let status =
                    db::mark_queue_item_failed(conn, &item.id, &error_text, config.max_attempts)?;
                if status == SyncStatus::RequiresReview {
                    requires_review += 1;
                } else {
                    failed += 1;
                }
            }
        }

        db::refresh_evidence_sync_status(conn, &item.entity_id)?;
    }

    let summary = db::get_queue_summary(conn)?;
    let message = format!(
        "Processed {}. Synced {synced}, failed {failed}, review {requires_review}, pending {}.",
        batch.len(),
        summary.pending
    );
    tracing::info!(synced, failed, requires_review, pending = summary.pending, "reconciliation pass finished");

    Ok(SyncResult {
        processed: batch.len() as i64,
        synced,
        failed,
        requires_review,
        pending: summary.pending,
        message,
    })
}

fn sync_item(conn: &Connection, api: &impl EvidenceApi, item: &QueueItem) -> Result<()> {
    let Some(operation_type) = OperationType::parse(&item.operation_type) else {
        return Err(SyncError::Unsupported(item.operation_type.clone()).into());
    };

    let payload = QueuePayload::decode(operation_type, &item.payload_json).map_err(|err| {
        SyncError::Validation(format!("queue operation {}: {err}", item.id))
    })?;

    match payload {
        QueuePayload::CreateEvidence(payload) => {
            let server_evidence_id = api.create_evidence(&payload)?;
            if server_evidence_id.trim().is_empty() {
                return Err(anyhow!(
                    "queue operation {} did not receive an evidence id",
                    item.id
                ));
            }
            db::set_evidence_server_evidence_id(
                conn,
                &payload.local_evidence_id,
                &server_evidence_id,
            )?;
            Ok(())
        }
        QueuePayload::CreatePhoto(payload) => {
            let evidence = db::get_evidence_by_id(conn, &payload.local_evidence_id)?
                .ok_or_else(|| {
                    anyhow!("local evidence {} not found", payload.local_evidence_id)
                })?;
            let Some(server_evidence_id) = evidence.server_evidence_id else {
                return Err(SyncError::Ordering(payload.local_evidence_id.clone()).into());
            };

            let server_photo_id = match api.upload_photo(&payload, &server_evidence_id) {
                Ok(id) => id,
                Err(err) if is_endpoint_not_found(&err) => {
                    // Older backends only accept JSON photo creation.
                    api.create_photo_json(&payload, &server_evidence_id)?
                }
                Err(err) => return Err(err),
            };

            if !server_photo_id.trim().is_empty() {
                db::set_evidence_server_photo_id(
                    conn,
                    &payload.local_evidence_id,
                    &server_photo_id,
                )?;
            }
            Ok(())
        }
        QueuePayload::AppendAudit(_) => {
            Err(SyncError::Unsupported(operation_type.as_str().to_string()).into())
        }
    }
}

fn is_endpoint_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::EndpointNotFound(_))
    )
}

fn is_storage_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<rusqlite::Error>().is_some())
}
