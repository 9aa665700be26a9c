use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod queue_tests;

pub const DEFAULT_SYNC_BASE_URL: &str = "http://127.0.0.1:8000";

/// Cumulative delivery attempts before an operation stops being auto-retried.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

const MAX_ERROR_LENGTH: usize = 400;

const KV_SYNC_BASE_URL: &str = "sync_base_url";

/// Optional settings overriding the sync defaults per deployment.
pub const KV_SYNC_BATCH_SIZE: &str = "sync_batch_size";
pub const KV_SYNC_MAX_ATTEMPTS: &str = "sync_max_attempts";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    InFlight,
    Synced,
    Failed,
    RequiresReview,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::InFlight => "IN_FLIGHT",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::RequiresReview => "REQUIRES_REVIEW",
        }
    }

    /// Decodes a stored status. Unknown text maps to FAILED so a corrupted
    /// row surfaces as a problem instead of silently looking done.
    pub fn from_db(value: &str) -> SyncStatus {
        match value {
            "PENDING" => SyncStatus::Pending,
            "IN_FLIGHT" => SyncStatus::InFlight,
            "SYNCED" => SyncStatus::Synced,
            "REQUIRES_REVIEW" => SyncStatus::RequiresReview,
            _ => SyncStatus::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    CreateEvidence,
    CreatePhoto,
    AppendAudit,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::CreateEvidence => "CREATE_EVIDENCE",
            OperationType::CreatePhoto => "CREATE_PHOTO",
            OperationType::AppendAudit => "APPEND_AUDIT",
        }
    }

    pub fn parse(value: &str) -> Option<OperationType> {
        match value {
            "CREATE_EVIDENCE" => Some(OperationType::CreateEvidence),
            "CREATE_PHOTO" => Some(OperationType::CreatePhoto),
            "APPEND_AUDIT" => Some(OperationType::AppendAudit),
            _ => None,
        }
    }
}

/// Wire snapshot for a CREATE_EVIDENCE operation, captured at enqueue time.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateEvidencePayload {
    pub local_evidence_id: String,
    pub inspection_id: String,
    pub checklist_item_key: String,
    pub title: String,
    pub note_text: String,
    pub device_timestamp: String,
}

/// Wire snapshot for a CREATE_PHOTO operation, captured at enqueue time.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreatePhotoPayload {
    pub local_evidence_id: String,
    pub uri: String,
    pub exif_json: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub captured_at_device: String,
}

/// Wire snapshot for an APPEND_AUDIT operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppendAuditPayload {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub payload: serde_json::Value,
}

/// Type-tagged queue payload. The variant fixes the operation type, so a
/// payload can never be enqueued under the wrong tag.
#[derive(Clone, Debug)]
pub enum QueuePayload {
    CreateEvidence(CreateEvidencePayload),
    CreatePhoto(CreatePhotoPayload),
    AppendAudit(AppendAuditPayload),
}

impl QueuePayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            QueuePayload::CreateEvidence(_) => OperationType::CreateEvidence,
            QueuePayload::CreatePhoto(_) => OperationType::CreatePhoto,
            QueuePayload::AppendAudit(_) => OperationType::AppendAudit,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            QueuePayload::CreateEvidence(p) => serde_json::to_string(p)?,
            QueuePayload::CreatePhoto(p) => serde_json::to_string(p)?,
            QueuePayload::AppendAudit(p) => serde_json::to_string(p)?,
        };
        Ok(json)
    }

    /// Validates a stored payload against its operation type. This is the one
    /// place payload shape is checked before dispatch.
    pub fn decode(operation_type: OperationType, payload_json: &str) -> Result<QueuePayload> {
        let payload = match operation_type {
            OperationType::CreateEvidence => {
                QueuePayload::CreateEvidence(serde_json::from_str(payload_json)?)
            }
            OperationType::CreatePhoto => {
                QueuePayload::CreatePhoto(serde_json::from_str(payload_json)?)
            }
            OperationType::AppendAudit => {
                QueuePayload::AppendAudit(serde_json::from_str(payload_json)?)
            }
        };
        Ok(payload)
    }
}

#[derive(Clone, Debug)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PhotoCaptureInput {
    pub uri: String,
    pub exif_json: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Capture-submission record handed in by the capture UI. The core validates
/// structural shape only; content decisions stay with the caller.
#[derive(Clone, Debug)]
pub struct EvidenceCaptureInput {
    pub inspection_id: String,
    pub checklist_item_key: String,
    pub title: String,
    pub note_text: String,
    pub device_timestamp: String,
    pub timezone: String,
    pub gps: Option<GpsFix>,
    pub metadata_hash: String,
    pub photo: Option<PhotoCaptureInput>,
}

#[derive(Clone, Debug)]
pub struct EvidenceRecord {
    pub id: String,
    pub inspection_id: String,
    pub checklist_item_key: String,
    pub title: String,
    pub note_text: String,
    pub device_timestamp: String,
    pub timezone: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub metadata_hash: String,
    pub photo_uri: Option<String>,
    pub photo_exif_json: Option<String>,
    pub photo_metadata_hash: Option<String>,
    pub photo_width: Option<i64>,
    pub photo_height: Option<i64>,
    pub server_evidence_id: Option<String>,
    pub server_photo_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct QueueItem {
    pub id: String,
    pub entity_id: String,
    pub operation_type: String,
    pub payload_json: String,
    pub status: SyncStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub pending: i64,
    pub in_flight: i64,
    pub failed: i64,
    pub requires_review: i64,
    pub synced: i64,
    pub total: i64,
}

fn db_path(app_dir: &Path) -> PathBuf {
    app_dir.join("siteproof.sqlite3")
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS evidence_items (
  id TEXT PRIMARY KEY,
  inspection_id TEXT NOT NULL,
  checklist_item_key TEXT NOT NULL,
  title TEXT NOT NULL,
  note_text TEXT NOT NULL,
  device_timestamp TEXT NOT NULL,
  timezone TEXT NOT NULL,
  latitude REAL,
  longitude REAL,
  accuracy_meters REAL,
  metadata_hash TEXT NOT NULL,
  photo_uri TEXT,
  photo_exif_json TEXT,
  photo_metadata_hash TEXT,
  photo_width INTEGER,
  photo_height INTEGER,
  server_evidence_id TEXT,
  server_photo_id TEXT,
  sync_status TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_queue (
  id TEXT PRIMARY KEY,
  entity_id TEXT NOT NULL,
  operation_type TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  status TEXT NOT NULL,
  attempts INTEGER NOT NULL DEFAULT 0,
  last_error TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  FOREIGN KEY(entity_id) REFERENCES evidence_items(id)
);

CREATE INDEX IF NOT EXISTS idx_queue_status_created
  ON sync_queue(status, created_at);

CREATE INDEX IF NOT EXISTS idx_queue_entity_created
  ON sync_queue(entity_id, created_at);

PRAGMA user_version = 1;
"#,
        )?;
        tracing::debug!("initialized schema v1");
    }

    Ok(())
}

pub fn open(app_dir: &Path) -> Result<Connection> {
    fs::create_dir_all(app_dir)?;
    let conn = Connection::open(db_path(app_dir))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value: Option<String> = conn
        .query_row(
            r#"SELECT value FROM kv WHERE key = ?1"#,
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn kv_set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"INSERT INTO kv(key, value) VALUES (?1, ?2)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        params![key, value],
    )?;
    Ok(())
}

pub fn kv_get_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let value = kv_get(conn, key)?;
    Ok(value.and_then(|v| v.parse::<i64>().ok()))
}

pub fn kv_set_i64(conn: &Connection, key: &str, value: i64) -> Result<()> {
    kv_set(conn, key, &value.to_string())
}

fn sanitize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return DEFAULT_SYNC_BASE_URL.to_string();
    }
    trimmed.trim_end_matches('/').to_string()
}

pub fn get_sync_base_url(conn: &Connection) -> Result<String> {
    let stored = kv_get(conn, KV_SYNC_BASE_URL)?;
    Ok(sanitize_base_url(
        stored.as_deref().unwrap_or(DEFAULT_SYNC_BASE_URL),
    ))
}

pub fn set_sync_base_url(conn: &Connection, url: &str) -> Result<String> {
    let normalized = sanitize_base_url(url);
    kv_set(conn, KV_SYNC_BASE_URL, &normalized)?;
    Ok(normalized)
}

fn compact_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LENGTH {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LENGTH;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Evidence-level status derived from its operations' statuses. Severity
/// first, so the worst outstanding condition wins; "done" requires every
/// dependent operation cleared. An entity with no operations is SYNCED.
pub fn derive_evidence_status(operation_statuses: &[SyncStatus]) -> SyncStatus {
    const SEVERITY: [SyncStatus; 5] = [
        SyncStatus::RequiresReview,
        SyncStatus::Failed,
        SyncStatus::InFlight,
        SyncStatus::Pending,
        SyncStatus::Synced,
    ];

    for candidate in SEVERITY {
        if operation_statuses.contains(&candidate) {
            return candidate;
        }
    }
    SyncStatus::Synced
}

fn require_field<'a>(value: &'a str, name: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is required"));
    }
    Ok(trimmed)
}

/// Creates the evidence row together with its CREATE_EVIDENCE operation (and
/// CREATE_PHOTO operation when a photo descriptor is present) in one
/// transaction, so a crash can never leave a record without its delivery
/// work or vice versa.
pub fn create_evidence_capture(
    conn: &Connection,
    input: &EvidenceCaptureInput,
) -> Result<EvidenceRecord> {
    let inspection_id = require_field(&input.inspection_id, "inspection_id")?;
    let checklist_item_key = require_field(&input.checklist_item_key, "checklist_item_key")?;
    let title = require_field(&input.title, "title")?;
    let device_timestamp = require_field(&input.device_timestamp, "device_timestamp")?;
    let timezone = require_field(&input.timezone, "timezone")?;
    let metadata_hash = require_field(&input.metadata_hash, "metadata_hash")?;

    let evidence_id = uuid::Uuid::new_v4().to_string();
    let now = now_ms();

    let latitude = input.gps.as_ref().map(|gps| gps.latitude);
    let longitude = input.gps.as_ref().map(|gps| gps.longitude);
    let accuracy_meters = input.gps.as_ref().and_then(|gps| gps.accuracy_meters);

    let evidence_payload = QueuePayload::CreateEvidence(CreateEvidencePayload {
        local_evidence_id: evidence_id.clone(),
        inspection_id: inspection_id.to_string(),
        checklist_item_key: checklist_item_key.to_string(),
        title: title.to_string(),
        note_text: input.note_text.clone(),
        device_timestamp: device_timestamp.to_string(),
    });

    let photo_payload = input.photo.as_ref().map(|photo| {
        QueuePayload::CreatePhoto(CreatePhotoPayload {
            local_evidence_id: evidence_id.clone(),
            uri: photo.uri.clone(),
            exif_json: photo.exif_json.clone(),
            latitude,
            longitude,
            accuracy_meters,
            captured_at_device: device_timestamp.to_string(),
        })
    });

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        r#"
INSERT INTO evidence_items (
  id,
  inspection_id,
  checklist_item_key,
  title,
  note_text,
  device_timestamp,
  timezone,
  latitude,
  longitude,
  accuracy_meters,
  metadata_hash,
  photo_uri,
  photo_exif_json,
  photo_metadata_hash,
  photo_width,
  photo_height,
  server_evidence_id,
  server_photo_id,
  sync_status,
  created_at,
  updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, NULL, NULL, ?17, ?18, ?18)
"#,
        params![
            evidence_id,
            inspection_id,
            checklist_item_key,
            title,
            input.note_text,
            device_timestamp,
            timezone,
            latitude,
            longitude,
            accuracy_meters,
            metadata_hash,
            input.photo.as_ref().map(|p| p.uri.as_str()),
            input.photo.as_ref().map(|p| p.exif_json.as_str()),
            input.photo.as_ref().map(|_| metadata_hash),
            input.photo.as_ref().and_then(|p| p.width),
            input.photo.as_ref().and_then(|p| p.height),
            SyncStatus::Pending.as_str(),
            now,
        ],
    )?;

    insert_queue_operation(&tx, &evidence_id, &evidence_payload, now)?;
    if let Some(photo_payload) = &photo_payload {
        insert_queue_operation(&tx, &evidence_id, photo_payload, now)?;
    }
    tx.commit()?;

    get_evidence_by_id(conn, &evidence_id)?
        .ok_or_else(|| anyhow!("evidence capture was not saved"))
}

fn insert_queue_operation(
    conn: &Connection,
    entity_id: &str,
    payload: &QueuePayload,
    now: i64,
) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        r#"
INSERT INTO sync_queue (
  id,
  entity_id,
  operation_type,
  payload_json,
  status,
  attempts,
  last_error,
  created_at,
  updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6, ?6)
"#,
        params![
            id,
            entity_id,
            payload.operation_type().as_str(),
            payload.to_json()?,
            SyncStatus::Pending.as_str(),
            now,
        ],
    )?;
    Ok(id)
}

/// Persists a new PENDING operation for an existing evidence record.
pub fn enqueue_operation(
    conn: &Connection,
    entity_id: &str,
    payload: &QueuePayload,
) -> Result<QueueItem> {
    let entity_id = require_field(entity_id, "entity_id")?;
    let id = insert_queue_operation(conn, entity_id, payload, now_ms())?;
    get_queue_item(conn, &id)?.ok_or_else(|| anyhow!("queue operation was not saved"))
}

fn evidence_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceRecord> {
    let sync_status: String = row.get(18)?;
    Ok(EvidenceRecord {
        id: row.get(0)?,
        inspection_id: row.get(1)?,
        checklist_item_key: row.get(2)?,
        title: row.get(3)?,
        note_text: row.get(4)?,
        device_timestamp: row.get(5)?,
        timezone: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        accuracy_meters: row.get(9)?,
        metadata_hash: row.get(10)?,
        photo_uri: row.get(11)?,
        photo_exif_json: row.get(12)?,
        photo_metadata_hash: row.get(13)?,
        photo_width: row.get(14)?,
        photo_height: row.get(15)?,
        server_evidence_id: row.get(16)?,
        server_photo_id: row.get(17)?,
        sync_status: SyncStatus::from_db(&sync_status),
        created_at_ms: row.get(19)?,
        updated_at_ms: row.get(20)?,
    })
}

const EVIDENCE_COLUMNS: &str = r#"
  id,
  inspection_id,
  checklist_item_key,
  title,
  note_text,
  device_timestamp,
  timezone,
  latitude,
  longitude,
  accuracy_meters,
  metadata_hash,
  photo_uri,
  photo_exif_json,
  photo_metadata_hash,
  photo_width,
  photo_height,
  server_evidence_id,
  server_photo_id,
  sync_status,
  created_at,
  updated_at
"#;

pub fn get_evidence_by_id(conn: &Connection, evidence_id: &str) -> Result<Option<EvidenceRecord>> {
    let record = conn
        .query_row(
            &format!(r#"SELECT {EVIDENCE_COLUMNS} FROM evidence_items WHERE id = ?1"#),
            params![evidence_id],
            evidence_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_recent_evidence(conn: &Connection, limit: i64) -> Result<Vec<EvidenceRecord>> {
    let limit = limit.clamp(1, 500);
    let mut stmt = conn.prepare(&format!(
        r#"SELECT {EVIDENCE_COLUMNS}
FROM evidence_items
ORDER BY created_at DESC, rowid DESC
LIMIT ?1"#
    ))?;

    let mut rows = stmt.query(params![limit])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(evidence_from_row(row)?);
    }
    Ok(result)
}

pub fn set_evidence_server_evidence_id(
    conn: &Connection,
    evidence_id: &str,
    server_evidence_id: &str,
) -> Result<()> {
    conn.execute(
        r#"
UPDATE evidence_items
SET server_evidence_id = ?2,
    updated_at = ?3
WHERE id = ?1
"#,
        params![evidence_id, server_evidence_id, now_ms()],
    )?;
    Ok(())
}

pub fn set_evidence_server_photo_id(
    conn: &Connection,
    evidence_id: &str,
    server_photo_id: &str,
) -> Result<()> {
    conn.execute(
        r#"
UPDATE evidence_items
SET server_photo_id = ?2,
    updated_at = ?3
WHERE id = ?1
"#,
        params![evidence_id, server_photo_id, now_ms()],
    )?;
    Ok(())
}

/// Recomputes the derived status from the entity's operations and persists
/// it. The stored column is a cache for display, never the source of truth.
pub fn refresh_evidence_sync_status(conn: &Connection, evidence_id: &str) -> Result<SyncStatus> {
    let mut stmt =
        conn.prepare(r#"SELECT status FROM sync_queue WHERE entity_id = ?1"#)?;
    let mut rows = stmt.query(params![evidence_id])?;

    let mut statuses = Vec::new();
    while let Some(row) = rows.next()? {
        let status: String = row.get(0)?;
        statuses.push(SyncStatus::from_db(&status));
    }

    let derived = derive_evidence_status(&statuses);
    conn.execute(
        r#"
UPDATE evidence_items
SET sync_status = ?2,
    updated_at = ?3
WHERE id = ?1
"#,
        params![evidence_id, derived.as_str(), now_ms()],
    )?;
    Ok(derived)
}

fn queue_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let status: String = row.get(4)?;
    Ok(QueueItem {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        operation_type: row.get(2)?,
        payload_json: row.get(3)?,
        status: SyncStatus::from_db(&status),
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        created_at_ms: row.get(7)?,
        updated_at_ms: row.get(8)?,
    })
}

const QUEUE_COLUMNS: &str = r#"
  id,
  entity_id,
  operation_type,
  payload_json,
  status,
  attempts,
  last_error,
  created_at,
  updated_at
"#;

pub fn get_queue_item(conn: &Connection, queue_id: &str) -> Result<Option<QueueItem>> {
    let item = conn
        .query_row(
            &format!(r#"SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1"#),
            params![queue_id],
            queue_item_from_row,
        )
        .optional()?;
    Ok(item)
}

pub fn list_queue(conn: &Connection, limit: i64) -> Result<Vec<QueueItem>> {
    let limit = limit.clamp(1, 500);
    let mut stmt = conn.prepare(&format!(
        r#"SELECT {QUEUE_COLUMNS}
FROM sync_queue
ORDER BY created_at ASC, rowid ASC
LIMIT ?1"#
    ))?;

    let mut rows = stmt.query(params![limit])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(queue_item_from_row(row)?);
    }
    Ok(result)
}

/// Operations eligible for the next reconciliation pass, strict FIFO. The
/// rowid tiebreak keeps same-millisecond rows in insertion order.
pub fn list_queue_for_sync(conn: &Connection, limit: i64) -> Result<Vec<QueueItem>> {
    let limit = limit.clamp(1, 500);
    let mut stmt = conn.prepare(&format!(
        r#"SELECT {QUEUE_COLUMNS}
FROM sync_queue
WHERE status IN ('PENDING', 'FAILED')
ORDER BY created_at ASC, rowid ASC
LIMIT ?1"#
    ))?;

    let mut rows = stmt.query(params![limit])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(queue_item_from_row(row)?);
    }
    Ok(result)
}

pub fn get_queue_summary(conn: &Connection) -> Result<QueueSummary> {
    let mut summary = QueueSummary::default();

    let mut stmt =
        conn.prepare(r#"SELECT status, COUNT(*) FROM sync_queue GROUP BY status"#)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let status: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        match SyncStatus::from_db(&status) {
            SyncStatus::Pending => summary.pending = count,
            SyncStatus::InFlight => summary.in_flight = count,
            SyncStatus::Failed => summary.failed += count,
            SyncStatus::RequiresReview => summary.requires_review = count,
            SyncStatus::Synced => summary.synced = count,
        }
        summary.total += count;
    }
    Ok(summary)
}

pub fn mark_queue_item_in_flight(conn: &Connection, queue_id: &str) -> Result<()> {
    conn.execute(
        r#"
UPDATE sync_queue
SET status = ?2,
    last_error = NULL,
    updated_at = ?3
WHERE id = ?1
"#,
        params![queue_id, SyncStatus::InFlight.as_str(), now_ms()],
    )?;
    Ok(())
}

pub fn mark_queue_item_synced(conn: &Connection, queue_id: &str) -> Result<()> {
    conn.execute(
        r#"
UPDATE sync_queue
SET status = ?2,
    last_error = NULL,
    updated_at = ?3
WHERE id = ?1
"#,
        params![queue_id, SyncStatus::Synced.as_str(), now_ms()],
    )?;
    Ok(())
}

/// Records a failed delivery: bumps attempts, stores the truncated error and
/// classifies the result. Once attempts reach `max_attempts` the operation
/// escalates to REQUIRES_REVIEW and automatic retry stops.
pub fn mark_queue_item_failed(
    conn: &Connection,
    queue_id: &str,
    error_text: &str,
    max_attempts: i64,
) -> Result<SyncStatus> {
    let attempts: Option<i64> = conn
        .query_row(
            r#"SELECT attempts FROM sync_queue WHERE id = ?1"#,
            params![queue_id],
            |row| row.get(0),
        )
        .optional()?;
    let attempts = attempts.ok_or_else(|| anyhow!("queue operation not found: {queue_id}"))? + 1;

    let status = if attempts >= max_attempts {
        SyncStatus::RequiresReview
    } else {
        SyncStatus::Failed
    };

    conn.execute(
        r#"
UPDATE sync_queue
SET status = ?2,
    attempts = ?3,
    last_error = ?4,
    updated_at = ?5
WHERE id = ?1
"#,
        params![
            queue_id,
            status.as_str(),
            attempts,
            compact_error(error_text),
            now_ms(),
        ],
    )?;
    Ok(status)
}
