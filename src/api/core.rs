use std::path::Path;

use anyhow::Result;

use crate::db;
use crate::db::{EvidenceCaptureInput, EvidenceRecord, QueueItem, QueueSummary};
use crate::sync;
use crate::sync::http::HttpEvidenceApi;
use crate::sync::{SyncConfig, SyncResult};

pub fn capture_evidence(app_dir: &Path, input: &EvidenceCaptureInput) -> Result<EvidenceRecord> {
    let conn = db::open(app_dir)?;
    db::create_evidence_capture(&conn, input)
}

pub fn get_evidence(app_dir: &Path, evidence_id: &str) -> Result<Option<EvidenceRecord>> {
    let conn = db::open(app_dir)?;
    db::get_evidence_by_id(&conn, evidence_id)
}

pub fn list_recent_evidence(app_dir: &Path, limit: i64) -> Result<Vec<EvidenceRecord>> {
    let conn = db::open(app_dir)?;
    db::list_recent_evidence(&conn, limit)
}

pub fn queue_summary(app_dir: &Path) -> Result<QueueSummary> {
    let conn = db::open(app_dir)?;
    db::get_queue_summary(&conn)
}

pub fn queue_items(app_dir: &Path, limit: i64) -> Result<Vec<QueueItem>> {
    let conn = db::open(app_dir)?;
    db::list_queue(&conn, limit)
}

pub fn get_sync_base_url(app_dir: &Path) -> Result<String> {
    let conn = db::open(app_dir)?;
    db::get_sync_base_url(&conn)
}

pub fn set_sync_base_url(app_dir: &Path, url: &str) -> Result<String> {
    let conn = db::open(app_dir)?;
    db::set_sync_base_url(&conn, url)
}

/// Default sync configuration with the locally stored base URL and any
/// per-deployment batch-size / retry-threshold overrides applied.
pub fn sync_config_from_settings(app_dir: &Path) -> Result<SyncConfig> {
    let conn = db::open(app_dir)?;
    let mut config = SyncConfig {
        base_url: db::get_sync_base_url(&conn)?,
        ..SyncConfig::default()
    };
    if let Some(batch_size) = db::kv_get_i64(&conn, db::KV_SYNC_BATCH_SIZE)? {
        config.batch_size = batch_size;
    }
    if let Some(max_attempts) = db::kv_get_i64(&conn, db::KV_SYNC_MAX_ATTEMPTS)? {
        config.max_attempts = max_attempts;
    }
    Ok(config)
}

/// One reconciliation pass against the remote authority over HTTP.
pub fn run_sync(app_dir: &Path, config: &SyncConfig) -> Result<SyncResult> {
    let conn = db::open(app_dir)?;
    let api = HttpEvidenceApi::new(config)?;
    sync::run_sync_pass(&conn, &api, config)
}

pub fn check_server_health(base_url: &str) -> bool {
    sync::http::check_server_health(base_url)
}
