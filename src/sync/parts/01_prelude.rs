use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::db;
use crate::db::{
    CreateEvidencePayload, CreatePhotoPayload, OperationType, QueueItem, QueuePayload, SyncStatus,
};

/// Default number of eligible operations drained per reconciliation pass.
pub const DEFAULT_SYNC_BATCH_SIZE: i64 = 20;

const DEFAULT_TENANT_ID: &str = "default";
const DEFAULT_USER_ID: &str = "00000000-0000-0000-0000-000000000001";
const DEFAULT_USER_ROLE: &str = "INSPECTOR";

/// Failure classes observed while delivering one queue operation. Everything
/// here is recorded on the operation and retried (or escalated) through the
/// normal bookkeeping; only local storage failures abort a pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid queue payload: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error: HTTP {status} {body}")]
    Server { status: u16, body: String },

    /// Dependent entity not yet delivered; self-resolves once the
    /// predecessor operation clears.
    #[error("evidence {0} has no server evidence id yet")]
    Ordering(String),

    /// The endpoint itself is missing (older backend); the caller may retry
    /// through a compatibility path.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("unsupported queue operation type: {0}")]
    Unsupported(String),
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub base_url: String,
    pub tenant_id: String,
    pub user_id: String,
    pub user_role: String,
    pub batch_size: i64,
    pub max_attempts: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: db::DEFAULT_SYNC_BASE_URL.to_string(),
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            user_role: DEFAULT_USER_ROLE.to_string(),
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            max_attempts: db::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Aggregate outcome of one reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncResult {
    pub processed: i64,
    pub synced: i64,
    pub failed: i64,
    pub requires_review: i64,
    pub pending: i64,
    pub message: String,
}

/// The wire contract the reconciler dispatches through. Each method returns
/// the server-assigned id for the created resource.
pub trait EvidenceApi: Send + Sync {
    fn create_evidence(&self, payload: &CreateEvidencePayload) -> Result<String>;

    fn upload_photo(
        &self,
        payload: &CreatePhotoPayload,
        server_evidence_id: &str,
    ) -> Result<String>;

    /// Compatibility path for backends that only accept JSON photo creation.
    fn create_photo_json(
        &self,
        payload: &CreatePhotoPayload,
        server_evidence_id: &str,
    ) -> Result<String>;
}

#[derive(Default)]
struct InMemoryApiState {
    next_evidence_id: u64,
    next_photo_id: u64,
    create_evidence_error: Option<u16>,
    upload_not_found: bool,
    upload_error: Option<u16>,
    create_photo_json_error: Option<u16>,
    created_evidence: Vec<CreateEvidencePayload>,
    multipart_uploads: Vec<(String, CreatePhotoPayload)>,
    json_photo_creates: Vec<(String, CreatePhotoPayload)>,
}

/// Scripted stand-in for the remote authority, used by tests. Assigns
/// sequential ids (`srv-1`, `srv-photo-1`, ...) and records every call.
pub struct InMemoryEvidenceApi {
    state: Mutex<InMemoryApiState>,
}

impl InMemoryEvidenceApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryApiState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryApiState>> {
        self.state.lock().map_err(|_| anyhow!("poisoned lock"))
    }

    /// Every `create_evidence` call fails with this HTTP status until cleared.
    pub fn fail_create_evidence_with(&self, status: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.create_evidence_error = Some(status);
        }
    }

    pub fn clear_create_evidence_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.create_evidence_error = None;
        }
    }

    /// The multipart upload endpoint reports "not found" (older backend).
    pub fn fail_upload_with_not_found(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.upload_not_found = true;
        }
    }

    pub fn fail_upload_with(&self, status: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.upload_error = Some(status);
        }
    }

    pub fn fail_create_photo_json_with(&self, status: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.create_photo_json_error = Some(status);
        }
    }

    pub fn created_evidence(&self) -> Vec<CreateEvidencePayload> {
        self.state
            .lock()
            .map(|state| state.created_evidence.clone())
            .unwrap_or_default()
    }

    pub fn multipart_uploads(&self) -> Vec<(String, CreatePhotoPayload)> {
        self.state
            .lock()
            .map(|state| state.multipart_uploads.clone())
            .unwrap_or_default()
    }

    pub fn json_photo_creates(&self) -> Vec<(String, CreatePhotoPayload)> {
        self.state
            .lock()
            .map(|state| state.json_photo_creates.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryEvidenceApi {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceApi for InMemoryEvidenceApi {
    fn create_evidence(&self, payload: &CreateEvidencePayload) -> Result<String> {
        let mut state = self.lock()?;
        if let Some(status) = state.create_evidence_error {
            return Err(SyncError::Server {
                status,
                body: "stubbed evidence failure".to_string(),
            }
            .into());
        }
        state.next_evidence_id += 1;
        let id = format!("srv-{}", state.next_evidence_id);
        state.created_evidence.push(payload.clone());
        Ok(id)
    }

    fn upload_photo(
        &self,
        payload: &CreatePhotoPayload,
        server_evidence_id: &str,
    ) -> Result<String> {
        let mut state = self.lock()?;
        if state.upload_not_found {
            return Err(
                SyncError::EndpointNotFound("/api/v1/photos/upload".to_string()).into(),
            );
        }
        if let Some(status) = state.upload_error {
            return Err(SyncError::Server {
                status,
                body: "stubbed upload failure".to_string(),
            }
            .into());
        }
        state.next_photo_id += 1;
        let id = format!("srv-photo-{}", state.next_photo_id);
        state
            .multipart_uploads
            .push((server_evidence_id.to_string(), payload.clone()));
        Ok(id)
    }

    fn create_photo_json(
        &self,
        payload: &CreatePhotoPayload,
        server_evidence_id: &str,
    ) -> Result<String> {
        let mut state = self.lock()?;
        if let Some(status) = state.create_photo_json_error {
            return Err(SyncError::Server {
                status,
                body: "stubbed json photo failure".to_string(),
            }
            .into());
        }
        state.next_photo_id += 1;
        let id = format!("srv-photo-{}", state.next_photo_id);
        state
            .json_photo_creates
            .push((server_evidence_id.to_string(), payload.clone()));
        Ok(id)
    }
}
