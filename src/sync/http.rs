use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::db::{CreateEvidencePayload, CreatePhotoPayload};

use super::{EvidenceApi, SyncConfig, SyncError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BODY_SNIPPET: usize = 180;

#[derive(Debug, Serialize)]
struct EvidenceCreateRequest<'a> {
    inspection_id: &'a str,
    checklist_item_key: &'a str,
    title: &'a str,
    note_text: &'a str,
    device_timestamp: &'a str,
}

#[derive(Debug, Serialize)]
struct PhotoCreateRequest<'a> {
    evidence_item_id: &'a str,
    uri: &'a str,
    exif_json: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy_meters: Option<f64>,
    captured_at_device: &'a str,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    let base = base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(anyhow!("sync base URL is required"));
    }
    Ok(base.to_string())
}

fn mime_type_from_uri(uri: &str) -> &'static str {
    let normalized = uri.to_lowercase();
    if normalized.ends_with(".png") {
        return "image/png";
    }
    if normalized.ends_with(".heic") || normalized.ends_with(".heif") {
        return "image/heic";
    }
    "image/jpeg"
}

fn body_snippet(text: &str) -> String {
    if text.len() <= MAX_BODY_SNIPPET {
        return text.to_string();
    }
    let mut end = MAX_BODY_SNIPPET;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn transport_error(err: reqwest::Error) -> anyhow::Error {
    SyncError::Network(err.to_string()).into()
}

fn read_id_response(response: reqwest::blocking::Response) -> Result<String> {
    let status = response.status();
    let text = response.text().map_err(transport_error)?;
    if !status.is_success() {
        return Err(SyncError::Server {
            status: status.as_u16(),
            body: body_snippet(&text),
        }
        .into());
    }

    let parsed: IdResponse = serde_json::from_str(&text).map_err(|err| SyncError::Server {
        status: status.as_u16(),
        body: format!("unparseable response: {err}"),
    })?;
    Ok(parsed.id)
}

/// Blocking HTTP transport for the remote evidence authority. Tenant, user
/// and role identifying headers are attached to every call.
pub struct HttpEvidenceApi {
    client: Client,
    base_url: String,
    tenant_id: String,
    user_id: String,
    user_role: String,
}

impl HttpEvidenceApi {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            tenant_id: config.tenant_id.clone(),
            user_id: config.user_id.clone(),
            user_role: config.user_role.clone(),
        })
    }

    fn post(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("X-Tenant-ID", &self.tenant_id)
            .header("X-User-ID", &self.user_id)
            .header("X-User-Role", &self.user_role)
    }
}

impl EvidenceApi for HttpEvidenceApi {
    fn create_evidence(&self, payload: &CreateEvidencePayload) -> Result<String> {
        let response = self
            .post("/api/v1/evidence")
            .json(&EvidenceCreateRequest {
                inspection_id: &payload.inspection_id,
                checklist_item_key: &payload.checklist_item_key,
                title: &payload.title,
                note_text: &payload.note_text,
                device_timestamp: &payload.device_timestamp,
            })
            .send()
            .map_err(transport_error)?;
        read_id_response(response)
    }

    fn upload_photo(
        &self,
        payload: &CreatePhotoPayload,
        server_evidence_id: &str,
    ) -> Result<String> {
        let extension = if payload.uri.to_lowercase().ends_with(".png") {
            "png"
        } else {
            "jpg"
        };
        let file_path = payload.uri.strip_prefix("file://").unwrap_or(&payload.uri);
        let bytes = fs::read(file_path)
            .with_context(|| format!("failed to read photo file {file_path}"))?;

        let file_part = multipart::Part::bytes(bytes)
            .file_name(format!(
                "evidence-{}.{extension}",
                payload.local_evidence_id
            ))
            .mime_str(mime_type_from_uri(&payload.uri))?;

        let mut form = multipart::Form::new()
            .text("evidence_item_id", server_evidence_id.to_string())
            .text("captured_at_device", payload.captured_at_device.clone())
            .text("exif_json", payload.exif_json.clone());
        if let Some(latitude) = payload.latitude {
            form = form.text("latitude", latitude.to_string());
        }
        if let Some(longitude) = payload.longitude {
            form = form.text("longitude", longitude.to_string());
        }
        if let Some(accuracy_meters) = payload.accuracy_meters {
            form = form.text("accuracy_meters", accuracy_meters.to_string());
        }
        let form = form.part("file", file_part);

        let response = self
            .post("/api/v1/photos/upload")
            .multipart(form)
            .send()
            .map_err(transport_error)?;

        if response.status().as_u16() == 404 {
            return Err(
                SyncError::EndpointNotFound("/api/v1/photos/upload".to_string()).into(),
            );
        }
        read_id_response(response)
    }

    fn create_photo_json(
        &self,
        payload: &CreatePhotoPayload,
        server_evidence_id: &str,
    ) -> Result<String> {
        let response = self
            .post("/api/v1/photos")
            .json(&PhotoCreateRequest {
                evidence_item_id: server_evidence_id,
                uri: &payload.uri,
                exif_json: &payload.exif_json,
                latitude: payload.latitude,
                longitude: payload.longitude,
                accuracy_meters: payload.accuracy_meters,
                captured_at_device: &payload.captured_at_device,
            })
            .send()
            .map_err(transport_error)?;
        read_id_response(response)
    }
}

/// Reachability probe against `GET {base}/api/v1/health`. Never used by the
/// reconciler; connectivity checks are a caller concern.
pub fn check_server_health(base_url: &str) -> bool {
    let Ok(base) = normalize_base_url(base_url) else {
        return false;
    };
    let Ok(client) = Client::builder().timeout(HEALTH_TIMEOUT).build() else {
        return false;
    };

    match client.get(format!("{base}/api/v1/health")).send() {
        Ok(response) if response.status().is_success() => response
            .json::<HealthResponse>()
            .map(|health| health.status == "ok")
            .unwrap_or(false),
        _ => false,
    }
}
