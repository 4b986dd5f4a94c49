//! HTTP client for uploading reports to the MemBrowse-style API and parsing
//! its success/error response shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const UPLOAD_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request timed out")]
    Timeout,
    #[error("failed to connect to MemBrowse API")]
    Connection,
    #[error("upload failed: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("budget alerts detected: {count} budget(s) exceeded. Use --dont-fail-on-alerts to continue despite alerts.")]
pub struct BudgetAlertError {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitMetadataPayload {
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_timestamp: String,
    pub base_commit_hash: String,
    pub branch_name: String,
    pub pr_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadMetadata {
    pub git: GitMetadataPayload,
    pub repository: String,
    pub target_name: String,
    pub analysis_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub metadata: UploadMetadata,
    pub memory_analysis: membrowse_report::Report,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetAlert {
    pub region: String,
    pub budget_type: String,
    pub threshold: i64,
    pub current: i64,
    pub exceeded_by: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadAlerts {
    #[serde(default)]
    pub budgets: Vec<BudgetAlert>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponseData {
    #[serde(default)]
    pub is_overwritten: bool,
    #[serde(default)]
    pub changes_summary: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub alerts: UploadAlerts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub data: UploadResponseData,
    pub error: Option<String>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub upgrade_url: Option<String>,
}

pub struct MemBrowseUploader {
    client: reqwest::blocking::Client,
    api_endpoint: String,
}

impl MemBrowseUploader {
    pub fn new(api_key: &str, api_endpoint: &str) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))?,
        );
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_str(&format!(
                "membrowse-cli/{}",
                env!("CARGO_PKG_VERSION")
            ))?,
        );

        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()?;

        Ok(MemBrowseUploader {
            client,
            api_endpoint: api_endpoint.to_string(),
        })
    }

    /// Uploads `request` and returns the parsed response. When any budget
    /// alert is present and `fail_on_alerts` is set, returns
    /// `Err(BudgetAlertError)` after still returning the parsed response to
    /// the caller via `tracing::warn!` side effects — callers should check
    /// the result type to decide the process exit code.
    pub fn upload_report(
        &self,
        request: &UploadRequest,
        fail_on_alerts: bool,
    ) -> anyhow::Result<UploadResponse> {
        tracing::info!(endpoint = %self.api_endpoint, "uploading report to MemBrowse");

        let response = self
            .client
            .post(&self.api_endpoint)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::Timeout
                } else if e.is_connect() {
                    UploadError::Connection
                } else {
                    UploadError::Other(e.to_string())
                }
            })?;

        let status = response.status();
        let parsed: UploadResponse = response
            .json()
            .map_err(|e| UploadError::Other(format!("HTTP {status}: invalid JSON response ({e})")))?;

        if status.is_success() && parsed.success {
            return self.handle_success(parsed, fail_on_alerts);
        }

        Err(self.error_for_response(status, &parsed).into())
    }

    fn handle_success(
        &self,
        response: UploadResponse,
        fail_on_alerts: bool,
    ) -> anyhow::Result<UploadResponse> {
        tracing::info!("report uploaded successfully to MemBrowse");
        if let Some(message) = &response.message {
            tracing::info!("{message}");
        }
        if response.data.is_overwritten {
            tracing::warn!("this upload overwrote existing data");
        }

        let budget_alerts = &response.data.alerts.budgets;
        if !budget_alerts.is_empty() {
            for alert in budget_alerts {
                tracing::warn!(
                    region = %alert.region,
                    budget_type = %alert.budget_type,
                    threshold = alert.threshold,
                    current = alert.current,
                    exceeded_by = alert.exceeded_by,
                    "budget alert"
                );
            }
            if fail_on_alerts {
                return Err(BudgetAlertError { count: budget_alerts.len() }.into());
            }
        }

        Ok(response)
    }

    fn error_for_response(&self, status: reqwest::StatusCode, response: &UploadResponse) -> UploadError {
        let error = response.error.as_deref().unwrap_or("Unknown error");
        let error_type = response.error_type.as_deref().unwrap_or("UnknownError");
        let mut message = format!("HTTP {status}: {error_type} - {error}");
        if let Some(upgrade_url) = &response.upgrade_url {
            message.push_str(&format!("\nUpgrade at: {upgrade_url}"));
        }
        UploadError::Other(message)
    }
}
