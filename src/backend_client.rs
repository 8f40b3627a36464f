use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::{snippet, AppError};
use crate::handlers::API_KEY_HEADER;
use crate::lookup::RegistryLookup;
use crate::models::{FullReportResponse, ReportResult, SearchRecord, SearchResponse};
use crate::validators::mask_key;

const BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the lookup proxy, as used from the widget side.
#[derive(Clone)]
pub struct GusBackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GusBackendClient {
    /// Creates a new `GusBackendClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The proxy base URL; a trailing slash is ignored.
    /// * `api_key` - Registry key forwarded as `x-gus-api-key`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create backend client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, AppError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {} with key {}", url, mask_key(&self.api_key));

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let data: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let message = data
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            tracing::warn!("Backend {} returned {}: {}", path, status, message);
            return Err(AppError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        if data.is_null() {
            return Err(AppError::Protocol {
                message: format!("Backend {} returned a non-JSON body", path),
                debug: Some(snippet(&text, 300)),
            });
        }
        Ok(data)
    }

    /// `POST /api/gus/name-by-nip`.
    pub async fn search_by_nip(&self, nip: &str) -> Result<Vec<SearchRecord>, AppError> {
        let data = self
            .post("/api/gus/name-by-nip", json!({ "nip": nip }))
            .await?;
        let response: SearchResponse = serde_json::from_value(data).map_err(|e| {
            AppError::Protocol {
                message: format!("Failed to parse search response: {}", e),
                debug: None,
            }
        })?;
        Ok(response.data)
    }

    /// `POST /api/gus/full-report`.
    ///
    /// # Returns
    ///
    /// * `Ok(FullReportResponse)` - Including `kind: "error"` answers, which are 200.
    pub async fn full_report_response(
        &self,
        regon: &str,
        report_name: &str,
    ) -> Result<FullReportResponse, AppError> {
        let data = self
            .post(
                "/api/gus/full-report",
                json!({ "regon": regon, "reportName": report_name }),
            )
            .await?;
        serde_json::from_value(data).map_err(|e| AppError::Protocol {
            message: format!("Failed to parse full report response: {}", e),
            debug: None,
        })
    }
}

#[async_trait]
impl RegistryLookup for GusBackendClient {
    async fn search_by_nip(&self, nip: &str) -> Result<Vec<SearchRecord>, AppError> {
        GusBackendClient::search_by_nip(self, nip).await
    }

    async fn full_report(&self, regon: &str, report_name: &str) -> Result<ReportResult, AppError> {
        let response = self.full_report_response(regon, report_name).await?;
        ReportResult::from_wire(&response.kind, &response.data)
    }
}
