use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::reports::RegistryNumber;
use crate::services::GusService;
use crate::validators::{mask_key, require_nip};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-gus-api-key";
const API_KEY_MAX_CHARS: usize = 100;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

/// Caller key from `x-gus-api-key` (first 100 chars), else the server-side key.
pub fn resolve_api_key(headers: &HeaderMap, config: &Config) -> Result<String, AppError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().chars().take(API_KEY_MAX_CHARS).collect::<String>())
        .filter(|v| !v.is_empty())
        .or_else(|| config.gus_api_key.clone())
        .ok_or_else(|| AppError::Validation("Brak klucza API GUS".to_string()))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(format!("Nieprawidłowe dane: {}", rejection.body_text())))
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-gus-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /lookup/by-id
///
/// Basic registry search by NIP. Body `{"id": "..."}` (`nip` accepted).
pub async fn lookup_by_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<LookupByIdRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("lookup_by_id", %request_id);
    async move {
        let request = body(payload)?;
        let api_key = resolve_api_key(&headers, &state.config)?;
        let nip = require_nip(request.id.as_deref().unwrap_or_default())?;
        tracing::debug!("Lookup by NIP {} with key {}", nip, mask_key(&api_key));

        let service = GusService::new(&state.config, api_key);
        let data = service.search_by_nip(&nip).await?;
        Ok(Json(SearchResponse { data }))
    }
    .instrument(span)
    .await
}

/// POST /lookup/full-report
///
/// Full report for a REGON. Registry-side errors are returned as
/// `kind: "error"` with status 200; everything else maps through [`AppError`].
pub async fn full_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<FullReportRequest>, JsonRejection>,
) -> Result<Json<FullReportResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("full_report", %request_id);
    async move {
        let request = body(payload)?;
        let api_key = resolve_api_key(&headers, &state.config)?;
        let number = RegistryNumber::parse(request.registry_number.as_deref().unwrap_or_default())?;
        tracing::debug!(
            "Full report for REGON {} (requested {:?}) with key {}",
            number.as_str(),
            request.report_name,
            mask_key(&api_key)
        );

        let service = GusService::new(&state.config, api_key);
        let report = service
            .full_report(&number, request.report_name.as_deref())
            .await?;
        Ok(Json(FullReportResponse::from(report)))
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_key_wins_and_is_truncated() {
        let mut headers = HeaderMap::new();
        let long = "k".repeat(150);
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(&long).unwrap());
        let config = Config {
            gus_api_key: Some("server-key".into()),
            ..Config::default()
        };
        assert_eq!(resolve_api_key(&headers, &config).unwrap().len(), 100);
    }

    #[test]
    fn falls_back_to_server_key_then_fails() {
        let headers = HeaderMap::new();
        let config = Config {
            gus_api_key: Some("server-key".into()),
            ..Config::default()
        };
        assert_eq!(resolve_api_key(&headers, &config).unwrap(), "server-key");
        assert!(matches!(
            resolve_api_key(&headers, &Config::default()),
            Err(AppError::Validation(_))
        ));
    }
}
