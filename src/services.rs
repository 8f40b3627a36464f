use std::time::Duration;

use crate::config::Config;
use crate::diagnostics::diagnose;
use crate::envelopes;
use crate::errors::{snippet, AppError, ResultExt};
use crate::models::{FullReport, SearchRecord};
use crate::normalizer::{self, Extracted, REPORT_RESULT_TAG, SEARCH_RESULT_TAG};
use crate::reports::{select_report, RegistryNumber};
use crate::session::RegistrySession;
use crate::transport::{BirTransport, SoapResponse};

pub const SEARCH_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const REPORT_LOGIN_TIMEOUT: Duration = Duration::from_secs(8);
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

const NOT_FOUND_DEBUG_CHARS: usize = 500;

/// Registry operations for one caller key. Each call logs in afresh.
pub struct GusService {
    transport: BirTransport,
    api_key: String,
}

impl GusService {
    pub fn new(config: &Config, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            transport: BirTransport::new(config.bir_endpoint(&api_key)),
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Searches the registry by a validated 10-digit NIP.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<SearchRecord>)` - Basic records, possibly empty, never deduplicated.
    /// * `Err(AppError::NotFound)` - The registry reported no entity; carries diagnostics.
    pub async fn search_by_nip(&self, nip: &str) -> Result<Vec<SearchRecord>, AppError> {
        tracing::info!("Searching BIR by NIP {}", nip);
        let session = RegistrySession::login(&self.transport, &self.api_key, SEARCH_LOGIN_TIMEOUT)
            .await
            .context("BIR login before search")?;

        let envelope = envelopes::search_by_nip(session.endpoint(), nip);
        let response = self
            .transport
            .send(envelope, Some(session.sid()), SEARCH_TIMEOUT)
            .await?;

        match normalizer::extract_records(&response.body, SEARCH_RESULT_TAG)? {
            Extracted::Records(records) => {
                let found: Vec<SearchRecord> =
                    records.iter().map(SearchRecord::from_record).collect();
                tracing::info!("BIR search returned {} record(s)", found.len());
                Ok(found)
            }
            Extracted::Empty => Err(AppError::NotFound {
                message: "GUS nie znalazł podmiotu dla podanego NIP".to_string(),
                diag: Some(diagnose(&session).await),
                debug: None,
            }),
            Extracted::Missing => {
                missing_result(&session, &response, "Brak danych dla podanego NIP", false).await
            }
        }
    }

    /// Fetches and normalizes a full report.
    ///
    /// The report name is chosen by [`select_report`], so names outside the
    /// allow-list never reach the registry.
    pub async fn full_report(
        &self,
        number: &RegistryNumber,
        requested: Option<&str>,
    ) -> Result<FullReport, AppError> {
        let report_name = select_report(number, requested);
        tracing::info!(
            "Fetching BIR report {} for REGON {}",
            report_name,
            number.as_str()
        );
        let session = RegistrySession::login(&self.transport, &self.api_key, REPORT_LOGIN_TIMEOUT)
            .await
            .context("BIR login before full report")?;

        let envelope = envelopes::full_report(session.endpoint(), number.as_str(), report_name);
        let response = self
            .transport
            .send(envelope, Some(session.sid()), REPORT_TIMEOUT)
            .await?;

        let records = match normalizer::extract_records(&response.body, REPORT_RESULT_TAG)? {
            Extracted::Records(records) => records,
            Extracted::Empty => {
                return Err(AppError::NotFound {
                    message: "Brak danych w pełnym raporcie GUS".to_string(),
                    diag: Some(diagnose(&session).await),
                    debug: Some(snippet(&normalizer::strip_mtom(&response.body), NOT_FOUND_DEBUG_CHARS)),
                })
            }
            Extracted::Missing => {
                return missing_result(&session, &response, "Brak danych w pełnym raporcie GUS", true)
                    .await
            }
        };

        let result = match normalizer::normalize(report_name, records) {
            Err(AppError::NotFound { message, diag: None, .. }) => {
                tracing::warn!("{}", message);
                return Err(AppError::NotFound {
                    message,
                    diag: Some(diagnose(&session).await),
                    debug: Some(snippet(&normalizer::strip_mtom(&response.body), NOT_FOUND_DEBUG_CHARS)),
                });
            }
            other => other?,
        };
        tracing::info!(
            "Report {} normalized as {} ({} entries)",
            report_name,
            result.kind(),
            result.fields_count()
        );
        Ok(FullReport {
            report_name,
            result,
        })
    }
}

/// No result element: a protocol error on a non-2xx status, otherwise "no data" with diagnostics.
async fn missing_result<T>(
    session: &RegistrySession,
    response: &SoapResponse,
    message: &str,
    with_debug: bool,
) -> Result<T, AppError> {
    let body = normalizer::strip_mtom(&response.body);
    if !response.is_success() {
        tracing::error!("BIR returned HTTP {} without a result element", response.status);
        return Err(AppError::Protocol {
            message: format!("GUS zwrócił status {}", response.status),
            debug: Some(snippet(&body, NOT_FOUND_DEBUG_CHARS)),
        });
    }
    tracing::warn!("{}", message);
    Err(AppError::NotFound {
        message: message.to_string(),
        diag: Some(diagnose(session).await),
        debug: with_debug.then(|| snippet(&body, NOT_FOUND_DEBUG_CHARS)),
    })
}
