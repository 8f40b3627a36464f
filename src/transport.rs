use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

use crate::errors::AppError;

pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";
pub const CLIENT_USER_AGENT: &str = "rust-gus-api/0.1";

/// Buffered SOAP response. Non-2xx statuses are not errors at this level.
#[derive(Debug, Clone)]
pub struct SoapResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl SoapResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One-shot SOAP transport to the BIR endpoint.
#[derive(Debug, Clone)]
pub struct BirTransport {
    endpoint: String,
}

impl BirTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts one envelope on a fresh connection and buffers the reply.
    ///
    /// # Arguments
    ///
    /// * `envelope` - Complete SOAP envelope.
    /// * `sid` - Session id, sent as the `sid` header when present.
    /// * `timeout` - Hard deadline for the whole exchange.
    ///
    /// # Returns
    ///
    /// * `Ok(SoapResponse)` - Any HTTP status with its body.
    /// * `Err(AppError::TransportTimeout)` - The deadline expired; the request is dropped.
    /// * `Err(AppError::Transport)` - Connection failure.
    /// * `Err(AppError::Protocol)` - The body could not be read as text.
    pub async fn send(
        &self,
        envelope: String,
        sid: Option<&str>,
        timeout: Duration,
    ) -> Result<SoapResponse, AppError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let mut request = client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header(ACCEPT, "application/soap+xml")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .body(envelope);
        if let Some(sid) = sid {
            request = request.header("sid", sid);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    AppError::TransportTimeout(e.to_string())
                } else {
                    AppError::Protocol {
                        message: format!("Unreadable SOAP response body: {}", e),
                        debug: None,
                    }
                }
            })?;
            Ok::<_, AppError>(SoapResponse {
                status,
                headers,
                body,
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if let Ok(response) = &result {
                    tracing::debug!(
                        "BIR responded {} ({} bytes)",
                        response.status,
                        response.body.len()
                    );
                }
                result
            }
            Err(_) => Err(AppError::TransportTimeout(format!(
                "No response from {} within {:?}",
                self.endpoint, timeout
            ))),
        }
    }
}
