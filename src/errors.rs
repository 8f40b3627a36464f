use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::Diagnostics;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Malformed tax ID, registry number or request body. Raised before any network call.
    Validation(String),
    /// Login did not yield a session id.
    AuthenticationFailed {
        /// Truncated login response, for support.
        debug: Option<String>,
    },
    /// An outbound call exceeded its deadline.
    TransportTimeout(String),
    /// Connection-level failure talking to an upstream service.
    Transport(String),
    /// The upstream answered with something we cannot interpret.
    Protocol {
        /// What went wrong.
        message: String,
        /// Truncated raw body, for support.
        debug: Option<String>,
    },
    /// The registry returned a domain error code inside a well-formed response.
    Registry {
        /// Registry error code (`ErrorCode`).
        code: String,
        /// Human readable registry message.
        message: String,
    },
    /// The registry explicitly reported no data.
    NotFound {
        /// What was not found.
        message: String,
        /// Best-effort diagnostics fetched from the registry session.
        diag: Option<Diagnostics>,
        /// Truncated raw body, for support.
        debug: Option<String>,
    },
    /// Request body was not declared as JSON.
    UnsupportedMediaType(String),
    /// The lookup backend answered with a non-success status (client side).
    Backend {
        /// HTTP status returned by the backend.
        status: u16,
        /// Error message from the backend's JSON body.
        message: String,
    },
    /// The CRM record store rejected an operation.
    Crm(String),
    /// Internal server error.
    Internal(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Convenience constructor for a not-found error without diagnostics.
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound {
            message: message.into(),
            diag: None,
            debug: None,
        }
    }

    /// Returns the innermost error, skipping context wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status this error maps to at the handler boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::TransportTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Protocol { .. } => StatusCode::BAD_GATEWAY,
            AppError::Registry { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Backend { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Crm(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::AuthenticationFailed { .. } => {
                write!(f, "Registry login failed (no session id)")
            }
            AppError::TransportTimeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Protocol { message, .. } => write!(f, "Protocol error: {}", message),
            AppError::Registry { code, message } => {
                write!(f, "Registry error {}: {}", code, message)
            }
            AppError::NotFound { message, .. } => write!(f, "Not found: {}", message),
            AppError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            AppError::Backend { status, message } => {
                write!(f, "Backend returned {}: {}", status, message)
            }
            AppError::Crm(msg) => write!(f, "CRM error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each variant to a status code and a JSON body. Raw upstream bodies
    /// only ever appear truncated, under `debug`.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Validation(msg) => json!({ "error": msg }),
            AppError::AuthenticationFailed { debug } => {
                tracing::error!("Registry login failed: no SID in response");
                json!({
                    "error": "Logowanie do GUS nie powiodło się (brak SID)",
                    "debug": debug,
                })
            }
            AppError::TransportTimeout(msg) => {
                tracing::error!("Upstream timeout: {}", msg);
                json!({ "error": "Przekroczono czas oczekiwania na odpowiedź GUS" })
            }
            AppError::Transport(msg) => {
                tracing::error!("Transport error: {}", msg);
                json!({ "error": "Błąd komunikacji z GUS", "message": msg })
            }
            AppError::Protocol { message, debug } => {
                tracing::error!("Protocol error: {}", message);
                json!({ "error": message, "debug": debug })
            }
            AppError::Registry { code, message } => {
                tracing::warn!("Registry error {}: {}", code, message);
                json!({ "error": message, "errorCode": code })
            }
            AppError::NotFound {
                message,
                diag,
                debug,
            } => {
                let mut body = json!({ "error": message });
                if let Some(diag) = diag {
                    body["diag"] = json!(diag);
                }
                if let Some(debug) = debug {
                    body["debug"] = json!(debug);
                }
                body
            }
            AppError::UnsupportedMediaType(msg) => json!({ "error": msg }),
            AppError::Backend { message, .. } => json!({ "error": message }),
            AppError::Crm(msg) => {
                tracing::error!("CRM error: {}", msg);
                json!({ "error": "CRM error" })
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                json!({ "error": "Błąd serwera" })
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.as_ref().clone().into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::TransportTimeout(err.to_string())
        } else {
            AppError::Transport(err.to_string())
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Truncates an upstream body for the `debug` field, on a char boundary.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
