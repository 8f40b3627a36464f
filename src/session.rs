use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use crate::envelopes;
use crate::errors::{snippet, AppError};
use crate::transport::BirTransport;
use crate::validators::mask_sid;

const LOGIN_DEBUG_CHARS: usize = 300;

fn sid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<ZalogujResult[^>]*>([\s\S]*?)</ZalogujResult>")
            .expect("static SID pattern")
    })
}

/// An authenticated BIR session, valid for a single proxied operation.
#[derive(Clone)]
pub struct RegistrySession {
    sid: String,
    transport: BirTransport,
}

impl fmt::Debug for RegistrySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySession")
            .field("sid", &mask_sid(&self.sid))
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}

impl RegistrySession {
    /// Logs in with `api_key`. An empty or missing SID is an error and no
    /// further call is made with it.
    pub async fn login(
        transport: &BirTransport,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let envelope = envelopes::login(transport.endpoint(), api_key);
        let response = transport.send(envelope, None, timeout).await?;

        let sid = sid_pattern()
            .captures(&response.body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|sid| !sid.is_empty());

        match sid {
            Some(sid) => {
                tracing::info!("BIR login ok, sid {}", mask_sid(&sid));
                Ok(Self {
                    sid,
                    transport: transport.clone(),
                })
            }
            None => {
                tracing::warn!("BIR login returned no SID (HTTP {})", response.status);
                Err(AppError::AuthenticationFailed {
                    debug: Some(snippet(&response.body, LOGIN_DEBUG_CHARS)),
                })
            }
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn transport(&self) -> &BirTransport {
        &self.transport
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }
}
