use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::envelopes;
use crate::models::Diagnostics;
use crate::session::RegistrySession;

pub const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(5);

fn value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<GetValueResult[^>]*>([\s\S]*?)</GetValueResult>")
            .expect("static GetValue pattern")
    })
}

/// Reads one session parameter. Every failure degrades to `None`.
async fn get_value(session: &RegistrySession, parameter: &str) -> Option<String> {
    let envelope = envelopes::get_value(session.endpoint(), parameter);
    match session
        .transport()
        .send(envelope, Some(session.sid()), DIAGNOSTIC_TIMEOUT)
        .await
    {
        Ok(response) => value_pattern()
            .captures(&response.body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty()),
        Err(e) => {
            tracing::debug!("GetValue {} failed: {}", parameter, e);
            None
        }
    }
}

/// Fetches `KomunikatKod` and `KomunikatTresc` concurrently.
pub async fn diagnose(session: &RegistrySession) -> Diagnostics {
    let (komunikat_kod, komunikat_tresc) = tokio::join!(
        get_value(session, "KomunikatKod"),
        get_value(session, "KomunikatTresc"),
    );
    tracing::info!(
        "Registry diagnostics: kod={:?} tresc={:?}",
        komunikat_kod,
        komunikat_tresc
    );
    Diagnostics {
        komunikat_kod,
        komunikat_tresc,
    }
}
