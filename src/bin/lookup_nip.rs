//! Looks one NIP up against the configured registry and prints the result as JSON.
//!
//! Usage: `lookup-nip <NIP> [REPORT_NAME]`

use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_gus_api::config::Config;
use rust_gus_api::models::FullReportResponse;
use rust_gus_api::reports::RegistryNumber;
use rust_gus_api::services::GusService;
use rust_gus_api::validators::require_nip;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_gus_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let raw_nip = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: lookup-nip <NIP> [REPORT_NAME]"))?;
    let report_name = args.next();

    let config = Config::from_env()?;
    let api_key = config
        .gus_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("GUS_API_KEY must be set"))?;
    let nip = require_nip(&raw_nip)?;

    let service = GusService::new(&config, api_key);
    tracing::info!("Using BIR endpoint {}", service.endpoint());

    let found = service.search_by_nip(&nip).await?;
    let report = match found.first().and_then(|r| r.regon.as_deref()) {
        Some(regon) => {
            let number = RegistryNumber::parse(regon)?;
            let report = service
                .full_report(&number, report_name.as_deref())
                .await?;
            Some(FullReportResponse::from(report))
        }
        None => None,
    };

    let output = json!({ "search": found, "fullReport": report });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
