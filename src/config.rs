use serde::Deserialize;

use crate::validators::mask_key;

pub const TEST_API_KEY: &str = "abcde12345abcde12345";
pub const PROD_HOST: &str = "wyszukiwarkaregon.stat.gov.pl";
pub const TEST_HOST: &str = "wyszukiwarkaregontest.stat.gov.pl";
pub const BIR_PATH: &str = "/wsBIR/UslugaBIRzewnPubl.svc";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub gus_api_key: Option<String>,
    pub use_test: bool,
    pub bir_url: Option<String>,
    pub app_env: String,
    pub force_https: bool,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            gus_api_key: None,
            use_test: false,
            bir_url: None,
            app_env: "development".to_string(),
            force_https: false,
            rate_limit_max: 100,
            rate_limit_window_secs: 900,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => anyhow::bail!("{} must be true or false", name),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source (the process environment in production).
    pub fn from_source(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let app_env = var("APP_ENV")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "production".to_string());
        let is_production = app_env == "production";

        let config = Self {
            port: var("PORT")
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            gus_api_key: var("GUS_API_KEY").filter(|s| !s.trim().is_empty()),
            use_test: var("GUS_USE_TEST")
                .map(|v| parse_bool("GUS_USE_TEST", &v))
                .transpose()?
                .unwrap_or(false),
            bir_url: var("GUS_BIR_URL")
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("GUS_BIR_URL must start with http:// or https://");
                    }
                    Ok(url)
                })
                .transpose()?,
            force_https: var("FORCE_HTTPS")
                .map(|v| parse_bool("FORCE_HTTPS", &v))
                .transpose()?
                .unwrap_or(is_production),
            rate_limit_max: var("RATE_LIMIT_MAX")
                .unwrap_or_else(|| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_MAX must be a positive number"))
                .and_then(|max: u32| {
                    if max == 0 {
                        anyhow::bail!("RATE_LIMIT_MAX cannot be 0");
                    }
                    Ok(max)
                })?,
            rate_limit_window_secs: var("RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|| "900".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_WINDOW_SECS must be a positive number"))
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("RATE_LIMIT_WINDOW_SECS cannot be 0");
                    }
                    Ok(secs)
                })?,
            app_env,
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Environment: {}", config.app_env);
        match config.gus_api_key {
            Some(ref key) => tracing::info!("Server-side GUS API key: {}", mask_key(key)),
            None => tracing::warn!("GUS_API_KEY not set, callers must send x-gus-api-key"),
        }
        if let Some(ref url) = config.bir_url {
            tracing::info!("BIR endpoint override: {}", url);
        }
        tracing::debug!(
            "Rate limit: {} requests / {}s, force HTTPS: {}",
            config.rate_limit_max,
            config.rate_limit_window_secs,
            config.force_https
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// BIR endpoint for a request made with `api_key`.
    ///
    /// The test registry is used for the public test key or when `GUS_USE_TEST` is set.
    pub fn bir_endpoint(&self, api_key: &str) -> String {
        if let Some(ref url) = self.bir_url {
            return url.clone();
        }
        let host = if self.use_test || api_key == TEST_API_KEY {
            TEST_HOST
        } else {
            PROD_HOST
        };
        format!("https://{}{}", host, BIR_PATH)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}
