//! Widget-side context: which CRM record the widget was opened on, and the
//! organization variables that configure it.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::errors::AppError;
use crate::validators::mask_key;

pub const DEFAULT_ENTITY: &str = "Accounts";
pub const DEFAULT_BRAND_LOGO: &str = "MD_favicon.png";

const ID_PARAMS: [&str; 5] = ["recId", "recordId", "id", "rid", "record_id"];
const ENTITY_PARAMS: [&str; 4] = ["entity", "module", "m", "mod"];
const CRM_HOSTS: [&str; 3] = ["crm.zoho.eu", "crm.zoho.com", "crm.zoho.in"];

/// The record the widget operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    pub id: String,
    pub entity: String,
}

impl RecordContext {
    fn new(id: String, entity: Option<String>) -> Self {
        Self {
            id,
            entity: entity
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_ENTITY.to_string()),
        }
    }
}

/// Result of one discovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found(RecordContext),
    Next,
}

/// One way of discovering the current record.
#[async_trait]
pub trait ContextStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn discover(&self) -> Result<Discovery, AppError>;
}

/// SDK calls used by the context strategies.
#[async_trait]
pub trait WidgetHost: Send + Sync {
    /// `UTIL.getQueryParams`.
    async fn query_params(&self) -> Result<Value, AppError>;
    /// `UI.getPageInfo`.
    async fn page_info(&self) -> Result<Value, AppError>;
}

/// First element of an array, or the value itself, as a string.
fn pick_first(value: Option<&Value>) -> Option<String> {
    let value = match value? {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn entity_of(object: &Value) -> Option<String> {
    ["Entity", "Module", "module"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

fn first_param(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| pick_first(object.get(*key)))
}

/// Payload of the PageLoad event.
pub struct PageLoadStrategy {
    pub payload: Value,
}

#[async_trait]
impl ContextStrategy for PageLoadStrategy {
    fn name(&self) -> &'static str {
        "PageLoad"
    }

    async fn discover(&self) -> Result<Discovery, AppError> {
        if self.payload.get("EntityId").is_none() && self.payload.get("Entity").is_none() {
            return Ok(Discovery::Next);
        }
        let id = pick_first(self.payload.get("EntityId")).unwrap_or_default();
        Ok(Discovery::Found(RecordContext::new(
            id,
            entity_of(&self.payload),
        )))
    }
}

/// Query parameters reported by the SDK.
pub struct QueryParamsStrategy<'a> {
    pub host: &'a dyn WidgetHost,
}

#[async_trait]
impl ContextStrategy for QueryParamsStrategy<'_> {
    fn name(&self) -> &'static str {
        "UTIL.getQueryParams"
    }

    async fn discover(&self) -> Result<Discovery, AppError> {
        let params = self.host.query_params().await?;
        Ok(match first_param(&params, &ID_PARAMS) {
            Some(id) => Discovery::Found(RecordContext::new(
                id,
                first_param(&params, &ENTITY_PARAMS),
            )),
            None => Discovery::Next,
        })
    }
}

/// Page info reported by the SDK.
pub struct PageInfoStrategy<'a> {
    pub host: &'a dyn WidgetHost,
}

#[async_trait]
impl ContextStrategy for PageInfoStrategy<'_> {
    fn name(&self) -> &'static str {
        "UI.getPageInfo"
    }

    async fn discover(&self) -> Result<Discovery, AppError> {
        let info = self.host.page_info().await?;
        Ok(match pick_first(info.get("EntityId")) {
            Some(id) => Discovery::Found(RecordContext::new(id, entity_of(&info))),
            None => Discovery::Next,
        })
    }
}

/// The widget's own URL query string.
pub struct UrlQueryStrategy {
    pub url: Url,
}

#[async_trait]
impl ContextStrategy for UrlQueryStrategy {
    fn name(&self) -> &'static str {
        "URL"
    }

    async fn discover(&self) -> Result<Discovery, AppError> {
        let param = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                self.url
                    .query_pairs()
                    .find(|(k, v)| k == *key && !v.is_empty())
                    .map(|(_, v)| v.into_owned())
            })
        };
        Ok(match param(&ID_PARAMS) {
            Some(id) => Discovery::Found(RecordContext::new(id, param(&ENTITY_PARAMS))),
            None => Discovery::Next,
        })
    }
}

/// Tries each strategy in order; a failing strategy is logged and skipped.
pub async fn resolve_record_context(
    strategies: &[&dyn ContextStrategy],
) -> Option<RecordContext> {
    for strategy in strategies {
        match strategy.discover().await {
            Ok(Discovery::Found(context)) => {
                tracing::info!(
                    "Record context from {}: {} ID={}",
                    strategy.name(),
                    context.entity,
                    context.id
                );
                return Some(context);
            }
            Ok(Discovery::Next) => {}
            Err(e) => tracing::warn!("{} failed: {}", strategy.name(), e),
        }
    }
    tracing::warn!("No record context found");
    None
}

/// One organization variable backend (`API.getOrgVariable`, `CONFIG.getOrgVariable`).
#[async_trait]
pub trait OrgVariableSource: Send + Sync {
    fn name(&self) -> &'static str;
    /// Raw SDK response for `name`.
    async fn get(&self, name: &str) -> Result<Value, AppError>;
}

/// String value out of the response shapes the SDK is known to return.
pub fn extract_org_var_value(response: &Value) -> Option<String> {
    [
        response.get("value"),
        response.get("data").and_then(|d| d.get("value")),
        response.get("Success").and_then(|s| s.get("Content")),
        response.get("Success").and_then(|s| s.get("content")),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(str::to_string)
}

/// First non-empty value for `name` across `sources`.
pub async fn load_org_variable(sources: &[&dyn OrgVariableSource], name: &str) -> Option<String> {
    for source in sources {
        match source.get(name).await {
            Ok(response) => {
                if let Some(value) = extract_org_var_value(&response).filter(|v| !v.is_empty()) {
                    return Some(value);
                }
            }
            Err(e) => tracing::warn!("{} failed for {}: {}", source.name(), name, e),
        }
    }
    None
}

/// Query or fragment parameter of the widget URL.
fn url_param(url: &Url, name: &str) -> Option<String> {
    let from_query = url
        .query_pairs()
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned());
    from_query.or_else(|| {
        let fragment = url.fragment()?;
        url::form_urlencoded::parse(fragment.as_bytes())
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    })
}

/// CRM base URL recognised anywhere in the widget URL.
fn detect_crm_base(url: &Url) -> Option<String> {
    let href = url.as_str();
    CRM_HOSTS
        .iter()
        .find(|host| href.contains(*host))
        .map(|host| format!("https://{}", host))
}

/// Widget configuration from organization variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetConfig {
    pub gus_api_key: Option<String>,
    pub gus_backend_url: Option<String>,
    pub crm_base_url: Option<String>,
    pub org_id: Option<String>,
    pub brand_logo_url: String,
}

impl WidgetConfig {
    pub async fn load(sources: &[&dyn OrgVariableSource], widget_url: &Url) -> Self {
        let gus_api_key = load_org_variable(sources, "GUS_API_KEY").await;
        let gus_backend_url = match load_org_variable(sources, "GUS_BACKEND_URL").await {
            Some(url) => Some(url),
            None => url_param(widget_url, "backend"),
        };
        let crm_base_url = match load_org_variable(sources, "ZOHO_CRM_BASE_URL").await {
            Some(url) => Some(url),
            None => detect_crm_base(widget_url),
        };
        let org_id = load_org_variable(sources, "ZOHO_ORG_ID").await;
        let brand_logo_url = load_org_variable(sources, "BRAND_LOGO_URL")
            .await
            .unwrap_or_else(|| DEFAULT_BRAND_LOGO.to_string());

        let config = Self {
            gus_api_key,
            gus_backend_url,
            crm_base_url,
            org_id,
            brand_logo_url,
        };
        tracing::info!(
            "Widget config: key {}, backend {}, CRM {}, org {}",
            config.gus_api_key.as_deref().map(mask_key).unwrap_or_else(|| "(none)".into()),
            config.gus_backend_url.as_deref().unwrap_or("(none)"),
            config.crm_base_url.as_deref().unwrap_or("(auto-detect)"),
            config.org_id.as_deref().unwrap_or("(none)")
        );
        config
    }

    /// `{base}/crm/{org}/tab/{module}/{id}`, when base URL and org id are known.
    pub fn build_record_url(&self, record_id: &str, module: Option<&str>) -> Option<String> {
        let (Some(base), Some(org)) = (self.crm_base_url.as_deref(), self.org_id.as_deref()) else {
            tracing::warn!("Record URL unavailable: set ZOHO_CRM_BASE_URL and ZOHO_ORG_ID");
            return None;
        };
        Some(format!(
            "{}/crm/{}/tab/{}/{}",
            base.trim_end_matches('/'),
            org,
            module.unwrap_or(DEFAULT_ENTITY),
            record_id
        ))
    }
}
