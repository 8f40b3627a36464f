use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{json, Value};

use crate::errors::{AppError, ResultExt};
use crate::lookup::AggregateSubject;
use crate::mapper::{
    build_history_entry, build_registry_module_data, changed_fields, prepend_history,
    strip_system_fields, CrmRecord, ADDRESS_TYPE_FIELD, HISTORY_FIELD,
};
use crate::validators::{clean_nip, sanitize_for_criteria};

pub const ACCOUNTS_MODULE: &str = "Accounts";
pub const REGISTRY_MODULE: &str = "GUS";

/// CRM record operations the widget depends on.
#[async_trait]
pub trait CrmRecordStore: Send + Sync {
    async fn get_record(&self, entity: &str, id: &str) -> Result<Option<CrmRecord>, AppError>;
    async fn update_record(&self, entity: &str, id: &str, data: CrmRecord) -> Result<(), AppError>;
    /// Returns the id of the new record.
    async fn insert_record(&self, entity: &str, data: CrmRecord) -> Result<String, AppError>;
    /// Criteria in the CRM's `(Field:equals:value)` form.
    async fn search_records(&self, entity: &str, criteria: &str) -> Result<Vec<CrmRecord>, AppError>;
    /// Closes the widget popup, handing `data` to the hosting form.
    async fn close_popup_with_data(&self, data: CrmRecord) -> Result<(), AppError>;
}

fn record_id(record: &CrmRecord) -> Option<String> {
    match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

fn equals_criteria(field: &str, value: &str) -> String {
    format!("({}:equals:{})", field, sanitize_for_criteria(value))
}

/// Another Accounts record holding `nip` as its seat address.
///
/// Search failures are logged and treated as "no duplicate".
pub async fn check_for_duplicate_nip(
    store: &dyn CrmRecordStore,
    nip: &str,
    current_record_id: Option<&str>,
) -> Option<CrmRecord> {
    let criteria = equals_criteria("Firma_NIP", &clean_nip(nip));
    let records = match store.search_records(ACCOUNTS_MODULE, &criteria).await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Duplicate check failed, continuing: {}", e);
            return None;
        }
    };
    records.into_iter().find(|record| {
        let is_current = match (record_id(record).as_deref(), current_record_id) {
            (Some(id), Some(current)) => id == current,
            _ => false,
        };
        let is_seat = record
            .get(ADDRESS_TYPE_FIELD)
            .and_then(Value::as_str)
            .map(|t| t.to_lowercase().contains("siedziba"))
            .unwrap_or(false);
        !is_current && is_seat
    })
}

/// Registry module record keyed by NIP (`Name`), if any.
pub async fn find_registry_record(
    store: &dyn CrmRecordStore,
    nip: &str,
) -> Result<Option<CrmRecord>, AppError> {
    let criteria = equals_criteria("Name", &clean_nip(nip));
    let records = store
        .search_records(REGISTRY_MODULE, &criteria)
        .await
        .context("Searching registry module by NIP")?;
    Ok(records.into_iter().find(|r| record_id(r).is_some()))
}

/// Outcome of a registry module write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryWrite {
    pub record_id: String,
    pub created: bool,
}

/// Creates or updates the registry module record for `subject`, prepending a history entry.
pub async fn create_or_update_registry_record(
    store: &dyn CrmRecordStore,
    account_id: &str,
    subject: &AggregateSubject,
    now: NaiveDateTime,
) -> Result<RegistryWrite, AppError> {
    let nip = subject
        .base
        .nip
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Validation("Brak danych GUS".to_string()))?;

    let existing = find_registry_record(store, nip).await?;
    let mut data = build_registry_module_data(subject, Some(account_id));
    strip_system_fields(&mut data);
    tracing::debug!("Prepared {} registry module field(s)", data.len());

    match existing.and_then(|record| record_id(&record).map(|id| (id, record))) {
        Some((id, record)) => {
            let changed = changed_fields(&record, &data);
            tracing::info!("Updating registry record {} ({} changed field(s))", id, changed.len());
            let old_history = record
                .get(HISTORY_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let entry = build_history_entry(now, false, &changed);
            data.insert(HISTORY_FIELD.into(), json!(prepend_history(old_history, &entry)));
            data.insert("id".into(), json!(id));

            store
                .update_record(REGISTRY_MODULE, &id, data)
                .await
                .context("Updating registry module record")?;
            Ok(RegistryWrite {
                record_id: id,
                created: false,
            })
        }
        None => {
            data.insert(HISTORY_FIELD.into(), json!(build_history_entry(now, true, &[])));
            let id = store
                .insert_record(REGISTRY_MODULE, data)
                .await
                .context("Inserting registry module record")?;
            tracing::info!("Created registry record {}", id);
            Ok(RegistryWrite {
                record_id: id,
                created: true,
            })
        }
    }
}
