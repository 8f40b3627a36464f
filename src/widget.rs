use chrono::Local;
use serde_json::{json, Value};

use crate::context::{resolve_record_context, ContextStrategy, RecordContext, WidgetConfig, DEFAULT_ENTITY};
use crate::crm::{
    check_for_duplicate_nip, create_or_update_registry_record, CrmRecordStore, RegistryWrite,
};
use crate::errors::AppError;
use crate::lookup::{fetch_aggregate, AggregateSubject, RegistryLookup};
use crate::mapper::{prepare_data_for_save, CrmRecord, ADDRESS_TYPE_FIELD};
use crate::validators::require_nip;

pub const COMMON_NAME_FIELD: &str = "Nazwa_zwyczajowa";

/// What a fetch ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Another seat record already holds this NIP; nothing was fetched.
    Duplicate {
        record: CrmRecord,
        record_url: Option<String>,
    },
    Fetched {
        registry_record: Option<RegistryWrite>,
    },
}

/// What a save ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New record: the popup was closed with the selected fields.
    PopupClosed { selected_count: usize },
    Updated { selected_count: usize },
}

/// One widget instance: the record it was opened on and the last lookup.
pub struct WidgetSession<'a> {
    config: WidgetConfig,
    context: Option<RecordContext>,
    current_record: CrmRecord,
    address_type: String,
    original_common_name: String,
    fetched: Option<AggregateSubject>,
    lookup: &'a dyn RegistryLookup,
    store: &'a dyn CrmRecordStore,
}

impl<'a> WidgetSession<'a> {
    /// Resolves the record context and loads the current Accounts record, if any.
    ///
    /// The address type comes from the record, else from the page-load payload's `Data`.
    pub async fn activate(
        config: WidgetConfig,
        page_load: &Value,
        strategies: &[&dyn ContextStrategy],
        lookup: &'a dyn RegistryLookup,
        store: &'a dyn CrmRecordStore,
    ) -> Self {
        let context = resolve_record_context(strategies)
            .await
            .filter(|c| !c.id.is_empty());

        let mut current_record = CrmRecord::new();
        if let Some(ref ctx) = context {
            if ctx.entity == DEFAULT_ENTITY {
                match store.get_record(&ctx.entity, &ctx.id).await {
                    Ok(Some(record)) => current_record = record,
                    Ok(None) => tracing::warn!("Record {} not found", ctx.id),
                    Err(e) => tracing::warn!("Loading record {} failed: {}", ctx.id, e),
                }
            }
        }

        let text_of = |value: Option<&Value>| {
            value
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let address_type = text_of(current_record.get(ADDRESS_TYPE_FIELD))
            .or_else(|| text_of(page_load.get("Data").and_then(|d| d.get(ADDRESS_TYPE_FIELD))))
            .unwrap_or_default();
        let original_common_name =
            text_of(current_record.get(COMMON_NAME_FIELD)).unwrap_or_default();
        tracing::info!("Widget active, address type '{}'", address_type);

        Self {
            config,
            context,
            current_record,
            address_type,
            original_common_name,
            fetched: None,
            lookup,
            store,
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn record_id(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.id.as_str())
    }

    pub fn entity(&self) -> &str {
        self.context
            .as_ref()
            .map(|c| c.entity.as_str())
            .unwrap_or(DEFAULT_ENTITY)
    }

    pub fn address_type(&self) -> &str {
        &self.address_type
    }

    pub fn current_record(&self) -> &CrmRecord {
        &self.current_record
    }

    pub fn fetched(&self) -> Option<&AggregateSubject> {
        self.fetched.as_ref()
    }

    /// NIP already stored on the record, to prefill the input.
    pub fn prefill_nip(&self) -> Option<&str> {
        self.current_record
            .get("Firma_NIP")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn is_seat(&self) -> bool {
        self.address_type.contains("Siedziba")
    }

    /// Validates, checks for a duplicate, looks the NIP up and writes the registry module record.
    ///
    /// The registry module write only runs for seat records opened on an existing
    /// account; its failure is logged and does not fail the fetch.
    pub async fn fetch(&mut self, raw_nip: &str) -> Result<FetchOutcome, AppError> {
        self.fetched = None;
        let nip = require_nip(raw_nip)?;

        if let Some(record) = check_for_duplicate_nip(self.store, &nip, self.record_id()).await {
            let record_url = record
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| self.config.build_record_url(id, Some(DEFAULT_ENTITY)));
            tracing::warn!("NIP {} already used by a seat record", nip);
            return Ok(FetchOutcome::Duplicate { record, record_url });
        }

        let subject = fetch_aggregate(self.lookup, &nip).await?;

        let mut registry_record = None;
        match self.record_id().map(str::to_string) {
            Some(account_id) if self.is_seat() => {
                let now = Local::now().naive_local();
                match create_or_update_registry_record(self.store, &account_id, &subject, now).await
                {
                    Ok(write) => registry_record = Some(write),
                    Err(e) => tracing::error!("Registry module write failed: {}", e),
                }
            }
            _ => tracing::info!("Not a seat record, skipping registry module write"),
        }

        self.fetched = Some(subject);
        Ok(FetchOutcome::Fetched { registry_record })
    }

    /// Writes the selected Accounts fields.
    pub async fn save(&self, selected: &[&str]) -> Result<SaveOutcome, AppError> {
        let subject = self
            .fetched
            .as_ref()
            .ok_or_else(|| AppError::Validation("Brak danych do zapisu".to_string()))?;
        let prepared = prepare_data_for_save(subject, &self.address_type, selected);
        if prepared.selected_count == 0 {
            return Err(AppError::Validation(
                "Zaznacz przynajmniej jedno pole do zapisu".to_string(),
            ));
        }
        let selected_count = prepared.selected_count;

        match self.record_id() {
            None => {
                tracing::info!("New record, closing popup with {} field(s)", selected_count);
                self.store.close_popup_with_data(prepared.api_data).await?;
                Ok(SaveOutcome::PopupClosed { selected_count })
            }
            Some(id) => {
                tracing::info!("Updating {} [{}] with {} field(s)", self.entity(), id, selected_count);
                self.store
                    .update_record(self.entity(), id, prepared.api_data)
                    .await?;
                Ok(SaveOutcome::Updated { selected_count })
            }
        }
    }

    /// Saves the common name upper-cased when it changed. Returns whether a write happened.
    pub async fn save_common_name(&mut self, name: &str) -> Result<bool, AppError> {
        let name = name.trim();
        let Some(id) = self.record_id().map(str::to_string) else {
            return Ok(false);
        };
        if name.is_empty() || name == self.original_common_name {
            return Ok(false);
        }

        let upper = name.to_uppercase();
        let mut data = CrmRecord::new();
        data.insert(COMMON_NAME_FIELD.into(), json!(upper));
        self.store.update_record(self.entity(), &id, data).await?;
        tracing::info!("Common name updated");
        self.original_common_name = upper;
        Ok(true)
    }
}
