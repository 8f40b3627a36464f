use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::errors::AppError;

// ============ Registry Records ============

/// One registry record: field name as returned by BIR → value (`None` for empty elements).
pub type Record = BTreeMap<String, Option<String>>;

/// Returns the first non-empty value among `keys`.
pub fn first_field<'a>(record: &'a Record, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| record.get(*k).and_then(|v| v.as_deref()))
        .find(|v| !v.is_empty())
}

/// Basic entity data returned by the search-by-NIP operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    /// REGON (9 or 14 digits).
    pub regon: Option<String>,
    /// Tax ID.
    pub nip: Option<String>,
    /// Registered name.
    pub nazwa: Option<String>,
    /// Voivodeship.
    pub wojewodztwo: Option<String>,
    /// County.
    pub powiat: Option<String>,
    /// Municipality.
    pub gmina: Option<String>,
    /// Town.
    pub miejscowosc: Option<String>,
    /// Postal code.
    pub kod_pocztowy: Option<String>,
    /// Street.
    pub ulica: Option<String>,
    /// Building number.
    pub nr_nieruchomosci: Option<String>,
    /// Apartment / office number.
    pub nr_lokalu: Option<String>,
    /// Entity type discriminator (`P`, `F`, `LP`, `LF`).
    pub typ: Option<String>,
    /// Registry silo id.
    pub silos_id: Option<String>,
    /// Post office town.
    pub miejscowosc_poczty: Option<String>,
    /// KRS number, when the search result carries one.
    pub krs: Option<String>,
}

impl SearchRecord {
    /// Maps a raw `dane` record from `DaneSzukajPodmioty` onto the basic fields.
    pub fn from_record(record: &Record) -> Self {
        let get = |key: &str| record.get(key).cloned().flatten();
        Self {
            regon: get("Regon"),
            nip: get("Nip"),
            nazwa: get("Nazwa"),
            wojewodztwo: get("Wojewodztwo"),
            powiat: get("Powiat"),
            gmina: get("Gmina"),
            miejscowosc: get("Miejscowosc"),
            kod_pocztowy: get("KodPocztowy"),
            ulica: get("Ulica"),
            nr_nieruchomosci: get("NrNieruchomosci"),
            nr_lokalu: get("NrLokalu"),
            typ: get("Typ"),
            silos_id: get("SilosID"),
            miejscowosc_poczty: get("MiejscowoscPoczty"),
            krs: get("Krs"),
        }
    }
}

/// Which list-shaped report a `ReportResult::List` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListKind {
    /// PKD classification codes.
    Pkd,
    /// Civil partnership partners.
    Partners,
    /// Local units.
    LocalUnits,
    /// Activity reports with more than one entry.
    Activities,
}

impl ListKind {
    /// JSON keys used for the list and its count in API responses.
    pub fn wire_keys(self) -> (&'static str, &'static str) {
        match self {
            ListKind::Pkd => ("pkdList", "pkdCount"),
            ListKind::Partners => ("wspolnicy", "wspolnicyCount"),
            ListKind::LocalUnits => ("jednostkiLokalne", "jednostkiCount"),
            ListKind::Activities => ("dzialalnosc", "dzialalnoscCount"),
        }
    }

    fn from_wire(data: &Map<String, Value>) -> Option<(Self, &Vec<Value>)> {
        [
            ListKind::Pkd,
            ListKind::Partners,
            ListKind::LocalUnits,
            ListKind::Activities,
        ]
        .into_iter()
        .find_map(|kind| {
            data.get(kind.wire_keys().0)
                .and_then(Value::as_array)
                .map(|items| (kind, items))
        })
    }
}

/// Registry-issued error carried inside a well-formed report response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryErrorRecord {
    /// `ErrorCode`.
    pub code: String,
    /// `ErrorMessagePl`.
    pub message_pl: Option<String>,
    /// `ErrorMessageEn`.
    pub message_en: Option<String>,
    /// `Typ_podmiotu` echoed by the registry, when present.
    pub entity_type: Option<String>,
    /// `Raport` echoed by the registry, when present.
    pub report: Option<String>,
    /// All fields verbatim.
    pub fields: Record,
}

impl RegistryErrorRecord {
    /// Builds the error view when `record` carries a non-empty `ErrorCode`.
    pub fn from_record(record: &Record) -> Option<Self> {
        let code = first_field(record, &["ErrorCode"])?.to_string();
        let get = |key: &str| first_field(record, &[key]).map(str::to_string);
        Some(Self {
            code,
            message_pl: get("ErrorMessagePl"),
            message_en: get("ErrorMessageEn"),
            entity_type: get("Typ_podmiotu"),
            report: get("Raport"),
            fields: record.clone(),
        })
    }

    /// Polish message, then English, then a generic text.
    pub fn message(&self) -> String {
        self.message_pl
            .clone()
            .or_else(|| self.message_en.clone())
            .unwrap_or_else(|| "Błąd GUS".to_string())
    }
}

/// Normalized full-report result: decided once, at the normalizer boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportResult {
    /// Single-entity flat record.
    Scalar(Record),
    /// List-of-records report.
    List {
        /// Which list report produced the items.
        kind: ListKind,
        /// Records in registry order.
        items: Vec<Record>,
    },
    /// Registry domain error.
    Error(RegistryErrorRecord),
}

impl ReportResult {
    /// Wire discriminator: `scalar`, `list` or `error`.
    pub fn kind(&self) -> &'static str {
        match self {
            ReportResult::Scalar(_) => "scalar",
            ReportResult::List { .. } => "list",
            ReportResult::Error(_) => "error",
        }
    }

    /// Field count for scalars, item count for lists.
    pub fn fields_count(&self) -> usize {
        match self {
            ReportResult::Scalar(record) => record.len(),
            ReportResult::List { items, .. } => items.len(),
            ReportResult::Error(err) => err.fields.len(),
        }
    }

    /// JSON `data` payload for the full-report endpoint.
    pub fn to_data(&self) -> Value {
        match self {
            ReportResult::Scalar(record) => json!(record),
            ReportResult::List { kind, items } => {
                let (list_key, count_key) = kind.wire_keys();
                json!({ list_key: items, count_key: items.len() })
            }
            ReportResult::Error(err) => json!(err.fields),
        }
    }

    /// Rebuilds a result from the endpoint's `kind` and `data` fields.
    pub fn from_wire(kind: &str, data: &Value) -> Result<Self, AppError> {
        let object = data.as_object().ok_or_else(|| AppError::Protocol {
            message: "Report data is not an object".to_string(),
            debug: None,
        })?;
        match kind {
            "scalar" => Ok(ReportResult::Scalar(record_from_object(object))),
            "error" => {
                let record = record_from_object(object);
                RegistryErrorRecord::from_record(&record)
                    .map(ReportResult::Error)
                    .ok_or_else(|| AppError::Protocol {
                        message: "Error report without ErrorCode".to_string(),
                        debug: None,
                    })
            }
            "list" => {
                let (kind, items) =
                    ListKind::from_wire(object).ok_or_else(|| AppError::Protocol {
                        message: "List report without a known list key".to_string(),
                        debug: None,
                    })?;
                let items = items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(record_from_object)
                    .collect();
                Ok(ReportResult::List { kind, items })
            }
            other => Err(AppError::Protocol {
                message: format!("Unknown report kind '{}'", other),
                debug: None,
            }),
        }
    }

    /// Unwraps a scalar record; registry errors become `AppError::Registry`.
    pub fn into_scalar(self) -> Result<Record, AppError> {
        match self {
            ReportResult::Scalar(record) => Ok(record),
            ReportResult::List { mut items, kind } => {
                if items.is_empty() {
                    Err(AppError::Protocol {
                        message: format!("Empty {:?} list where a record was expected", kind),
                        debug: None,
                    })
                } else {
                    Ok(items.swap_remove(0))
                }
            }
            ReportResult::Error(err) => Err(AppError::Registry {
                code: err.code.clone(),
                message: err.message(),
            }),
        }
    }
}

fn record_from_object(object: &Map<String, Value>) -> Record {
    object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Best-effort registry diagnostics (`KomunikatKod` / `KomunikatTresc`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Last message code of the session.
    pub komunikat_kod: Option<String>,
    /// Last message text of the session.
    pub komunikat_tresc: Option<String>,
}

// ============ API Models ============

/// Body of `POST /lookup/by-id`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupByIdRequest {
    /// Tax ID; separators are tolerated and stripped.
    #[serde(alias = "nip")]
    pub id: Option<String>,
}

/// Body of `POST /lookup/full-report`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullReportRequest {
    /// REGON (9 or 14 digits).
    #[serde(alias = "regon")]
    pub registry_number: Option<String>,
    /// Optional report name; ignored unless on the allow-list.
    pub report_name: Option<String>,
}

/// Success body of the search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Basic records, in registry order.
    pub data: Vec<SearchRecord>,
}

/// Success body of the full-report endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullReportResponse {
    /// Report payload (shape depends on `kind`).
    pub data: Value,
    /// `scalar`, `list` or `error`.
    pub kind: String,
    /// Report that was actually requested.
    pub report_name: String,
    /// Number of fields or list items.
    pub fields_count: usize,
}

/// A selected report together with its normalized result.
#[derive(Debug, Clone, PartialEq)]
pub struct FullReport {
    /// Report that was sent to the registry.
    pub report_name: &'static str,
    /// Normalized result.
    pub result: ReportResult,
}

impl From<FullReport> for FullReportResponse {
    fn from(report: FullReport) -> Self {
        Self {
            data: report.result.to_data(),
            kind: report.result.kind().to_string(),
            report_name: report.report_name.to_string(),
            fields_count: report.result.fields_count(),
        }
    }
}
