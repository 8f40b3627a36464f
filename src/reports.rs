//! Report allow-list and selection.

use crate::errors::AppError;
use crate::models::RegistryErrorRecord;

/// Every report name the registry is ever asked for.
pub const ALLOWED_REPORTS: [&str; 32] = [
    "BIR11OsPrawna",
    "BIR11OsPrawnaPkd",
    "BIR11OsPrawnaListaJednLokalnych",
    "BIR11OsPrawnaSpCywilnaWspolnicy",
    "BIR11JednLokalnaOsPrawnej",
    "BIR11JednLokalnaOsPrawnejPkd",
    "BIR11OsFizycznaDaneOgolne",
    "BIR11OsFizycznaAdresy",
    "BIR11OsFizycznaPkd",
    "BIR11OsFizycznaListaJednLokalnych",
    "BIR11OsFizycznaDzialalnoscCeidg",
    "BIR11OsFizycznaDzialalnoscPozostala",
    "BIR11OsFizycznaDzialalnoscRolnicza",
    "BIR11OsFizycznaDzialalnoscSkreslonaDo20141108",
    "BIR11JednLokalnaOsFizycznej",
    "BIR11JednLokalnaOsFizycznejPkd",
    "BIR12OsPrawna",
    "BIR12OsPrawnaPkd",
    "BIR12OsPrawnaListaJednLokalnych",
    "BIR12OsPrawnaSpCywilnaWspolnicy",
    "BIR12JednLokalnaOsPrawnej",
    "BIR12JednLokalnaOsPrawnejPkd",
    "BIR12OsFizycznaDaneOgolne",
    "BIR12OsFizycznaAdresy",
    "BIR12OsFizycznaPkd",
    "BIR12OsFizycznaListaJednLokalnych",
    "BIR12OsFizycznaDzialalnoscCeidg",
    "BIR12OsFizycznaDzialalnoscPozostala",
    "BIR12OsFizycznaDzialalnoscRolnicza",
    "BIR12OsFizycznaDzialalnoscSkreslonaDo20141108",
    "BIR12JednLokalnaOsFizycznej",
    "BIR12JednLokalnaOsFizycznejPkd",
];

pub const DEFAULT_LEGAL_REPORT: &str = "BIR11OsPrawna";
pub const DEFAULT_LOCAL_UNIT_REPORT: &str = "BIR11JednLokalnaOsPrawnej";
pub const NATURAL_GENERAL_REPORT: &str = "BIR11OsFizycznaDaneOgolne";
pub const NATURAL_GENERAL_REPORT_V12: &str = "BIR12OsFizycznaDaneOgolne";

/// Looks `name` up in the allow-list, returning the static entry.
pub fn allowed_report(name: &str) -> Option<&'static str> {
    ALLOWED_REPORTS.iter().copied().find(|r| *r == name)
}

/// A validated REGON: 9 digits for an entity, 14 for a local unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryNumber(String);

impl RegistryNumber {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        let valid = matches!(trimmed.len(), 9 | 14) && trimmed.bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(AppError::Validation(
                "REGON musi mieć 9 lub 14 cyfr".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local_unit(&self) -> bool {
        self.0.len() == 14
    }
}

/// Picks the report to request.
///
/// A caller-supplied name is used only when it is on the allow-list (at most
/// 50 characters are considered); otherwise the default follows the REGON
/// length. Natural persons are not distinguished here.
pub fn select_report(number: &RegistryNumber, requested: Option<&str>) -> &'static str {
    let requested = requested
        .map(|name| name.chars().take(50).collect::<String>())
        .filter(|name| !name.trim().is_empty());
    if let Some(name) = requested.as_deref().and_then(|n| allowed_report(n.trim())) {
        return name;
    }
    if let Some(name) = requested {
        tracing::warn!("Ignoring report name outside the allow-list: {}", name);
    }
    if number.is_local_unit() {
        DEFAULT_LOCAL_UNIT_REPORT
    } else {
        DEFAULT_LEGAL_REPORT
    }
}

/// Response shape a report produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportCategory {
    Pkd,
    Partners,
    LocalUnits,
    /// Activity or general-data report: a list only when it has several entries.
    Activity,
    Scalar,
}

impl ReportCategory {
    /// Classifies by name, in this order: `pkd`, `wspolnicy`, `listajed`
    /// (case-insensitive), then `Dzialal` / `DaneOgolne`.
    pub fn of(report_name: &str) -> Self {
        let lower = report_name.to_lowercase();
        if lower.contains("pkd") {
            ReportCategory::Pkd
        } else if lower.contains("wspolnicy") {
            ReportCategory::Partners
        } else if lower.contains("listajed") {
            ReportCategory::LocalUnits
        } else if report_name.contains("Dzialal") || report_name.contains("DaneOgolne") {
            ReportCategory::Activity
        } else {
            ReportCategory::Scalar
        }
    }
}

pub fn is_natural_person_report(name: &str) -> bool {
    name.contains("OsFizyczna") || name.contains("OsFizycznej")
}

pub fn is_legal_person_report(name: &str) -> bool {
    name.contains("OsPrawna") || name.contains("OsPrawnej")
}

/// The single alternate report to try after a registry error, if any.
///
/// Rules, first match wins:
/// 1. natural-person general data, BIR11 → same report in BIR12;
/// 2. error says natural person (`F`) for a legal-person report → natural-person general data;
/// 3. error says legal person (`P`) for a natural-person report → legal-person default.
pub fn alternate_report(
    used: &str,
    error: &RegistryErrorRecord,
) -> Option<&'static str> {
    if used == NATURAL_GENERAL_REPORT {
        return Some(NATURAL_GENERAL_REPORT_V12);
    }
    match error.entity_type.as_deref().map(str::trim) {
        Some("F") if is_legal_person_report(used) => Some(NATURAL_GENERAL_REPORT),
        Some("P") if is_natural_person_report(used) => Some(DEFAULT_LEGAL_REPORT),
        _ => None,
    }
}
