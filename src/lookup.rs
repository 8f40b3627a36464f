//! Client-side aggregation: search, general report, address backfill and
//! PKD codes combined into one [`AggregateSubject`].

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{first_field, ListKind, Record, ReportResult, SearchRecord};
use crate::reports::{
    alternate_report, is_legal_person_report, is_natural_person_report, DEFAULT_LEGAL_REPORT,
    NATURAL_GENERAL_REPORT,
};
use crate::validators::require_nip;

pub const NATURAL_CEIDG_REPORT: &str = "BIR11OsFizycznaDzialalnoscCeidg";
pub const NATURAL_CEIDG_REPORT_V12: &str = "BIR12OsFizycznaDzialalnoscCeidg";
pub const NATURAL_PKD_REPORT: &str = "BIR11OsFizycznaPkd";
pub const LEGAL_PKD_REPORT: &str = "BIR11OsPrawnaPkd";

const NATURAL_ADDRESS_KEYS: [&str; 4] = [
    "fiz_adSiedzMiejscowosc_Nazwa",
    "fiz_adSiedzUlica_Nazwa",
    "fiz_adDzialalnosciMiejscowosc_Nazwa",
    "fiz_adDzialalnosciUlica_Nazwa",
];

/// Registry operations as seen by the widget: the proxy endpoints, or a fake in tests.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn search_by_nip(&self, nip: &str) -> Result<Vec<SearchRecord>, AppError>;
    async fn full_report(&self, regon: &str, report_name: &str) -> Result<ReportResult, AppError>;
}

/// Natural person (sole trader) or legal person, from the search record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Natural,
    Legal,
}

impl EntityKind {
    /// `Typ` (falling back to `SilosID`) of `F` or `1` means a natural person.
    pub fn detect(record: &SearchRecord) -> Self {
        let marker = record
            .typ
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(record.silos_id.as_deref())
            .map(str::trim)
            .unwrap_or_default();
        match marker {
            "F" | "1" => EntityKind::Natural,
            _ => EntityKind::Legal,
        }
    }

    /// Family of a report name, when the name carries one.
    pub fn of_report(report_name: &str) -> Option<Self> {
        if is_natural_person_report(report_name) {
            Some(EntityKind::Natural)
        } else if is_legal_person_report(report_name) {
            Some(EntityKind::Legal)
        } else {
            None
        }
    }

    pub fn general_report(self) -> &'static str {
        match self {
            EntityKind::Natural => NATURAL_GENERAL_REPORT,
            EntityKind::Legal => DEFAULT_LEGAL_REPORT,
        }
    }

    pub fn pkd_report(self) -> &'static str {
        match self {
            EntityKind::Natural => NATURAL_PKD_REPORT,
            EntityKind::Legal => LEGAL_PKD_REPORT,
        }
    }
}

/// Fetches a report, retrying once with [`alternate_report`] on a registry error.
///
/// # Returns
///
/// * `Ok((name, result))` - The report actually used and its result, which may
///   still be a registry error when no alternate applies or the retry failed too.
pub async fn fetch_report_with_fallback(
    source: &dyn RegistryLookup,
    regon: &str,
    report_name: &str,
) -> Result<(String, ReportResult), AppError> {
    let result = source.full_report(regon, report_name).await?;
    let ReportResult::Error(ref error) = result else {
        return Ok((report_name.to_string(), result));
    };
    match alternate_report(report_name, error) {
        Some(alternate) => {
            tracing::info!(
                "Report {} failed with code {}, retrying as {}",
                report_name,
                error.code,
                alternate
            );
            let retried = source.full_report(regon, alternate).await?;
            Ok((alternate.to_string(), retried))
        }
        None => Ok((report_name.to_string(), result)),
    }
}

/// One PKD classification entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkdEntry {
    pub code: String,
    pub name: String,
    pub primary: bool,
}

/// Reads PKD entries across the naming variants of natural- and legal-person reports.
///
/// Only the first entry flagged as predominant is marked primary.
pub fn pkd_entries(items: &[Record]) -> Vec<PkdEntry> {
    let mut seen_primary = false;
    items
        .iter()
        .map(|item| {
            let code = first_field(item, &["fiz_pkd_Kod", "fiz_pkdKod", "praw_pkdKod"]);
            let name = first_field(item, &["fiz_pkd_Nazwa", "fiz_pkdNazwa", "praw_pkdNazwa"]);
            let flagged = first_field(
                item,
                &[
                    "fiz_pkd_Przewazajace",
                    "fiz_pkdPrzewazajace",
                    "praw_pkdPrzewazajace",
                ],
            ) == Some("1");
            let primary = flagged && !seen_primary;
            seen_primary |= primary;
            PkdEntry {
                code: code.unwrap_or_default().to_string(),
                name: name.unwrap_or_default().to_string(),
                primary,
            }
        })
        .collect()
}

/// Everything the widget knows about one entity after a lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSubject {
    /// Search record, with KRS and address overridden from the full report.
    pub base: SearchRecord,
    pub legal_form: Option<String>,
    pub special_legal_form: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    /// Report the full data came from, when one succeeded.
    pub report_name: Option<String>,
    /// Flat full-report fields, empty when unavailable.
    pub full_report: Record,
    pub pkd_list: Vec<Record>,
}

impl AggregateSubject {
    pub fn pkd_entries(&self) -> Vec<PkdEntry> {
        pkd_entries(&self.pkd_list)
    }

    /// First non-empty full-report field among `keys`.
    pub fn field(&self, keys: &[&str]) -> Option<&str> {
        first_field(&self.full_report, keys)
    }

    fn apply_full_report(&mut self) {
        let owned = |keys: &[&str]| first_field(&self.full_report, keys).map(str::to_string);

        let krs = owned(&[
            "krs",
            "praw_numerWRejestrzeEwidencji",
            "fiz_numerWRejestrzeEwidencji",
            "praw_Krs",
        ]);
        let legal_form = owned(&["praw_podstawowaFormaPrawna_Nazwa"]);
        let special_legal_form = owned(&["praw_szczegolnaFormaPrawna_Nazwa"]);
        let email = owned(&["praw_adresEmail", "fiz_adresEmail"]);
        let phone = owned(&["praw_numerTelefonu", "fiz_numerTelefonu"]);
        let website = owned(&["praw_adresStronyinternetowej", "fiz_adresStronyinternetowej"]);

        let address_field = |suffix: &str| {
            let keys = [
                format!("fiz_adSiedz{}", suffix),
                format!("fiz_adDzialalnosci{}", suffix),
                format!("praw_adSiedz{}", suffix),
            ];
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            first_field(&self.full_report, &keys).map(str::to_string)
        };
        let street = address_field("Ulica_Nazwa");
        let building = address_field("NumerNieruchomosci");
        let apartment = address_field("NumerLokalu");
        let town = address_field("Miejscowosc_Nazwa");
        let zip = address_field("KodPocztowy");
        let voivodeship = address_field("Wojewodztwo_Nazwa");

        if krs.is_some() {
            self.base.krs = krs;
        }
        self.legal_form = legal_form.or(self.legal_form.take());
        self.special_legal_form = special_legal_form.or(self.special_legal_form.take());
        self.email = email.or(self.email.take());
        self.phone = phone.or(self.phone.take());
        self.website = website.or(self.website.take());

        if street.is_some() || building.is_some() || town.is_some() || zip.is_some() {
            self.base.ulica = street;
            self.base.nr_nieruchomosci = building;
            self.base.nr_lokalu = apartment;
            self.base.miejscowosc = town;
            self.base.kod_pocztowy = zip;
            self.base.wojewodztwo = voivodeship.map(|v| v.to_lowercase());
            tracing::debug!("Base address replaced with the seat address from the full report");
        }
    }
}

fn has_natural_address(record: &Record) -> bool {
    first_field(record, &NATURAL_ADDRESS_KEYS).is_some()
}

/// Fills keys missing from `target` (absent or empty) with values from `extra`.
fn fill_missing(target: &mut Record, extra: Record) {
    for (key, value) in extra {
        let missing = target
            .get(&key)
            .map(|v| v.as_deref().unwrap_or_default().is_empty())
            .unwrap_or(true);
        if missing && value.is_some() {
            target.insert(key, value);
        }
    }
}

async fn fetch_record(
    source: &dyn RegistryLookup,
    regon: &str,
    report_name: &str,
) -> Result<Record, AppError> {
    source.full_report(regon, report_name).await?.into_scalar()
}

/// Runs the full widget lookup for one NIP.
///
/// The NIP is validated before any call. Failures of the full or PKD report
/// are logged and leave the base record usable.
///
/// # Returns
///
/// * `Ok(AggregateSubject)` - Base record plus whatever the reports added.
/// * `Err(AppError::NotFound)` - The search returned no records.
pub async fn fetch_aggregate(
    source: &dyn RegistryLookup,
    raw_nip: &str,
) -> Result<AggregateSubject, AppError> {
    let nip = require_nip(raw_nip)?;
    let found = source.search_by_nip(&nip).await?;
    let Some(base) = found.into_iter().next() else {
        return Err(AppError::not_found("Nie znaleziono podmiotu o podanym NIP"));
    };

    let mut subject = AggregateSubject {
        base,
        ..AggregateSubject::default()
    };
    let Some(regon) = subject.base.regon.clone().filter(|r| !r.is_empty()) else {
        tracing::warn!("Search record for NIP {} has no REGON, skipping reports", nip);
        return Ok(subject);
    };

    let mut kind = EntityKind::detect(&subject.base);
    tracing::info!("Entity {} detected as {:?}", regon, kind);

    match fetch_report_with_fallback(source, &regon, kind.general_report()).await {
        Ok((used, result)) => {
            // The registry's answer decides the family once a fallback switched it
            if let Some(answered) = EntityKind::of_report(&used).filter(|k| *k != kind) {
                tracing::info!("Entity {} reclassified as {:?} by {}", regon, answered, used);
                kind = answered;
            }
            match result.into_scalar() {
                Ok(record) => {
                    subject.report_name = Some(used);
                    subject.full_report = record;
                }
                Err(e) => tracing::warn!("Full report {} unusable: {}", used, e),
            }
        }
        Err(e) => tracing::warn!("Full report failed, continuing with basic data: {}", e),
    }

    if kind == EntityKind::Natural
        && subject.report_name.is_some()
        && !has_natural_address(&subject.full_report)
    {
        tracing::info!("General data carries no address, fetching {}", NATURAL_CEIDG_REPORT);
        let activity = match fetch_record(source, &regon, NATURAL_CEIDG_REPORT).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::info!("{} failed ({}), trying {}", NATURAL_CEIDG_REPORT, e, NATURAL_CEIDG_REPORT_V12);
                fetch_record(source, &regon, NATURAL_CEIDG_REPORT_V12).await
            }
        };
        match activity {
            Ok(record) => fill_missing(&mut subject.full_report, record),
            Err(e) => tracing::warn!("Activity address unavailable: {}", e),
        }
    }

    if subject.report_name.is_some() {
        subject.apply_full_report();
    }

    match source.full_report(&regon, kind.pkd_report()).await {
        Ok(ReportResult::List {
            kind: ListKind::Pkd,
            items,
        }) => {
            tracing::info!("Fetched {} PKD code(s)", items.len());
            subject.pkd_list = items;
        }
        Ok(ReportResult::Scalar(record)) => subject.pkd_list = vec![record],
        Ok(other) => tracing::warn!("PKD report returned {}", other.kind()),
        Err(e) => tracing::warn!("PKD report failed: {}", e),
    }

    Ok(subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[test]
    fn entity_kind_from_typ_or_silos() {
        let natural = SearchRecord {
            typ: Some("F".into()),
            ..SearchRecord::default()
        };
        let by_silos = SearchRecord {
            silos_id: Some("1".into()),
            ..SearchRecord::default()
        };
        let legal = SearchRecord {
            typ: Some("P".into()),
            silos_id: Some("6".into()),
            ..SearchRecord::default()
        };
        assert_eq!(EntityKind::detect(&natural), EntityKind::Natural);
        assert_eq!(EntityKind::detect(&by_silos), EntityKind::Natural);
        assert_eq!(EntityKind::detect(&legal), EntityKind::Legal);
        assert_eq!(EntityKind::detect(&SearchRecord::default()), EntityKind::Legal);
    }

    #[test]
    fn entity_kind_from_report_name() {
        assert_eq!(
            EntityKind::of_report("BIR12OsFizycznaDaneOgolne"),
            Some(EntityKind::Natural)
        );
        assert_eq!(EntityKind::of_report("BIR11OsPrawnaPkd"), Some(EntityKind::Legal));
        assert_eq!(EntityKind::of_report("BIR11JednLokalnaOsPrawnej"), Some(EntityKind::Legal));
        assert_eq!(EntityKind::of_report("BIR11TypPodmiotu"), None);
    }

    #[test]
    fn only_first_predominant_code_is_primary() {
        let items = vec![
            record(&[("praw_pkdKod", "6201Z"), ("praw_pkdPrzewazajace", "1")]),
            record(&[("fiz_pkd_Kod", "6202Z"), ("fiz_pkd_Przewazajace", "1")]),
            record(&[("fiz_pkdKod", "6209Z"), ("fiz_pkdNazwa", "Pozostała")]),
        ];
        let entries = pkd_entries(&items);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|e| e.primary).count(), 1);
        assert!(entries[0].primary);
        assert_eq!(entries[1].code, "6202Z");
        assert_eq!(entries[2].name, "Pozostała");
    }

    #[test]
    fn full_report_overrides_address_and_contact() {
        let mut subject = AggregateSubject {
            base: SearchRecord {
                ulica: Some("ul. Stara".into()),
                wojewodztwo: Some("MAZOWIECKIE".into()),
                ..SearchRecord::default()
            },
            full_report: record(&[
                ("praw_numerWRejestrzeEwidencji", "0000012345"),
                ("praw_adSiedzUlica_Nazwa", "ul. Nowa"),
                ("praw_adSiedzMiejscowosc_Nazwa", "Warszawa"),
                ("praw_adSiedzWojewodztwo_Nazwa", "MAZOWIECKIE"),
                ("praw_adresEmail", "biuro@example.pl"),
            ]),
            ..AggregateSubject::default()
        };
        subject.apply_full_report();
        assert_eq!(subject.base.krs.as_deref(), Some("0000012345"));
        assert_eq!(subject.base.ulica.as_deref(), Some("ul. Nowa"));
        assert_eq!(subject.base.nr_nieruchomosci, None);
        assert_eq!(subject.base.wojewodztwo.as_deref(), Some("mazowieckie"));
        assert_eq!(subject.email.as_deref(), Some("biuro@example.pl"));
    }

    #[test]
    fn fill_missing_keeps_existing_values() {
        let mut target = record(&[("a", "1"), ("b", "")]);
        fill_missing(&mut target, record(&[("a", "9"), ("b", "2"), ("c", "3")]));
        assert_eq!(target.get("a").cloned().flatten().as_deref(), Some("1"));
        assert_eq!(target.get("b").cloned().flatten().as_deref(), Some("2"));
        assert_eq!(target.get("c").cloned().flatten().as_deref(), Some("3"));
    }
}
