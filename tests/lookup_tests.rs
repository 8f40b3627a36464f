/// Aggregation tests against a scripted registry and a mocked proxy backend
use async_trait::async_trait;
use rust_gus_api::backend_client::GusBackendClient;
use rust_gus_api::errors::AppError;
use rust_gus_api::lookup::{
    fetch_aggregate, fetch_report_with_fallback, RegistryLookup, NATURAL_CEIDG_REPORT,
};
use rust_gus_api::models::{ListKind, Record, RegistryErrorRecord, ReportResult, SearchRecord};
use std::collections::HashMap;
use std::sync::Mutex;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Some(v.to_string())))
        .collect()
}

fn registry_error(entity_type: &str) -> ReportResult {
    let fields = record(&[("ErrorCode", "4"), ("Typ_podmiotu", entity_type)]);
    ReportResult::Error(RegistryErrorRecord::from_record(&fields).unwrap())
}

/// Scripted registry: one answer per report name, every call recorded.
#[derive(Default)]
struct ScriptedRegistry {
    search: Vec<SearchRecord>,
    reports: HashMap<&'static str, ReportResult>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRegistry {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryLookup for ScriptedRegistry {
    async fn search_by_nip(&self, nip: &str) -> Result<Vec<SearchRecord>, AppError> {
        self.calls.lock().unwrap().push(format!("search:{}", nip));
        Ok(self.search.clone())
    }

    async fn full_report(&self, _regon: &str, report_name: &str) -> Result<ReportResult, AppError> {
        self.calls.lock().unwrap().push(report_name.to_string());
        self.reports
            .get(report_name)
            .cloned()
            .ok_or_else(|| AppError::Backend {
                status: 404,
                message: format!("no script for {}", report_name),
            })
    }
}

fn legal_entity() -> SearchRecord {
    SearchRecord {
        regon: Some("000331501".into()),
        nip: Some("5260250274".into()),
        nazwa: Some("GŁÓWNY URZĄD STATYSTYCZNY".into()),
        ulica: Some("ul. Stara".into()),
        typ: Some("P".into()),
        ..SearchRecord::default()
    }
}

#[tokio::test]
async fn test_fallback_retries_exactly_once() {
    let mut registry = ScriptedRegistry::default();
    registry.reports.insert("BIR11OsPrawna", registry_error("F"));
    registry
        .reports
        .insert("BIR11OsFizycznaDaneOgolne", registry_error("F"));

    let (used, result) = fetch_report_with_fallback(&registry, "000331501", "BIR11OsPrawna")
        .await
        .unwrap();

    assert_eq!(used, "BIR11OsFizycznaDaneOgolne");
    assert!(matches!(result, ReportResult::Error(_)));
    assert_eq!(
        registry.calls(),
        vec!["BIR11OsPrawna", "BIR11OsFizycznaDaneOgolne"]
    );
}

#[tokio::test]
async fn test_no_retry_without_an_alternate() {
    let mut registry = ScriptedRegistry::default();
    registry.reports.insert("BIR11OsPrawnaPkd", registry_error("P"));

    let (used, _) = fetch_report_with_fallback(&registry, "000331501", "BIR11OsPrawnaPkd")
        .await
        .unwrap();

    assert_eq!(used, "BIR11OsPrawnaPkd");
    assert_eq!(registry.calls().len(), 1);
}

#[tokio::test]
async fn test_invalid_nip_makes_no_calls() {
    let registry = ScriptedRegistry::default();
    let err = fetch_aggregate(&registry, "5260250275").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(registry.calls().is_empty());
}

#[tokio::test]
async fn test_empty_search_is_not_found() {
    let registry = ScriptedRegistry::default();
    let err = fetch_aggregate(&registry, "5260250274").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn test_legal_entity_aggregate() {
    let mut registry = ScriptedRegistry {
        search: vec![legal_entity()],
        ..ScriptedRegistry::default()
    };
    registry.reports.insert(
        "BIR11OsPrawna",
        ReportResult::Scalar(record(&[
            ("praw_numerWRejestrzeEwidencji", "0000012345"),
            ("praw_podstawowaFormaPrawna_Nazwa", "OSOBA PRAWNA"),
            ("praw_adSiedzUlica_Nazwa", "ul. Test-Krucza"),
            ("praw_adSiedzNumerNieruchomosci", "208"),
            ("praw_adSiedzMiejscowosc_Nazwa", "Warszawa"),
            ("praw_adSiedzKodPocztowy", "00925"),
            ("praw_adSiedzWojewodztwo_Nazwa", "MAZOWIECKIE"),
            ("praw_adresStronyinternetowej", "stat.gov.pl"),
        ])),
    );
    registry.reports.insert(
        "BIR11OsPrawnaPkd",
        ReportResult::List {
            kind: ListKind::Pkd,
            items: vec![
                record(&[("praw_pkdKod", "8411Z"), ("praw_pkdPrzewazajace", "1")]),
                record(&[("praw_pkdKod", "7220Z"), ("praw_pkdPrzewazajace", "0")]),
                record(&[("praw_pkdKod", "6311Z"), ("praw_pkdPrzewazajace", "1")]),
            ],
        },
    );

    let subject = fetch_aggregate(&registry, "526-025-02-74").await.unwrap();

    assert_eq!(subject.base.krs.as_deref(), Some("0000012345"));
    assert_eq!(subject.base.ulica.as_deref(), Some("ul. Test-Krucza"));
    assert_eq!(subject.base.wojewodztwo.as_deref(), Some("mazowieckie"));
    assert_eq!(subject.legal_form.as_deref(), Some("OSOBA PRAWNA"));
    assert_eq!(subject.website.as_deref(), Some("stat.gov.pl"));
    assert_eq!(subject.report_name.as_deref(), Some("BIR11OsPrawna"));

    let entries = subject.pkd_entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().filter(|e| e.primary).count(), 1);
    assert_eq!(
        registry.calls(),
        vec!["search:5260250274", "BIR11OsPrawna", "BIR11OsPrawnaPkd"]
    );
}

#[tokio::test]
async fn test_natural_person_backfills_address_from_activity_report() {
    let mut registry = ScriptedRegistry {
        search: vec![SearchRecord {
            typ: Some("F".into()),
            ..legal_entity()
        }],
        ..ScriptedRegistry::default()
    };
    registry.reports.insert(
        "BIR11OsFizycznaDaneOgolne",
        ReportResult::Scalar(record(&[("fiz_nazwisko", "Kowalski"), ("fiz_imie1", "Jan")])),
    );
    registry
        .reports
        .insert(NATURAL_CEIDG_REPORT, registry_error("F"));
    registry.reports.insert(
        "BIR12OsFizycznaDzialalnoscCeidg",
        ReportResult::Scalar(record(&[
            ("fiz_nazwisko", "Nowak"),
            ("fiz_adSiedzMiejscowosc_Nazwa", "Kraków"),
            ("fiz_adSiedzUlica_Nazwa", "ul. Długa"),
        ])),
    );

    let subject = fetch_aggregate(&registry, "5260250274").await.unwrap();

    assert_eq!(subject.field(&["fiz_nazwisko"]), Some("Kowalski"));
    assert_eq!(subject.base.miejscowosc.as_deref(), Some("Kraków"));
    assert_eq!(subject.base.ulica.as_deref(), Some("ul. Długa"));
    assert!(subject.pkd_list.is_empty());
    assert_eq!(
        registry.calls(),
        vec![
            "search:5260250274",
            "BIR11OsFizycznaDaneOgolne",
            "BIR11OsFizycznaDzialalnoscCeidg",
            "BIR12OsFizycznaDzialalnoscCeidg",
            "BIR11OsFizycznaPkd"
        ]
    );
}

#[tokio::test]
async fn test_report_failures_keep_the_base_record() {
    let registry = ScriptedRegistry {
        search: vec![legal_entity()],
        ..ScriptedRegistry::default()
    };
    let subject = fetch_aggregate(&registry, "5260250274").await.unwrap();
    assert_eq!(subject.base.ulica.as_deref(), Some("ul. Stara"));
    assert!(subject.full_report.is_empty());
    assert_eq!(subject.report_name, None);
}

#[tokio::test]
async fn test_backend_client_against_mocked_proxy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/gus/name-by-nip"))
        .and(header("x-gus-api-key", "widget-key-123456"))
        .and(body_partial_json(serde_json::json!({ "nip": "5260250274" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "regon": "000331501", "nip": "5260250274", "nazwa": "GUS", "typ": "P" }]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/gus/full-report"))
        .and(body_partial_json(serde_json::json!({ "reportName": "BIR11OsPrawna" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "praw_regon9": "000331501", "praw_numerWRejestrzeEwidencji": "0000012345" },
            "kind": "scalar",
            "reportName": "BIR11OsPrawna",
            "fieldsCount": 2
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/gus/full-report"))
        .and(body_partial_json(serde_json::json!({ "reportName": "BIR11OsPrawnaPkd" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "pkdList": [{ "praw_pkdKod": "8411Z", "praw_pkdPrzewazajace": "1" }], "pkdCount": 1 },
            "kind": "list",
            "reportName": "BIR11OsPrawnaPkd",
            "fieldsCount": 1
        })))
        .mount(&mock_server)
        .await;

    let client = GusBackendClient::new(mock_server.uri(), "widget-key-123456").unwrap();
    let subject = fetch_aggregate(&client, "5260250274").await.unwrap();

    assert_eq!(subject.base.krs.as_deref(), Some("0000012345"));
    assert_eq!(subject.pkd_list.len(), 1);
}

#[tokio::test]
async fn test_backend_error_message_is_surfaced() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/gus/name-by-nip"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": "GUS nie znalazł podmiotu dla podanego NIP",
            "diag": { "komunikatKod": "4" }
        })))
        .mount(&mock_server)
        .await;

    let client = GusBackendClient::new(mock_server.uri(), "widget-key-123456").unwrap();
    match client.search_by_nip("5260250274").await {
        Err(AppError::Backend { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "GUS nie znalazł podmiotu dla podanego NIP");
        }
        other => panic!("expected backend error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fallback_to_natural_person_drives_backfill_and_pkd() {
    let mut registry = ScriptedRegistry {
        search: vec![legal_entity()],
        ..ScriptedRegistry::default()
    };
    registry.reports.insert("BIR11OsPrawna", registry_error("F"));
    registry.reports.insert(
        "BIR11OsFizycznaDaneOgolne",
        ReportResult::Scalar(record(&[("fiz_nazwisko", "Kowalski"), ("fiz_imie1", "Jan")])),
    );
    registry.reports.insert(
        NATURAL_CEIDG_REPORT,
        ReportResult::Scalar(record(&[
            ("fiz_adSiedzMiejscowosc_Nazwa", "Gdańsk"),
            ("fiz_adSiedzUlica_Nazwa", "ul. Morska"),
        ])),
    );
    registry.reports.insert(
        "BIR11OsFizycznaPkd",
        ReportResult::List {
            kind: ListKind::Pkd,
            items: vec![
                record(&[("fiz_pkd_Kod", "6201Z"), ("fiz_pkd_Przewazajace", "1")]),
                record(&[("fiz_pkd_Kod", "6202Z"), ("fiz_pkd_Przewazajace", "0")]),
            ],
        },
    );

    let subject = fetch_aggregate(&registry, "5260250274").await.unwrap();

    assert_eq!(subject.report_name.as_deref(), Some("BIR11OsFizycznaDaneOgolne"));
    assert_eq!(subject.base.miejscowosc.as_deref(), Some("Gdańsk"));
    assert_eq!(subject.base.ulica.as_deref(), Some("ul. Morska"));
    assert_eq!(subject.pkd_entries().len(), 2);
    assert_eq!(subject.pkd_entries()[0].code, "6201Z");
    assert_eq!(
        registry.calls(),
        vec![
            "search:5260250274",
            "BIR11OsPrawna",
            "BIR11OsFizycznaDaneOgolne",
            "BIR11OsFizycznaDzialalnoscCeidg",
            "BIR11OsFizycznaPkd"
        ]
    );
}
