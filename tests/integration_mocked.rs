/// Integration tests with a mocked BIR registry
/// Exercises login, search, full report and the router without hitting the real service
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use rust_gus_api::app::build_router;
use rust_gus_api::config::Config;
use rust_gus_api::envelopes::escape_xml;
use rust_gus_api::errors::AppError;
use rust_gus_api::handlers::AppState;
use rust_gus_api::models::ReportResult;
use rust_gus_api::reports::RegistryNumber;
use rust_gus_api::services::GusService;
use rust_gus_api::transport::BirTransport;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SID: &str = "abc123sid456xyz";

/// Helper function to create test config pointing at the mock registry
fn create_test_config(bir_url: String) -> Config {
    Config {
        gus_api_key: Some("test-key-1234567890".to_string()),
        bir_url: Some(bir_url),
        ..Config::default()
    }
}

fn soap_result(tag: &str, inner: &str) -> String {
    format!(
        concat!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body>"#,
            r#"<Response xmlns="http://CIS/BIR/PUBL/2014/07"><{tag}>{inner}</{tag}></Response>"#,
            "</s:Body></s:Envelope>"
        ),
        tag = tag,
        inner = inner
    )
}

fn escaped_records(records: &str) -> String {
    escape_xml(&format!("<root>{}</root>", records))
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_string_contains("<ns:Zaloguj>"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(soap_result("ZalogujResult", SID)),
        )
        .mount(server)
        .await;
}

async fn mount_diagnostics(server: &MockServer, code: &str, message: &str) {
    Mock::given(method("POST"))
        .and(body_string_contains("KomunikatKod</ns:pNazwaParametru>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_result("GetValueResult", code)))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("KomunikatTresc</ns:pNazwaParametru>"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(soap_result("GetValueResult", message)),
        )
        .mount(server)
        .await;
}

async fn mount_search(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(body_string_contains("<ns:DaneSzukajPodmioty>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn search_hit() -> String {
    soap_result(
        "DaneSzukajPodmiotyResult",
        &escaped_records(concat!(
            "<dane><Regon>000331501</Regon><Nip>5260250274</Nip>",
            "<Nazwa>GŁÓWNY URZĄD STATYSTYCZNY</Nazwa><Wojewodztwo>MAZOWIECKIE</Wojewodztwo>",
            "<Miejscowosc>Warszawa</Miejscowosc><KodPocztowy>00-925</KodPocztowy>",
            "<Ulica>ul. Test-Krucza</Ulica><NrNieruchomosci>208</NrNieruchomosci>",
            "<NrLokalu/><Typ>P</Typ><SilosID>6</SilosID></dane>"
        )),
    )
}

#[tokio::test]
async fn test_search_by_nip_returns_basic_record() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;
    mount_search(&mock_server, search_hit()).await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "test-key-1234567890");
    let found = service.search_by_nip("5260250274").await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].regon.as_deref(), Some("000331501"));
    assert_eq!(found[0].nazwa.as_deref(), Some("GŁÓWNY URZĄD STATYSTYCZNY"));
    assert_eq!(found[0].nr_lokalu, None);
    assert_eq!(found[0].typ.as_deref(), Some("P"));
}

#[tokio::test]
async fn test_empty_search_is_not_found_with_diagnostics() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;
    mount_diagnostics(&mock_server, "4", "Nie znaleziono podmiotów.").await;
    mount_search(&mock_server, soap_result("DaneSzukajPodmiotyResult", "")).await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "test-key-1234567890");
    let err = service.search_by_nip("5260250274").await.unwrap_err();

    match err {
        AppError::NotFound { diag: Some(diag), .. } => {
            assert_eq!(diag.komunikat_kod.as_deref(), Some("4"));
            assert_eq!(diag.komunikat_tresc.as_deref(), Some("Nie znaleziono podmiotów."));
        }
        other => panic!("expected NotFound with diagnostics, got {:?}", other),
    }
}

#[tokio::test]
async fn test_login_without_sid_fails_before_search() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("<ns:Zaloguj>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_result("ZalogujResult", "")))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("<ns:DaneSzukajPodmioty>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_hit()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "bad-key-1234567890");
    let err = service.search_by_nip("5260250274").await.unwrap_err();

    assert!(matches!(err.root(), AppError::AuthenticationFailed { .. }));
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_transport_deadline_maps_to_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(soap_result("ZalogujResult", SID))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&mock_server)
        .await;

    let transport = BirTransport::new(mock_server.uri());
    let err = transport
        .send("<x/>".to_string(), None, Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::TransportTimeout(_)));
    assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_mtom_wrapped_full_report_is_scalar() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;

    let envelope = soap_result(
        "DanePobierzPelnyRaportResult",
        &escaped_records(concat!(
            "<dane><praw_regon9>000331501</praw_regon9><praw_nip>5260250274</praw_nip>",
            "<praw_nazwa>GŁÓWNY URZĄD STATYSTYCZNY</praw_nazwa>",
            "<praw_numerWRejestrzeEwidencji/>",
            "<praw_podstawowaFormaPrawna_Symbol>1</praw_podstawowaFormaPrawna_Symbol></dane>"
        )),
    );
    let mtom = format!(
        "--uuid:5f1c\r\nContent-ID: <http://tempuri.org/0>\r\nContent-Transfer-Encoding: 8bit\r\nContent-Type: application/xop+xml;charset=utf-8;type=\"application/soap+xml\"\r\n\r\n{}\r\n--uuid:5f1c--\r\n",
        envelope
    );
    Mock::given(method("POST"))
        .and(body_string_contains(
            "<ns:pNazwaRaportu>BIR11OsPrawna</ns:pNazwaRaportu>",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(mtom))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "test-key-1234567890");
    let number = RegistryNumber::parse("000331501").unwrap();
    let report = service.full_report(&number, None).await.unwrap();

    assert_eq!(report.report_name, "BIR11OsPrawna");
    match report.result {
        ReportResult::Scalar(record) => {
            assert_eq!(record["praw_nazwa"].as_deref(), Some("GŁÓWNY URZĄD STATYSTYCZNY"));
            assert_eq!(record["praw_numerWRejestrzeEwidencji"], None);
        }
        other => panic!("expected scalar, got {:?}", other),
    }
}

#[tokio::test]
async fn test_registry_error_record_is_error_kind() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;
    Mock::given(method("POST"))
        .and(body_string_contains("<ns:DanePobierzPelnyRaport>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_result(
            "DanePobierzPelnyRaportResult",
            &escaped_records(concat!(
                "<dane><ErrorCode>4</ErrorCode>",
                "<ErrorMessagePl>Nie znaleziono podmiotu dla podanych kryteriów.</ErrorMessagePl>",
                "<Typ_podmiotu>F</Typ_podmiotu><Raport>BIR11OsPrawna</Raport></dane>"
            )),
        )))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "test-key-1234567890");
    let number = RegistryNumber::parse("000331501").unwrap();
    let report = service.full_report(&number, Some("BIR11OsPrawna")).await.unwrap();

    match report.result {
        ReportResult::Error(err) => {
            assert_eq!(err.code, "4");
            assert_eq!(err.entity_type.as_deref(), Some("F"));
        }
        other => panic!("expected error kind, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_result_on_server_error_is_protocol_error() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;
    Mock::given(method("POST"))
        .and(body_string_contains("<ns:DaneSzukajPodmioty>"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<s:Fault>boom</s:Fault>"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "test-key-1234567890");
    let err = service.search_by_nip("5260250274").await.unwrap_err();

    assert!(matches!(err, AppError::Protocol { .. }));
}

#[tokio::test]
async fn test_empty_root_report_is_not_found_with_diagnostics() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;
    mount_diagnostics(&mock_server, "4", "Nie znaleziono podmiotu dla podanych kryteriów.").await;
    Mock::given(method("POST"))
        .and(body_string_contains(
            "<ns:pNazwaRaportu>BIR11OsFizycznaDaneOgolne</ns:pNazwaRaportu>",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_result(
            "DanePobierzPelnyRaportResult",
            &escaped_records(""),
        )))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let service = GusService::new(&config, "test-key-1234567890");
    let number = RegistryNumber::parse("000331501").unwrap();
    let err = service
        .full_report(&number, Some("BIR11OsFizycznaDaneOgolne"))
        .await
        .unwrap_err();

    match err {
        AppError::NotFound {
            message,
            diag: Some(diag),
            debug,
        } => {
            assert_eq!(message, "Brak danych w raporcie BIR11OsFizycznaDaneOgolne");
            assert_eq!(diag.komunikat_kod.as_deref(), Some("4"));
            assert!(debug.is_some());
        }
        other => panic!("expected NotFound with diagnostics, got {:?}", other),
    }
}

fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_router_rejects_non_json_and_bad_nip() {
    let config = create_test_config("http://127.0.0.1:9".to_string());
    let app = build_router(AppState::new(config)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/lookup/by-id")
        .header(header::CONTENT_TYPE, "text/plain")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from("5260250274"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = app
        .clone()
        .oneshot(json_post("/lookup/by-id", r#"{"id":"123"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "NIP musi mieć dokładnie 10 cyfr");

    let response = app
        .oneshot(json_post("/lookup/full-report", r#"{"regon":"12345"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_router_rejects_oversized_body_before_lookup() {
    let config = create_test_config("http://127.0.0.1:9".to_string());
    let app = build_router(AppState::new(config)).unwrap();

    let padding = "x".repeat(70 * 1024);
    let body = format!(r#"{{"id":"5260250274","pad":"{}"}}"#, padding);
    let response = app
        .oneshot(json_post("/lookup/by-id", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Nieprawidłowe dane"));
}

#[tokio::test]
async fn test_router_search_end_to_end() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server).await;
    mount_search(&mock_server, search_hit()).await;

    let config = create_test_config(mock_server.uri());
    let app = build_router(AppState::new(config)).unwrap();

    let response = app
        .oneshot(json_post("/api/gus/name-by-nip", r#"{"nip":"526-025-02-74"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"][0]["regon"], "000331501");
    assert_eq!(body["data"][0]["kodPocztowy"], "00-925");
}

#[tokio::test]
async fn test_health_is_outside_the_json_guard() {
    let app = build_router(AppState::new(Config::default())).unwrap();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}
