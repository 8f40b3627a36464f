//! SOAP 1.2 envelopes for the BIR service.
//!
//! Every caller-influenced value goes through [`escape_xml`].

const NS_PUBL: &str = "http://CIS/BIR/PUBL/2014/07";
const NS_BIR: &str = "http://CIS/BIR/2014/07";
const NS_DATA_CONTRACT: &str = "http://CIS/BIR/PUBL/2014/07/DataContract";
const ACTION_PUBL: &str = "http://CIS/BIR/PUBL/2014/07/IUslugaBIRzewnPubl";
const ACTION_GET_VALUE: &str = "http://CIS/BIR/2014/07/IUslugaBIR/GetValue";

/// Escapes the five XML special characters.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn envelope(ns: &str, extra_ns: &str, endpoint: &str, action: &str, body: &str) -> String {
    format!(
        concat!(
            r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:ns="{ns}"{extra}>"#,
            r#"<soap:Header xmlns:wsa="http://www.w3.org/2005/08/addressing">"#,
            r#"<wsa:To>{to}</wsa:To>"#,
            r#"<wsa:Action>{action}</wsa:Action>"#,
            r#"</soap:Header>"#,
            r#"<soap:Body>{body}</soap:Body>"#,
            r#"</soap:Envelope>"#
        ),
        ns = ns,
        extra = extra_ns,
        to = escape_xml(endpoint),
        action = action,
        body = body,
    )
}

/// `Zaloguj` with the user key.
pub fn login(endpoint: &str, api_key: &str) -> String {
    envelope(
        NS_PUBL,
        "",
        endpoint,
        &format!("{}/Zaloguj", ACTION_PUBL),
        &format!(
            "<ns:Zaloguj><ns:pKluczUzytkownika>{}</ns:pKluczUzytkownika></ns:Zaloguj>",
            escape_xml(api_key)
        ),
    )
}

/// `DaneSzukajPodmioty` by NIP; every other search parameter is nil.
pub fn search_by_nip(endpoint: &str, nip: &str) -> String {
    let extra = format!(
        r#" xmlns:q1="{}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#,
        NS_DATA_CONTRACT
    );
    let body = format!(
        concat!(
            "<ns:DaneSzukajPodmioty><ns:pParametryWyszukiwania>",
            r#"<q1:Krs xsi:nil="true"/>"#,
            r#"<q1:Krsy xsi:nil="true"/>"#,
            "<q1:Nip>{nip}</q1:Nip>",
            r#"<q1:Nipy xsi:nil="true"/>"#,
            r#"<q1:Regon xsi:nil="true"/>"#,
            r#"<q1:Regony14zn xsi:nil="true"/>"#,
            r#"<q1:Regony9zn xsi:nil="true"/>"#,
            "</ns:pParametryWyszukiwania></ns:DaneSzukajPodmioty>"
        ),
        nip = escape_xml(nip)
    );
    envelope(
        NS_PUBL,
        &extra,
        endpoint,
        &format!("{}/DaneSzukajPodmioty", ACTION_PUBL),
        &body,
    )
}

/// `DanePobierzPelnyRaport` for one REGON.
pub fn full_report(endpoint: &str, regon: &str, report_name: &str) -> String {
    envelope(
        NS_PUBL,
        "",
        endpoint,
        &format!("{}/DanePobierzPelnyRaport", ACTION_PUBL),
        &format!(
            concat!(
                "<ns:DanePobierzPelnyRaport>",
                "<ns:pRegon>{}</ns:pRegon>",
                "<ns:pNazwaRaportu>{}</ns:pNazwaRaportu>",
                "</ns:DanePobierzPelnyRaport>"
            ),
            escape_xml(regon),
            escape_xml(report_name)
        ),
    )
}

/// `GetValue` for a session parameter such as `KomunikatKod`.
pub fn get_value(endpoint: &str, parameter: &str) -> String {
    envelope(
        NS_BIR,
        "",
        endpoint,
        ACTION_GET_VALUE,
        &format!(
            "<ns:GetValue><ns:pNazwaParametru>{}</ns:pNazwaParametru></ns:GetValue>",
            escape_xml(parameter)
        ),
    )
}
