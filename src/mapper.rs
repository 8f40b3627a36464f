//! Registry data → CRM field maps for the Accounts module and the registry module.

use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};

use crate::lookup::{pkd_entries, AggregateSubject};
use crate::validators::{clean_nip, format_zip_code};

/// A CRM record or write payload: API field name → value.
pub type CrmRecord = Map<String, Value>;

pub const DEFAULT_COUNTRY: &str = "Polska";
pub const ADDRESS_TYPE_FIELD: &str = "Adres_w_rekordzie";
pub const SEAT_AND_BRANCH: &str = "Siedziba i Filia";
pub const HISTORY_FIELD: &str = "Historia_rekordu";

const HISTORY_SEPARATOR: &str =
    "<hr style=\"margin: 8px 0; border: 0; border-top: 1px solid #e5e7eb;\">";
const HISTORY_LISTED_FIELDS: usize = 10;

const MIRROR_PAIRS: [(&str, &str); 10] = [
    ("Billing_Street", "Shipping_Street"),
    ("Billing_Street_Name", "Shipping_Street_Name"),
    ("Billing_Building_Number", "Shipping_Building_Number"),
    ("Billing_Local_Number", "Shipping_Local_Number"),
    ("Billing_City", "Shipping_City"),
    ("Billing_Code", "Shipping_Code"),
    ("Billing_State", "Shipping_State"),
    ("Billing_Powiat", "Shipping_Powiat"),
    ("Billing_Gmina", "Shipping_Gmina"),
    ("Billing_Country", "Shipping_Country"),
];

/// Read-only fields the CRM rejects on write.
pub const SYSTEM_FIELDS: [&str; 11] = [
    "Created_Time",
    "Modified_Time",
    "Created_By",
    "Modified_By",
    "Owner",
    "Last_Activity_Time",
    "Unsubscribed_Time",
    "Unsubscribed_Mode",
    "Locked__s",
    "Record_Image",
    "Tag",
];

const PKD_FLAG_PREFIXES: [&str; 3] = ["75", "86", "96"];

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// `ulica nr/lokal`, skipping missing parts. Empty when nothing is known.
pub fn join_street(street: Option<&str>, building: Option<&str>, apartment: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(street) = non_empty(street) {
        parts.push(street.to_string());
    }
    if let Some(building) = non_empty(building) {
        match non_empty(apartment) {
            Some(apartment) => parts.push(format!("{}/{}", building, apartment)),
            None => parts.push(building.to_string()),
        }
    }
    parts.join(" ")
}

/// Full street line for the Accounts form, `-` when empty.
pub fn build_full_address(subject: &AggregateSubject) -> String {
    let base = &subject.base;
    let line = join_street(
        base.ulica.as_deref(),
        base.nr_nieruchomosci.as_deref(),
        base.nr_lokalu.as_deref(),
    );
    if line.is_empty() {
        "-".to_string()
    } else {
        line
    }
}

fn text(value: Option<&str>) -> Value {
    Value::String(value.unwrap_or_default().to_string())
}

fn address_fields(subject: &AggregateSubject, prefix: &str) -> CrmRecord {
    let base = &subject.base;
    let mut map = CrmRecord::new();
    let mut put = |suffix: &str, value: Value| {
        map.insert(format!("{}_{}", prefix, suffix), value);
    };
    put("Street", json!(build_full_address(subject)));
    put("Street_Name", text(base.ulica.as_deref()));
    put("Building_Number", text(base.nr_nieruchomosci.as_deref()));
    put("Local_Number", text(base.nr_lokalu.as_deref()));
    put("City", text(base.miejscowosc.as_deref()));
    put(
        "Code",
        json!(base
            .kod_pocztowy
            .as_deref()
            .filter(|z| !z.is_empty())
            .map(format_zip_code)
            .unwrap_or_default()),
    );
    put(
        "State",
        json!(base.wojewodztwo.as_deref().unwrap_or_default().to_lowercase()),
    );
    put("Powiat", text(base.powiat.as_deref()));
    put("Gmina", text(base.gmina.as_deref()));
    put("Country", json!(DEFAULT_COUNTRY));
    map
}

/// Every Accounts field the widget can fill, before the user's selection.
pub fn build_field_map(subject: &AggregateSubject) -> CrmRecord {
    let base = &subject.base;
    let mut map = CrmRecord::new();
    map.insert(
        "Account_Name".into(),
        json!(base.nazwa.as_deref().unwrap_or_default().to_uppercase()),
    );
    map.insert(
        "Firma_NIP".into(),
        json!(base.nip.as_deref().map(clean_nip).unwrap_or_default()),
    );
    map.insert("Firma_REGON".into(), text(base.regon.as_deref()));
    map.insert("Firma_KRS".into(), text(base.krs.as_deref()));
    map.extend(address_fields(subject, "Billing"));
    map
}

/// Copies every present `Billing_*` field onto its `Shipping_*` twin.
pub fn mirror_billing_to_shipping(data: &mut CrmRecord) {
    for (billing, shipping) in MIRROR_PAIRS {
        if let Some(value) = data.get(billing).cloned() {
            data.insert(shipping.to_string(), value);
        }
    }
}

/// Payload for an Accounts save.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSave {
    /// Selected fields only.
    pub api_data: CrmRecord,
    pub selected_count: usize,
    /// Every available field, for display.
    pub field_map: CrmRecord,
}

/// Keeps the selected fields of the field map; `Siedziba i Filia` also writes shipping.
pub fn prepare_data_for_save(
    subject: &AggregateSubject,
    address_type: &str,
    selected: &[&str],
) -> PreparedSave {
    let mirror = address_type == SEAT_AND_BRANCH;
    let mut field_map = build_field_map(subject);
    if mirror {
        field_map.extend(address_fields(subject, "Shipping"));
    }

    let mut api_data: CrmRecord = selected
        .iter()
        .filter_map(|name| {
            field_map
                .get(*name)
                .map(|value| (name.to_string(), value.clone()))
        })
        .collect();
    if mirror {
        mirror_billing_to_shipping(&mut api_data);
    }

    PreparedSave {
        selected_count: api_data.len(),
        api_data,
        field_map,
    }
}

fn symbol_and_name(symbol: Option<&str>, name: Option<&str>) -> Option<String> {
    if symbol.is_none() && name.is_none() {
        return None;
    }
    Some(format!(
        "{} - {}",
        symbol.unwrap_or_default(),
        name.unwrap_or_default()
    ))
}

/// Registry module record for one subject, linked to `account_id` when given.
pub fn build_registry_module_data(subject: &AggregateSubject, account_id: Option<&str>) -> CrmRecord {
    let base = &subject.base;
    let both = |field: &str| {
        let keys = [format!("praw_{}", field), format!("fiz_{}", field)];
        subject
            .field(&[keys[0].as_str(), keys[1].as_str()])
            .map(str::to_string)
    };
    let mut data = CrmRecord::new();

    data.insert(
        "Name".into(),
        json!(base.nip.as_deref().map(clean_nip).unwrap_or_default()),
    );
    data.insert("REGON".into(), text(base.regon.as_deref()));
    data.insert("KRS".into(), text(base.krs.as_deref()));
    data.insert("Nazwa_firmy".into(), text(base.nazwa.as_deref()));
    if let Some(id) = account_id {
        data.insert("Firma".into(), json!({ "id": id }));
    }

    let basic_symbol = both("podstawowaFormaPrawna_Symbol");
    let basic_name = both("podstawowaFormaPrawna_Nazwa");
    let special_symbol = both("szczegolnaFormaPrawna_Symbol");
    let special_name = both("szczegolnaFormaPrawna_Nazwa");
    data.insert("Podstawowa_forma_prawna".into(), text(basic_name.as_deref()));
    data.insert("Szczegolna_forma_prawna".into(), text(special_name.as_deref()));

    let composites = [
        ("Kod_i_nazwa_podstawowej_formy_prawnej", basic_symbol.clone(), basic_name),
        ("Kod_i_nazwa_szczegolnej_formy_prawnej", special_symbol, special_name),
        (
            "Kod_i_nazwa_formy_wlasnosci",
            both("formaWlasnosci_Symbol"),
            both("formaWlasnosci_Nazwa"),
        ),
        (
            "Organ_zalozycielski",
            both("organZalozycielski_Symbol"),
            both("organZalozycielski_Nazwa"),
        ),
        (
            "Organ_rejestrowy",
            both("organRejestrowy_Symbol"),
            both("organRejestrowy_Nazwa"),
        ),
        (
            "Rodzaj_rejestru_lub_ewidencji",
            both("rodzajRejestruEwidencji_Symbol"),
            both("rodzajRejestruEwidencji_Nazwa"),
        ),
    ];
    for (field, symbol, name) in composites {
        if let Some(value) = symbol_and_name(symbol.as_deref(), name.as_deref()) {
            data.insert(field.into(), json!(value));
        }
    }
    data.insert(
        "Forma_finansowania".into(),
        text(both("formaFinansowania_Nazwa").as_deref()),
    );
    data.insert(
        "Forma_wlasnosci".into(),
        text(both("formaWlasnosci_Nazwa").as_deref()),
    );

    let typ = base.typ.as_deref().unwrap_or_default();
    let symbol = basic_symbol.as_deref().unwrap_or_default();
    if typ == "P" || symbol == "1" {
        data.insert("P_rodz_dzialalnosci".into(), json!(true));
        data.insert("F_rodz_dzialalnosci".into(), json!(false));
    } else if typ == "F" || symbol == "9" {
        data.insert("P_rodz_dzialalnosci".into(), json!(false));
        data.insert("F_rodz_dzialalnosci".into(), json!(true));
    }

    let dates = [
        ("Data_powstania", "dataPowstania"),
        ("data_rozpoczecia_dzialalnosci", "dataRozpoczeciaDzialalnosci"),
        ("data_wpisu_do_REGON", "dataWpisuDoRegon"),
        ("data_wpisu_do_rejestru_lub_ewidencji", "dataWpisuDoRejestruEwidencji"),
        ("data_zawieszenia_dzialalnosci", "dataZawieszeniaDzialalnosci"),
        ("data_wznowienia_dzialalnosci", "dataWznowieniaDzialalnosci"),
        ("data_zakonczenia_dzialalnosci", "dataZakonczeniaDzialalnosci"),
        ("data_skreslenia_z_REGON", "dataSkresleniaZRegon"),
    ];
    for (field, source) in dates {
        data.insert(field.into(), text(both(source).as_deref()));
    }

    data.insert("REGON_numer_telefonu".into(), text(both("numerTelefonu").as_deref()));
    data.insert("REGON_adres_email".into(), text(both("adresEmail").as_deref()));
    data.insert(
        "REGON_adres_www".into(),
        text(both("adresStronyinternetowej").as_deref()),
    );

    if let Some(surname) = subject.field(&["fiz_nazwisko"]) {
        data.insert("REGON_Nazwisko".into(), json!(surname));
        data.insert("REGON_Imie".into(), text(subject.field(&["fiz_imie1"])));
        data.insert("REGON_Drugie_imie".into(), text(subject.field(&["fiz_imie2"])));
    }

    let street = both("adSiedzUlica_Nazwa");
    let building = both("adSiedzNumerNieruchomosci");
    let apartment = both("adSiedzNumerLokalu");
    data.insert(
        "Siedziba_Ulica_dom_lokal".into(),
        json!(join_street(
            street.as_deref(),
            building.as_deref(),
            apartment.as_deref()
        )),
    );
    data.insert("Siedziba_Ulica".into(), text(street.as_deref()));
    data.insert("Siedziba_Nr_domu".into(), text(building.as_deref()));
    data.insert("Siedziba_Nr_lokalu".into(), text(apartment.as_deref()));
    data.insert(
        "Siedziba_Miejscowosc".into(),
        text(both("adSiedzMiejscowosc_Nazwa").as_deref()),
    );
    data.insert(
        "Siedziba_Kod_pocztowy".into(),
        text(both("adSiedzKodPocztowy").as_deref()),
    );
    data.insert("Siedziba_Gmina".into(), text(both("adSiedzGmina_Nazwa").as_deref()));
    data.insert("Siedziba_Powiat".into(), text(both("adSiedzPowiat_Nazwa").as_deref()));
    if let Some(voivodeship) = both("adSiedzWojewodztwo_Nazwa") {
        data.insert("Siedziba_Wojewodztwo".into(), json!(voivodeship.to_lowercase()));
    }

    let local_units: i64 = both("liczbaJednLokalnych")
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0);
    data.insert("Liczba_jednostek_lokalnych".into(), json!(local_units));

    let entries = pkd_entries(&subject.pkd_list);
    if let Some(main) = entries.iter().find(|e| e.primary).or(entries.first()) {
        data.insert("PKD1_kod".into(), json!(main.code));
        data.insert("PKD1_nazwa".into(), json!(main.name));

        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                let marker = if e.primary { "★ [GŁÓWNY] " } else { "" };
                format!("{}{} - {}", marker, e.code, e.name)
            })
            .collect();
        data.insert("Wszystkie_kody_PKD".into(), json!(lines.join("\n")));

        for entry in &entries {
            let code: String = entry
                .code
                .chars()
                .filter(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
                .collect();
            if PKD_FLAG_PREFIXES.iter().any(|p| code.starts_with(p)) {
                data.insert(format!("PKD_{}", code), json!(true));
            }
        }
    }

    data
}

/// Removes read-only system fields from a write payload.
pub fn strip_system_fields(data: &mut CrmRecord) {
    for field in SYSTEM_FIELDS {
        data.remove(field);
    }
}

/// Loose textual form used to compare CRM values; falsy values compare as empty.
fn loose_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn lookup_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::Object(map)) => map
            .get("id")
            .or_else(|| map.get("lookup_value"))
            .map(|v| loose_text(Some(v)))
            .unwrap_or_default(),
        other => loose_text(other),
    }
}

/// Fields of `new` whose value differs from `existing`.
///
/// Lookups compare by id, arrays by their JSON form, everything else by text.
pub fn changed_fields(existing: &CrmRecord, new: &CrmRecord) -> Vec<String> {
    new.iter()
        .filter(|(key, _)| key.as_str() != "id" && key.as_str() != HISTORY_FIELD)
        .filter(|(key, value)| {
            let old = existing.get(key.as_str());
            match value {
                Value::Array(_) => {
                    let old = old.cloned().unwrap_or_else(|| json!([]));
                    old.to_string() != value.to_string()
                }
                Value::Object(_) => lookup_id(old) != lookup_id(Some(value)),
                _ => loose_text(old) != loose_text(Some(value)),
            }
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// HTML history entry stamped `YYYY-MM-DD HH:MM`.
pub fn build_history_entry(at: NaiveDateTime, is_new: bool, changed: &[String]) -> String {
    let mut entry = format!("<p><strong>{}</strong><br>", at.format("%Y-%m-%d %H:%M"));
    if is_new {
        entry.push_str("✓ Utworzono rekord z danymi z systemu REGON GUS</p>");
        return entry;
    }
    entry.push_str("✓ Zaktualizowano dane z systemu REGON GUS");
    if !changed.is_empty() {
        let listed: Vec<&str> = changed
            .iter()
            .take(HISTORY_LISTED_FIELDS)
            .map(String::as_str)
            .collect();
        entry.push_str("<br>Zmienione pola: ");
        entry.push_str(&listed.join(", "));
        if changed.len() > HISTORY_LISTED_FIELDS {
            entry.push_str(&format!(" (+{} więcej)", changed.len() - HISTORY_LISTED_FIELDS));
        }
    }
    entry.push_str("</p>");
    entry
}

/// Newest entry first, separated by a rule.
pub fn prepend_history(old: &str, entry: &str) -> String {
    if old.is_empty() {
        entry.to_string()
    } else {
        format!("{}{}{}", entry, HISTORY_SEPARATOR, old)
    }
}
