//! From raw SOAP text to [`ReportResult`].
//!
//! The steps run in a fixed order: strip MTOM framing, detect an empty result,
//! extract the result element, decode the entity-escaped payload, parse
//! `root > dane` records, then classify by report name.

use quick_xml::{events::Event, Reader};
use regex::Regex;
use std::borrow::Cow;
use std::collections::btree_map::Entry;
use std::sync::OnceLock;

use crate::errors::{snippet, AppError};
use crate::models::{first_field, ListKind, Record, RegistryErrorRecord, ReportResult};
use crate::reports::ReportCategory;

pub const SEARCH_RESULT_TAG: &str = "DaneSzukajPodmiotyResult";
pub const REPORT_RESULT_TAG: &str = "DanePobierzPelnyRaportResult";
const LEGACY_SEARCH_RESULT_TAG: &str = "DaneSzukajResult";

const KRS_CANDIDATES: [&str; 5] = [
    "praw_Krs",
    "praw_numerWRejestrzeEwidencji",
    "fiz_Krs",
    "fiz_numerwRejestrzeEwidencji",
    "fizC_numerwRejestrzeEwidencji",
];

fn mtom_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Content-Type: application/xop\+xml[^\r\n]*\r?\n\r?\n([\s\S]*?)\r?\n--uuid:")
            .expect("static MTOM pattern")
    })
}

/// Outcome of pulling records out of a SOAP response.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// The result element is self-closing or blank.
    Empty,
    /// No result element at all.
    Missing,
    /// Parsed `dane` records, in document order.
    Records(Vec<Record>),
}

/// Returns the SOAP part of an MTOM/XOP multipart body, or the input unchanged.
pub fn strip_mtom(raw: &str) -> Cow<'_, str> {
    if !raw.contains("Content-Type: application/xop+xml") {
        return Cow::Borrowed(raw);
    }
    match mtom_pattern().captures(raw).and_then(|c| c.get(1)) {
        Some(part) => Cow::Owned(part.as_str().to_string()),
        None => Cow::Borrowed(raw),
    }
}

fn empty_element_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<([\w:.-]+)(?:\s[^>]*)?/>|<([\w:.-]+)(?:\s[^>]*)?>\s*</([\w:.-]+)>")
            .expect("static empty element pattern")
    })
}

/// True when `tag` is present but self-closing or contains only whitespace.
pub fn detect_empty(text: &str, tag: &str) -> bool {
    empty_element_pattern().captures_iter(text).any(|c| {
        let name = |i: usize| c.get(i).map(|m| m.as_str());
        name(1) == Some(tag) || (name(2) == Some(tag) && name(3) == Some(tag))
    })
}

/// Inner text of the first `tag` element, attributes allowed.
pub fn extract_inner<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut from = 0;
    while let Some(pos) = text[from..].find(&open) {
        let start = from + pos;
        let after_name = start + open.len();
        match text[after_name..].chars().next() {
            Some('>') | Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                let gt = after_name + text[after_name..].find('>')?;
                if text[..gt].ends_with('/') {
                    return None;
                }
                let body_start = gt + 1;
                let end = body_start + text[body_start..].find(&close)?;
                return Some(&text[body_start..end]);
            }
            _ => from = after_name,
        }
    }
    None
}

/// Decodes the entity-escaped XML carried inside a result element.
///
/// Strips a BOM, resolves `&#xD;` / `&#xA;` and the five named entities in a
/// single left-to-right pass (so `&amp;lt;` yields `&lt;`, not `<`) and trims.
/// Input that is already plain XML is returned unchanged.
pub fn decode_inner_xml(inner: &str) -> String {
    let text = inner.trim_start_matches('\u{feff}').trim();
    if text.starts_with('<') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let (replacement, consumed) = match_entity(tail);
        match replacement {
            Some(decoded) => out.push_str(decoded),
            None => out.push('&'),
        }
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn match_entity(tail: &str) -> (Option<&'static str>, usize) {
    const NAMED: [(&str, &str); 5] = [
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&amp;", "&"),
    ];
    for (entity, decoded) in NAMED {
        if tail.starts_with(entity) {
            return (Some(decoded), entity.len());
        }
    }
    let lower = tail.get(..5).map(str::to_ascii_lowercase);
    match lower.as_deref() {
        Some("&#xd;") => (Some("\r"), 5),
        Some("&#xa;") => (Some("\n"), 5),
        _ => (None, 1),
    }
}

/// Parses `root > dane` records. Empty elements map to `None`; the first
/// occurrence of a repeated field wins. Field text is kept verbatim.
pub fn parse_records(xml: &str) -> Result<Vec<Record>, AppError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut field_text: Option<String> = None;

    let parse_error = |e: &dyn std::fmt::Display| AppError::Protocol {
        message: format!("Invalid report XML: {}", e),
        debug: Some(snippet(xml, 500)),
    };

    loop {
        let event = reader.read_event().map_err(|e| parse_error(&e))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match (stack.len(), stack.first().map(String::as_str), name.as_str()) {
                    (1, Some("root"), "dane") => current = Some(Record::new()),
                    (2, _, _) if current.is_some() => field_text = Some(String::new()),
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match (stack.len(), stack.first().map(String::as_str), name.as_str()) {
                    (1, Some("root"), "dane") => records.push(Record::new()),
                    (2, _, _) => {
                        if let Some(record) = current.as_mut() {
                            record.entry(name.clone()).or_insert(None);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if stack.len() == 3 {
                    if let Some(buf) = field_text.as_mut() {
                        let text = e.unescape().map_err(|e| parse_error(&e))?;
                        buf.push_str(&text);
                    }
                }
            }
            Event::CData(e) => {
                if stack.len() == 3 {
                    if let Some(buf) = field_text.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
            }
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                match stack.len() {
                    2 => {
                        if let (Some(record), Some(text)) = (current.as_mut(), field_text.take()) {
                            if let Entry::Vacant(slot) = record.entry(name) {
                                slot.insert(Some(text).filter(|t| !t.is_empty()));
                            }
                        }
                    }
                    1 => {
                        if let Some(record) = current.take() {
                            records.push(record);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

/// Runs framing, empty detection, extraction, decoding and parsing.
pub fn extract_records(raw: &str, result_tag: &str) -> Result<Extracted, AppError> {
    let text = strip_mtom(raw);
    if detect_empty(&text, result_tag)
        || (result_tag == SEARCH_RESULT_TAG && detect_empty(&text, LEGACY_SEARCH_RESULT_TAG))
    {
        return Ok(Extracted::Empty);
    }
    let Some(inner) = extract_inner(&text, result_tag) else {
        return Ok(Extracted::Missing);
    };
    let decoded = decode_inner_xml(inner);
    if decoded.is_empty() {
        return Ok(Extracted::Empty);
    }
    tracing::debug!("Decoded {} payload: {}", result_tag, snippet(&decoded, 200));
    parse_records(&decoded).map(Extracted::Records)
}

/// Copies the first non-empty KRS candidate into `krs` when that key is absent.
pub fn backfill_krs(record: &mut Record) {
    if first_field(record, &["krs"]).is_some() {
        return;
    }
    if let Some(krs) = first_field(record, &KRS_CANDIDATES).map(str::to_string) {
        record.insert("krs".to_string(), Some(krs));
    }
}

/// Shapes parsed records according to the report category.
///
/// # Returns
///
/// * `Ok(ReportResult)` - Scalar, list or registry error.
/// * `Err(AppError::NotFound)` - A scalar report without any record.
pub fn normalize(report_name: &str, records: Vec<Record>) -> Result<ReportResult, AppError> {
    if let Some(error) = records.iter().find_map(RegistryErrorRecord::from_record) {
        tracing::warn!(
            "Registry error {} for report {}: {}",
            error.code,
            report_name,
            error.message()
        );
        return Ok(ReportResult::Error(error));
    }

    let list_kind = match ReportCategory::of(report_name) {
        ReportCategory::Pkd => Some(ListKind::Pkd),
        ReportCategory::Partners => Some(ListKind::Partners),
        ReportCategory::LocalUnits => Some(ListKind::LocalUnits),
        ReportCategory::Activity if records.len() > 1 => Some(ListKind::Activities),
        ReportCategory::Activity | ReportCategory::Scalar => None,
    };

    if let Some(kind) = list_kind {
        return Ok(ReportResult::List {
            kind,
            items: records,
        });
    }

    let mut record = records
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found(format!("Brak danych w raporcie {}", report_name)))?;
    backfill_krs(&mut record);
    Ok(ReportResult::Scalar(record))
}
