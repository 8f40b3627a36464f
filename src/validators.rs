//! Tax ID and text helpers shared by the proxy and the widget orchestration.

use crate::errors::AppError;

const NIP_WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];

/// Checksum state of a partially typed NIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NipStatus {
    /// Nothing typed yet.
    Empty,
    /// Fewer than 10 digits.
    Incomplete,
    /// 10 digits with a matching checksum.
    Valid,
    /// 10 digits, checksum mismatch.
    InvalidChecksum,
}

/// Keeps only ASCII digits.
pub fn clean_nip(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

/// Format check: exactly 10 ASCII digits.
pub fn is_nip_format(nip: &str) -> bool {
    nip.len() == 10 && nip.bytes().all(|b| b.is_ascii_digit())
}

/// Full NIP validation: 10 digits, not all zeros, weighted checksum.
pub fn validate_nip(input: &str) -> bool {
    let nip = clean_nip(input);
    if !is_nip_format(&nip) || nip.bytes().all(|b| b == b'0') {
        return false;
    }
    let digits: Vec<u32> = nip.bytes().map(|b| u32::from(b - b'0')).collect();
    let sum: u32 = NIP_WEIGHTS
        .iter()
        .zip(&digits)
        .map(|(weight, digit)| weight * digit)
        .sum();
    let check = match sum % 11 {
        10 => 0,
        c => c,
    };
    check == digits[9]
}

/// Validates a NIP taken from a request body.
///
/// Separators are tolerated, at most 20 characters are considered. A format
/// error is reported before a checksum error.
///
/// # Returns
///
/// * `Ok(String)` - The 10 cleaned digits.
/// * `Err(AppError::Validation)` - Wrong length, or a bad checksum.
pub fn require_nip(raw: &str) -> Result<String, AppError> {
    let truncated: String = raw.chars().take(20).collect();
    let nip = clean_nip(&truncated);
    if !is_nip_format(&nip) {
        return Err(AppError::Validation(
            "NIP musi mieć dokładnie 10 cyfr".to_string(),
        ));
    }
    if !validate_nip(&nip) {
        return Err(AppError::Validation(
            "Nieprawidłowa suma kontrolna NIP".to_string(),
        ));
    }
    Ok(nip)
}

/// Formats as `XXX-XXX-XX-XX`, progressively for partial input.
pub fn format_nip(input: &str) -> String {
    let digits = clean_nip(input);
    let digits: String = digits.chars().take(10).collect();
    let mut out = String::with_capacity(13);
    for (i, c) in digits.chars().enumerate() {
        if i == 3 || i == 6 || i == 8 {
            out.push('-');
        }
        out.push(c);
    }
    out
}

pub fn nip_status(input: &str) -> NipStatus {
    let digits = clean_nip(input);
    match digits.len() {
        0 => NipStatus::Empty,
        n if n < 10 => NipStatus::Incomplete,
        _ if validate_nip(&digits) => NipStatus::Valid,
        _ => NipStatus::InvalidChecksum,
    }
}

/// `XX-XXX` for a bare 5-digit postal code, anything else unchanged.
pub fn format_zip_code(zip: &str) -> String {
    let digits = clean_nip(zip);
    if digits.len() == 5 && digits.len() == zip.trim().len() {
        format!("{}-{}", &digits[..2], &digits[2..])
    } else {
        zip.to_string()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Strips everything but ASCII alphanumerics, for CRM search criteria.
pub fn sanitize_for_criteria(value: &str) -> String {
    value.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Masks a secret for logging: `abcd...wxyz`, or `****` when short.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// First 8 characters of a session id, for logging.
pub fn mask_sid(sid: &str) -> String {
    let head: String = sid.chars().take(8).collect();
    format!("{}...", head)
}
