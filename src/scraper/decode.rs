//! Response-body decoding.
//!
//! The endpoint answers with a JSON array of flat records, but string fields
//! frequently arrive with their cyrillic content still `\uXXXX`-escaped one
//! level too deep. Structured parsing is the canonical path; a regex object
//! scan remains as the fallback for schema drift (the backend has been seen
//! returning bare objects and truncated arrays).

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::{PageResult, ResultRow, WireRecord};

/// Bodies shorter than this cannot contain a record; the backend signals
/// exhaustion with "[]" or an empty string.
const MIN_RECORD_BODY_LEN: usize = 10;

static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]*)\}").unwrap());

/// Decode one 200 response body into rows or an end-of-data signal.
pub fn decode_page(body: &str) -> PageResult {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "[]" || trimmed.len() < MIN_RECORD_BODY_LEN {
        return PageResult::EndOfData;
    }

    let records = match serde_json::from_str::<Vec<WireRecord>>(trimmed) {
        Ok(records) => records,
        Err(e) => {
            warn!("structured parse failed ({}), falling back to object scan", e);
            scan_records(trimmed)
        }
    };

    let rows: Vec<ResultRow> = records.iter().map(record_to_row).collect();
    if rows.is_empty() {
        debug!("no records in non-empty body, treating as end of data");
        PageResult::EndOfData
    } else {
        PageResult::Rows(rows)
    }
}

/// Normalise a wire record: unescape every string field, keep a missing
/// NCLS_ID as `None` so the sink can bucket it.
pub fn record_to_row(record: &WireRecord) -> ResultRow {
    let field = |v: &Option<String>| v.as_deref().map(unescape_unicode).unwrap_or_default();

    ResultRow {
        msisdn: field(&record.msisdn),
        category_name: field(&record.category_name),
        category_price: field(&record.category_price),
        category_id: record.ncls_id.as_deref().map(unescape_unicode),
        status_id: field(&record.nsts_id),
    }
}

// ── Unicode unescape ──────────────────────────────────────────────────────────

/// Convert `\uXXXX` sequences to their literal characters. Surrogate pairs
/// are combined; anything malformed (bad hex, lone surrogate) is left
/// verbatim rather than failing the record.
pub fn unescape_unicode(val: &str) -> String {
    if !val.contains("\\u") {
        return val.to_string();
    }

    let chars: Vec<char> = val.chars().collect();
    let mut out = String::with_capacity(val.len());
    let mut i = 0;

    while i < chars.len() {
        match parse_escape(&chars, i) {
            Some((ch, consumed)) => {
                out.push(ch);
                i += consumed;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }

    out
}

/// Try to read one escape starting at `i`; returns the decoded char and how
/// many input chars it consumed.
fn parse_escape(chars: &[char], i: usize) -> Option<(char, usize)> {
    let unit = hex_unit(chars, i)?;

    if (0xD800..0xDC00).contains(&unit) {
        // High surrogate: only valid with a low surrogate escape right after.
        let low = hex_unit(chars, i + 6)?;
        if !(0xDC00..0xE000).contains(&low) {
            return None;
        }
        let combined = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
        return char::from_u32(combined).map(|c| (c, 12));
    }

    char::from_u32(unit).map(|c| (c, 6))
}

fn hex_unit(chars: &[char], i: usize) -> Option<u32> {
    if i + 5 >= chars.len() || chars[i] != '\\' || chars[i + 1] != 'u' {
        return None;
    }
    let hex: String = chars[i + 2..i + 6].iter().collect();
    u32::from_str_radix(&hex, 16).ok()
}

// ── Regex fallback ────────────────────────────────────────────────────────────

/// Pull records out of a body that did not parse as a typed array. Mirrors
/// the five known fields; everything else is ignored.
fn scan_records(body: &str) -> Vec<WireRecord> {
    let mut records = Vec::new();

    for object in OBJECT_RE.captures_iter(body) {
        let content = &object[1];
        let record = WireRecord {
            msisdn: scan_field(content, "MSISDN"),
            category_name: scan_field(content, "CATEGORY_NAME"),
            category_price: scan_field(content, "CATEGORY_PRICE"),
            ncls_id: scan_field(content, "NCLS_ID"),
            nsts_id: scan_field(content, "NSTS_ID"),
        };

        if record.msisdn.is_some() || record.ncls_id.is_some() {
            records.push(record);
        }
    }

    records
}

fn scan_field(source: &str, key: &str) -> Option<String> {
    let pattern = format!(r#""{}":\s*"?([^,"}}]*)"?"#, key);
    let re = Regex::new(&pattern).ok()?;
    re.captures(source)
        .map(|c| c[1].trim().to_string())
        .filter(|v| !v.is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
