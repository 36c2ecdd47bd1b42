use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Category definitions (from config) ───────────────────────────────────────

/// One node of the configured category tree. Children are one level deep in
/// practice but the type allows arbitrary nesting.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryDef {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// Tariff as shown by the operator, possibly with space group separators
    /// ("30 000"). Blank or non-numeric means "no listed price".
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub items: Vec<CategoryDef>,
}

// ── Search query (per-prefix mutable state) ───────────────────────────────────

/// The number part of the mask that is left open for the search.
pub const NUMBER_FILLER: &str = "XXXXXX";

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub category_ids: Vec<u32>,
    pub page_size: u32,
    pub page: u32,
    pub prefix: String,
    pub country_code: String,
}

impl SearchQuery {
    pub fn new(category_ids: Vec<u32>, page_size: u32, country_code: &str, prefix: &str) -> Self {
        Self {
            category_ids,
            page_size,
            page: 1,
            prefix: prefix.to_string(),
            country_code: country_code.to_string(),
        }
    }

    /// "996555XXXXXX" — country code + prefix + filler.
    pub fn mask(&self) -> String {
        format!("{}{}{}", self.country_code, self.prefix, NUMBER_FILLER)
    }

    /// Comma-joined id list with a trailing comma, e.g. "1,2,66,".
    /// The upstream endpoint was only ever observed accepting this exact
    /// shape, so the trailing comma is part of the wire contract.
    pub fn category_filter(&self) -> String {
        let mut out = String::new();
        for id in &self.category_ids {
            out.push_str(&id.to_string());
            out.push(',');
        }
        out
    }

    pub fn advance_page(&mut self) {
        self.page += 1;
    }
}

// ── Wire request ──────────────────────────────────────────────────────────────

/// JSON body POSTed to the search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub category: String,
    pub limit: u32,
    pub page: u32,
    pub mask: String,
}

impl SearchRequest {
    pub fn from_query(query: &SearchQuery) -> Self {
        Self {
            category: query.category_filter(),
            limit: query.page_size,
            page: query.page,
            mask: query.mask(),
        }
    }
}

// ── Wire response record ──────────────────────────────────────────────────────

/// One record as returned by the search endpoint. The backend is loose about
/// types (ids arrive as numbers or strings depending on the field), so every
/// field is normalised to an optional string on deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireRecord {
    #[serde(rename = "MSISDN", default, deserialize_with = "de_opt_stringy")]
    pub msisdn: Option<String>,
    #[serde(rename = "CATEGORY_NAME", default, deserialize_with = "de_opt_stringy")]
    pub category_name: Option<String>,
    #[serde(rename = "CATEGORY_PRICE", default, deserialize_with = "de_opt_stringy")]
    pub category_price: Option<String>,
    #[serde(rename = "NCLS_ID", default, deserialize_with = "de_opt_stringy")]
    pub ncls_id: Option<String>,
    #[serde(rename = "NSTS_ID", default, deserialize_with = "de_opt_stringy")]
    pub nsts_id: Option<String>,
}

fn de_opt_stringy<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }))
}

// ── Normalised row ────────────────────────────────────────────────────────────

/// One harvested number, ready for the CSV sink. `category_id` is `None`
/// when the backend omitted NCLS_ID; the sink buckets those under "unknown".
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub msisdn: String,
    pub category_name: String,
    pub category_price: String,
    pub category_id: Option<String>,
    pub status_id: String,
}

// ── Page outcome ──────────────────────────────────────────────────────────────

/// What one page fetch produced. Transient failures are retried inside the
/// client and never surface here; fatal ones come back as `HarvestError`.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    Rows(Vec<ResultRow>),
    EndOfData,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_filter_keeps_trailing_comma() {
        let q = SearchQuery::new(vec![1, 2, 66], 20, "996", "555");
        assert_eq!(q.category_filter(), "1,2,66,");
    }

    #[test]
    fn mask_is_code_prefix_filler() {
        let q = SearchQuery::new(vec![1], 20, "996", "555");
        assert_eq!(q.mask(), "996555XXXXXX");
    }

    #[test]
    fn request_body_round_trips() {
        let mut q = SearchQuery::new(vec![1, 2, 66, 3, 67, 46, 47, 48, 49], 20000, "996", "555");
        q.advance_page();
        let req = SearchRequest::from_query(&q);

        let json = serde_json::to_string(&req).unwrap();
        let back: SearchRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
        assert_eq!(back.category, "1,2,66,3,67,46,47,48,49,");
        assert_eq!(back.limit, 20000);
        assert_eq!(back.page, 2);
        assert_eq!(back.mask, "996555XXXXXX");
    }

    #[test]
    fn wire_record_accepts_numeric_ids() {
        let raw = r#"{"MSISDN": "996555123456", "NCLS_ID": 46, "NSTS_ID": "1",
                      "CATEGORY_PRICE": 30000, "CATEGORY_NAME": "gold"}"#;
        let rec: WireRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.ncls_id.as_deref(), Some("46"));
        assert_eq!(rec.category_price.as_deref(), Some("30000"));
        assert_eq!(rec.msisdn.as_deref(), Some("996555123456"));
    }

    #[test]
    fn wire_record_tolerates_missing_fields() {
        let rec: WireRecord = serde_json::from_str(r#"{"MSISDN": "996555000001"}"#).unwrap();
        assert!(rec.ncls_id.is_none());
        assert!(rec.category_name.is_none());
    }
}
