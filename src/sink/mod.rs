//! Append-only CSV output, one file per (prefix, category) pair.
//!
//! Files are created lazily with a UTF-8 BOM and the fixed header; every
//! later write appends data rows only. Nothing is ever rewritten or
//! truncated, so a restarted run can only duplicate rows, never corrupt a
//! file. Detecting already-written pages after a crash is out of scope (no
//! checkpoint is kept).

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::HarvestError;
use crate::models::ResultRow;

pub const CSV_HEADER: [&str; 5] = [
    "MSISDN",
    "CATEGORY_NAME",
    "CATEGORY_PRICE",
    "NCLS_ID",
    "NSTS_ID",
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Bucket for rows whose NCLS_ID the backend omitted.
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Where a page's rows end up. Trait seam so the pagination driver can be
/// exercised with a recording fake.
pub trait RowSink: Send + Sync {
    /// Append a page of rows for `prefix`; returns how many rows landed.
    fn write(&self, prefix: &str, rows: &[ResultRow]) -> Result<usize, HarvestError>;
}

pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: &Path) -> Result<Self, HarvestError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn file_path(&self, prefix: &str, bucket: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_{bucket}.csv"))
    }

    fn append_group(
        &self,
        prefix: &str,
        bucket: &str,
        rows: &[&ResultRow],
    ) -> Result<(), HarvestError> {
        let path = self.file_path(prefix, bucket);
        let is_new = !path.exists();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            file.write_all(UTF8_BOM)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(CSV_HEADER)?;
        }

        for row in rows {
            writer.write_record([
                row.msisdn.as_str(),
                row.category_name.as_str(),
                row.category_price.as_str(),
                row.category_id.as_deref().unwrap_or(UNKNOWN_BUCKET),
                row.status_id.as_str(),
            ])?;
        }

        writer.flush()?;

        debug!("{:?}: +{} rows", path.file_name().unwrap_or_default(), rows.len());
        Ok(())
    }
}

impl RowSink for CsvSink {
    fn write(&self, prefix: &str, rows: &[ResultRow]) -> Result<usize, HarvestError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Group by category id, keeping response order inside each group.
        let mut groups: BTreeMap<&str, Vec<&ResultRow>> = BTreeMap::new();
        for row in rows {
            let bucket = row.category_id.as_deref().unwrap_or(UNKNOWN_BUCKET);
            groups.entry(bucket).or_default().push(row);
        }

        for (bucket, group) in &groups {
            self.append_group(prefix, bucket, group)?;
        }

        Ok(rows.len())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(msisdn: &str, name: &str, price: &str, ncls: Option<&str>) -> ResultRow {
        ResultRow {
            msisdn: msisdn.to_string(),
            category_name: name.to_string(),
            category_price: price.to_string(),
            category_id: ncls.map(String::from),
            status_id: "1".to_string(),
        }
    }

    fn read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    #[test]
    fn fresh_file_gets_bom_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path()).unwrap();

        sink.write("555", &[row("996555000001", "gold", "10000", Some("46"))])
            .unwrap();

        let bytes = read(&dir.path().join("555_46.csv"));
        assert!(bytes.starts_with(UTF8_BOM));

        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("MSISDN,CATEGORY_NAME,CATEGORY_PRICE,NCLS_ID,NSTS_ID"));
        assert_eq!(lines.next(), Some("996555000001,gold,10000,46,1"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn second_write_appends_without_repeating_header() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path()).unwrap();

        sink.write("555", &[row("996555000001", "gold", "10000", Some("46"))])
            .unwrap();
        sink.write("555", &[row("996555000002", "gold", "10000", Some("46"))])
            .unwrap();

        let text = String::from_utf8_lossy(&read(&dir.path().join("555_46.csv"))).into_owned();
        let headers = text.matches("MSISDN,CATEGORY_NAME").count();
        assert_eq!(headers, 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn rows_split_across_category_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path()).unwrap();

        let written = sink
            .write(
                "555",
                &[
                    row("996555000001", "gold", "10000", Some("46")),
                    row("996555000002", "vip", "50000", Some("48")),
                    row("996555000003", "gold", "10000", Some("46")),
                ],
            )
            .unwrap();

        assert_eq!(written, 3);
        assert!(dir.path().join("555_46.csv").exists());
        assert!(dir.path().join("555_48.csv").exists());

        let gold = String::from_utf8_lossy(&read(&dir.path().join("555_46.csv"))).into_owned();
        // Response order preserved within the group.
        assert!(gold.find("996555000001").unwrap() < gold.find("996555000003").unwrap());
    }

    #[test]
    fn missing_category_goes_to_unknown_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path()).unwrap();

        sink.write("555", &[row("996555000009", "", "", None)]).unwrap();

        let text =
            String::from_utf8_lossy(&read(&dir.path().join("555_unknown.csv"))).into_owned();
        assert!(text.contains("996555000009,,,unknown,1"));
    }

    #[test]
    fn comma_in_field_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path()).unwrap();

        sink.write(
            "555",
            &[row("996555000001", "gold, shiny", "10000", Some("46"))],
        )
        .unwrap();

        let text = String::from_utf8_lossy(&read(&dir.path().join("555_46.csv"))).into_owned();
        assert!(text.contains(r#""gold, shiny""#));
    }
}
