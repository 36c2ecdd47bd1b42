//! Harvest orchestration: category index → session → client → sink.
//!
//! One logical worker walks the configured prefixes in order; within a
//! prefix, pages are strictly sequential and each page's rows are on disk
//! before the next request goes out. The shared session is the reason
//! prefixes are not parallelised — the upstream couples sequential requests
//! to one cookie.
//!
//! Error scoping: an exhausted re-authentication budget kills only the
//! current prefix (logged, next prefix proceeds); a transport failure kills
//! the whole run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::category;
use crate::config::AppConfig;
use crate::error::HarvestError;
use crate::models::{PageResult, SearchQuery};
use crate::scraper::session::SessionManager;
use crate::scraper::{Mega24Client, NumberSearchSource, ReqwestTransport};
use crate::sink::{CsvSink, RowSink};

// ── Pacing ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub page_delay: Duration,
    pub jitter_ms: u64,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            page_delay: Duration::ZERO,
            jitter_ms: 0,
        }
    }

    async fn wait(&self) {
        use rand::RngExt;

        let jitter = if self.jitter_ms > 0 {
            rand::rng().random_range(0..=self.jitter_ms)
        } else {
            0
        };
        let total = self.page_delay + Duration::from_millis(jitter);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}

// ── Pagination driver ─────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
pub struct PrefixOutcome {
    pub pages: usize,
    pub rows: usize,
    pub cancelled: bool,
}

/// Walk one prefix from page 1 until the endpoint reports end of data.
/// Transient trouble never reaches this level; any error returned here is
/// terminal for the prefix (or the run, per [`HarvestError::is_run_fatal`]).
pub async fn drive_prefix(
    source: &dyn NumberSearchSource,
    sink: &dyn RowSink,
    query: &mut SearchQuery,
    pacing: Pacing,
    cancel: &AtomicBool,
) -> Result<PrefixOutcome, HarvestError> {
    let mut outcome = PrefixOutcome::default();

    loop {
        if cancel.load(Ordering::Relaxed) {
            warn!("{}: cancelled before page {}", query.prefix, query.page);
            outcome.cancelled = true;
            return Ok(outcome);
        }

        info!("{}: page {}", query.prefix, query.page);

        match source.fetch_page(query).await? {
            PageResult::EndOfData => {
                info!(
                    "{}: end of data ({} pages, {} rows)",
                    query.prefix, outcome.pages, outcome.rows
                );
                return Ok(outcome);
            }
            PageResult::Rows(rows) => {
                let written = sink.write(&query.prefix, &rows)?;
                outcome.pages += 1;
                outcome.rows += written;
                info!("{}: page {} done, {} rows", query.prefix, query.page, written);

                query.advance_page();
                pacing.wait().await;
            }
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HarvestStats {
    pub prefixes_processed: usize,
    pub pages_fetched: usize,
    pub rows_written: usize,
    pub errors: usize,
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, cancel: Arc<AtomicBool>) -> Result<HarvestStats> {
        let index =
            category::build(&self.config.categories).context("category tree is invalid")?;
        info!(
            "category filter: {} ids, {} priced",
            index.id_set.len(),
            index.price_by_id.len()
        );

        let transport = Arc::new(
            ReqwestTransport::new(&self.config.search).context("failed to build transport")?,
        );

        let session = if self.config.search.use_session {
            let session = Arc::new(SessionManager::new(
                transport.clone(),
                &self.config.search.base_url,
            ));
            // Eager bootstrap so a dead endpoint fails before any file is touched.
            session.refresh().await.context("session bootstrap failed")?;
            Some(session)
        } else {
            info!("running without a session (cookie-less mode)");
            None
        };

        let client = Mega24Client::new(transport, session, &self.config.search);
        let sink = CsvSink::new(&self.config.output.dir).context("failed to open output dir")?;

        let pacing = Pacing {
            page_delay: Duration::from_millis(self.config.search.page_delay_ms),
            jitter_ms: self.config.search.jitter_ms,
        };

        let mut stats = HarvestStats::default();

        for prefix in &self.config.prefixes {
            if cancel.load(Ordering::Relaxed) {
                warn!("run cancelled before prefix {}", prefix);
                break;
            }

            info!(">>> prefix {} <<<", prefix);
            let mut query = SearchQuery::new(
                index.id_set.clone(),
                self.config.search.page_size,
                &self.config.search.country_code,
                prefix,
            );

            match drive_prefix(&client, &sink, &mut query, pacing, &cancel).await {
                Ok(outcome) => {
                    stats.prefixes_processed += 1;
                    stats.pages_fetched += outcome.pages;
                    stats.rows_written += outcome.rows;
                    if outcome.cancelled {
                        break;
                    }
                }
                Err(e) if e.is_run_fatal() => {
                    error!("prefix {}: {:#} — aborting run", prefix, e);
                    return Err(e).context("run aborted");
                }
                Err(e) => {
                    error!("prefix {}: {:#} — moving to next prefix", prefix, e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "=== Done: {} prefixes | {} pages | {} rows | {} errors ===",
            stats.prefixes_processed, stats.pages_fetched, stats.rows_written, stats.errors
        );
        Ok(stats)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::ResultRow;
    use crate::scraper::testing::ScriptedTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn row(msisdn: &str, ncls: &str) -> ResultRow {
        ResultRow {
            msisdn: msisdn.to_string(),
            category_name: "gold".to_string(),
            category_price: "10000".to_string(),
            category_id: Some(ncls.to_string()),
            status_id: "1".to_string(),
        }
    }

    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<PageResult, HarvestError>>>,
        fetches: Mutex<Vec<u32>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<PageResult, HarvestError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                fetches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NumberSearchSource for ScriptedSource {
        async fn fetch_page(&self, query: &SearchQuery) -> Result<PageResult, HarvestError> {
            self.fetches.lock().unwrap().push(query.page);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PageResult::EndOfData))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(String, usize)>>,
    }

    impl RowSink for RecordingSink {
        fn write(&self, prefix: &str, rows: &[ResultRow]) -> Result<usize, HarvestError> {
            self.writes
                .lock()
                .unwrap()
                .push((prefix.to_string(), rows.len()));
            Ok(rows.len())
        }
    }

    fn query() -> SearchQuery {
        SearchQuery::new(vec![1, 2, 66], 20, "996", "555")
    }

    #[tokio::test]
    async fn driver_sinks_each_page_and_stops_at_end_of_data() {
        let source = ScriptedSource::new(vec![
            Ok(PageResult::Rows(vec![row("996555000001", "46")])),
            Ok(PageResult::Rows(vec![row("996555000002", "46")])),
            Ok(PageResult::EndOfData),
        ]);
        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(false);

        let outcome = drive_prefix(&source, &sink, &mut query(), Pacing::none(), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.rows, 2);
        assert!(!outcome.cancelled);
        // Sink invoked exactly twice; no request after the end-of-data page.
        assert_eq!(sink.writes.lock().unwrap().len(), 2);
        assert_eq!(*source.fetches.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn driver_propagates_fatal_errors() {
        let source = ScriptedSource::new(vec![
            Ok(PageResult::Rows(vec![row("996555000001", "46")])),
            Err(HarvestError::Transport("connection reset".into())),
        ]);
        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(false);

        let err = drive_prefix(&source, &sink, &mut query(), Pacing::none(), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_run_fatal());
        assert_eq!(sink.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_fetch() {
        let source = ScriptedSource::new(vec![Ok(PageResult::Rows(vec![row(
            "996555000001",
            "46",
        )]))]);
        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(true);

        let outcome = drive_prefix(&source, &sink, &mut query(), Pacing::none(), &cancel)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert!(source.fetches.lock().unwrap().is_empty());
        assert!(sink.writes.lock().unwrap().is_empty());
    }

    /// Full scenario over the real client, session manager and CSV sink:
    /// two pages of one row, then an empty array.
    #[tokio::test]
    async fn harvests_prefix_555_end_to_end() {
        let transport = Arc::new(ScriptedTransport::with_bootstrap_cookies(vec![
            "PHPSESSID=abc; path=/".to_string(),
            "_lang_2_x=ru; path=/".to_string(),
        ]));
        transport.push_response(
            200,
            r#"[{"MSISDN": "996555000001", "NCLS_ID": "46", "NSTS_ID": "1",
                "CATEGORY_PRICE": "10000", "CATEGORY_NAME": "Золото"}]"#,
        );
        transport.push_response(
            200,
            r#"[{"MSISDN": "996555000002", "NCLS_ID": "46", "NSTS_ID": "1",
                "CATEGORY_PRICE": "10000", "CATEGORY_NAME": "Золото"}]"#,
        );
        transport.push_response(200, "[]");

        let mut search_config = AppConfig::default().search;
        search_config.auth_retry_delay_ms = 0;
        search_config.error_backoff_ms = 0;

        let session = Arc::new(SessionManager::new(
            transport.clone(),
            "http://example.test/search",
        ));
        let client = Mega24Client::new(transport.clone(), Some(session), &search_config);

        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path()).unwrap();
        let cancel = AtomicBool::new(false);

        let outcome = drive_prefix(&client, &sink, &mut query(), Pacing::none(), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.rows, 2);

        let bytes = std::fs::read(dir.path().join("555_46.csv")).unwrap();
        assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]));

        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "MSISDN,CATEGORY_NAME,CATEGORY_PRICE,NCLS_ID,NSTS_ID");
        assert_eq!(lines[1], "996555000001,Золото,10000,46,1");
        assert_eq!(lines[2], "996555000002,Золото,10000,46,1");
    }
}
