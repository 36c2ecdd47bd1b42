pub mod decode;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::HarvestError;
use crate::models::{PageResult, SearchQuery, SearchRequest};

use self::session::SessionManager;

// ── Transport seam ────────────────────────────────────────────────────────────

/// A raw HTTP exchange, reduced to what the protocol needs.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub set_cookies: Vec<String>,
    pub body: String,
}

/// Swappable wire transport. Production uses reqwest; tests script exchanges.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// GET the search URL to pick up session cookies.
    async fn bootstrap(&self, url: &str) -> Result<WireResponse, HarvestError>;

    /// POST one search page. `cookie` is attached verbatim when present.
    async fn search(
        &self,
        url: &str,
        request: &SearchRequest,
        cookie: Option<&str>,
    ) -> Result<WireResponse, HarvestError>;
}

// ── reqwest transport ─────────────────────────────────────────────────────────

pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &SearchConfig) -> Result<Self, HarvestError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Cookies are composed by the SessionManager, not the jar.
            .cookie_store(false)
            .build()
            .map_err(|e| HarvestError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { inner })
    }

    fn set_cookies_of(headers: &header::HeaderMap) -> Vec<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect()
    }
}

#[async_trait]
impl SearchTransport for ReqwestTransport {
    async fn bootstrap(&self, url: &str) -> Result<WireResponse, HarvestError> {
        debug!("GET {} (session bootstrap)", url);
        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let set_cookies = Self::set_cookies_of(response.headers());
        Ok(WireResponse {
            status,
            set_cookies,
            body: String::new(),
        })
    }

    async fn search(
        &self,
        url: &str,
        request: &SearchRequest,
        cookie: Option<&str>,
    ) -> Result<WireResponse, HarvestError> {
        let mut builder = self.inner.post(url).json(request);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let set_cookies = Self::set_cookies_of(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        Ok(WireResponse {
            status,
            set_cookies,
            body,
        })
    }
}

// ── Search client ─────────────────────────────────────────────────────────────

/// Swappable page source, so the pagination driver is testable without HTTP.
#[async_trait]
pub trait NumberSearchSource: Send + Sync {
    async fn fetch_page(&self, query: &SearchQuery) -> Result<PageResult, HarvestError>;
}

/// The real client: one paginated search request with the full retry
/// protocol. 4xx forces re-authentication with a bounded attempt budget;
/// any other non-200 waits a fixed backoff and retries the same page
/// indefinitely; transport failures abort immediately.
pub struct Mega24Client {
    transport: Arc<dyn SearchTransport>,
    session: Option<Arc<SessionManager>>,
    search_url: String,
    max_auth_attempts: u32,
    auth_retry_delay: Duration,
    error_backoff: Duration,
}

impl Mega24Client {
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        session: Option<Arc<SessionManager>>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            transport,
            session,
            search_url: config.base_url.clone(),
            max_auth_attempts: config.max_auth_attempts,
            auth_retry_delay: Duration::from_millis(config.auth_retry_delay_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
        }
    }
}

#[async_trait]
impl NumberSearchSource for Mega24Client {
    async fn fetch_page(&self, query: &SearchQuery) -> Result<PageResult, HarvestError> {
        let request = SearchRequest::from_query(query);
        let mut auth_attempts = 0u32;

        loop {
            let cookie = match &self.session {
                Some(session) => Some(session.current().await?),
                None => None,
            };

            let response = self
                .transport
                .search(&self.search_url, &request, cookie.as_deref())
                .await?;

            match response.status {
                200 => return Ok(decode::decode_page(&response.body)),

                status @ 400..=499 => {
                    auth_attempts += 1;
                    if auth_attempts >= self.max_auth_attempts {
                        return Err(HarvestError::Auth {
                            attempts: auth_attempts,
                            status,
                        });
                    }
                    warn!(
                        "HTTP {} on {} page {} — re-authenticating (attempt {}/{})",
                        status, query.prefix, query.page, auth_attempts, self.max_auth_attempts
                    );
                    if let Some(session) = &self.session {
                        session.invalidate_and_refresh().await?;
                    }
                    sleep(self.auth_retry_delay).await;
                }

                status => {
                    warn!(
                        "HTTP {} on {} page {} — backing off {:?}",
                        status, query.prefix, query.page, self.error_backoff
                    );
                    sleep(self.error_backoff).await;
                }
            }
        }
    }
}

// ── Test support ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub enum Script {
        Respond(u16, String),
        Fail(String),
    }

    /// Transport whose exchanges are scripted up front. Bootstrap always
    /// succeeds with the configured Set-Cookie headers; search pops the next
    /// scripted response.
    pub struct ScriptedTransport {
        pub bootstrap_calls: AtomicU32,
        pub search_calls: AtomicU32,
        pub cookies_seen: Mutex<Vec<Option<String>>>,
        bootstrap_cookies: Vec<String>,
        responses: Mutex<VecDeque<Script>>,
    }

    impl ScriptedTransport {
        pub fn with_bootstrap_cookies(bootstrap_cookies: Vec<String>) -> Self {
            Self {
                bootstrap_calls: AtomicU32::new(0),
                search_calls: AtomicU32::new(0),
                cookies_seen: Mutex::new(Vec::new()),
                bootstrap_cookies,
                responses: Mutex::new(VecDeque::new()),
            }
        }

        pub fn push_response(&self, status: u16, body: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Script::Respond(status, body.to_string()));
        }

        pub fn push_failure(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Script::Fail(message.to_string()));
        }
    }

    #[async_trait]
    impl SearchTransport for ScriptedTransport {
        async fn bootstrap(&self, _url: &str) -> Result<WireResponse, HarvestError> {
            self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
            Ok(WireResponse {
                status: 200,
                set_cookies: self.bootstrap_cookies.clone(),
                body: String::new(),
            })
        }

        async fn search(
            &self,
            _url: &str,
            _request: &SearchRequest,
            cookie: Option<&str>,
        ) -> Result<WireResponse, HarvestError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.cookies_seen
                .lock()
                .unwrap()
                .push(cookie.map(String::from));

            match self.responses.lock().unwrap().pop_front() {
                Some(Script::Respond(status, body)) => Ok(WireResponse {
                    status,
                    set_cookies: vec![],
                    body,
                }),
                Some(Script::Fail(message)) => Err(HarvestError::Transport(message)),
                None => Err(HarvestError::Transport("script exhausted".into())),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
