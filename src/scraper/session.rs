//! Session bootstrap and cookie lifecycle.
//!
//! The search endpoint hands out its session on a plain GET: we keep only the
//! PHP session id and the language cookie from the `Set-Cookie` headers and
//! replay them, joined, on every search POST. The composed string is the only
//! shared mutable state in the whole run, so refresh/invalidate are serialized
//! behind one async mutex.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::HarvestError;
use crate::scraper::SearchTransport;

/// Cookie names retained from the bootstrap response.
const SESSION_COOKIE: &str = "PHPSESSID=";
const LANG_COOKIE_PATTERN: &str = r"^_lang_\d+_x=.+";

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub cookie: String,
    pub valid_since: NaiveDateTime,
}

#[derive(Debug)]
enum SessionState {
    Uninitialized,
    Active(SessionToken),
    Invalid,
}

pub struct SessionManager {
    transport: Arc<dyn SearchTransport>,
    bootstrap_url: String,
    state: Mutex<SessionState>,
    lang_cookie: Regex,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn SearchTransport>, bootstrap_url: &str) -> Self {
        Self {
            transport,
            bootstrap_url: bootstrap_url.to_string(),
            state: Mutex::new(SessionState::Uninitialized),
            // The pattern is a literal; it cannot fail to compile.
            lang_cookie: Regex::new(LANG_COOKIE_PATTERN).unwrap(),
        }
    }

    /// Bootstrap a fresh session and store the composed cookie.
    pub async fn refresh(&self) -> Result<(), HarvestError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Drop the current token, then bootstrap again. Used after the endpoint
    /// rejects a request as unauthenticated.
    pub async fn invalidate_and_refresh(&self) -> Result<(), HarvestError> {
        let mut state = self.state.lock().await;
        *state = SessionState::Invalid;
        debug!("session invalidated, re-bootstrapping");
        self.refresh_locked(&mut state).await
    }

    /// Current cookie string, bootstrapping lazily on first use.
    pub async fn current(&self) -> Result<String, HarvestError> {
        let mut state = self.state.lock().await;
        if let SessionState::Active(token) = &*state {
            return Ok(token.cookie.clone());
        }
        self.refresh_locked(&mut state).await?;
        match &*state {
            SessionState::Active(token) => Ok(token.cookie.clone()),
            _ => Err(HarvestError::Session("no active session after refresh".into())),
        }
    }

    async fn refresh_locked(&self, state: &mut SessionState) -> Result<(), HarvestError> {
        let response = self
            .transport
            .bootstrap(&self.bootstrap_url)
            .await
            .map_err(|e| HarvestError::Session(e.to_string()))?;

        let token = SessionToken {
            cookie: self.compose_cookie(&response.set_cookies)?,
            valid_since: Utc::now().naive_utc(),
        };
        info!("session established: {} (since {})", token.cookie, token.valid_since);

        *state = SessionState::Active(token);
        Ok(())
    }

    /// Join the retained `name=value` parts with "; ". Fails when the
    /// response carried no `Set-Cookie` at all or nothing we recognise.
    fn compose_cookie(&self, set_cookies: &[String]) -> Result<String, HarvestError> {
        if set_cookies.is_empty() {
            return Err(HarvestError::Session("no Set-Cookie in bootstrap response".into()));
        }

        let mut parts = Vec::new();
        for header in set_cookies {
            let value_part = header.split(';').next().unwrap_or("").trim();
            if value_part.starts_with(SESSION_COOKIE) || self.lang_cookie.is_match(value_part) {
                parts.push(value_part.to_string());
            }
        }

        if parts.is_empty() {
            return Err(HarvestError::Session(
                "no PHPSESSID or language cookie in bootstrap response".into(),
            ));
        }

        Ok(parts.join("; "))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
