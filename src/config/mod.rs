use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::CategoryDef;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub output: OutputConfig,

    /// 3-digit number blocks to scan.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,

    /// Category tree as published by the operator.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryDef>,
}

/// Search endpoint + pacing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_country_code")]
    pub country_code: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause between successive pages of one prefix.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default)]
    pub jitter_ms: u64,

    /// Wait before retrying after a non-auth server error (5xx etc).
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Pause between re-authentication attempts.
    #[serde(default = "default_auth_retry_delay_ms")]
    pub auth_retry_delay_ms: u64,

    /// Total tries for one page when the server answers 4xx.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,

    /// When false no session is bootstrapped and no Cookie header is sent —
    /// some deployments of the endpoint accept unauthenticated queries.
    #[serde(default = "default_true")]
    pub use_session: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_out_dir")]
    pub dir: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://mega24.kg/ru/number/search".to_string()
}
fn default_country_code() -> String {
    "996".to_string()
}
fn default_page_size() -> u32 {
    20000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_delay_ms() -> u64 {
    1000
}
fn default_error_backoff_ms() -> u64 {
    5000
}
fn default_auth_retry_delay_ms() -> u64 {
    1000
}
fn default_max_auth_attempts() -> u32 {
    3
}
fn default_user_agent() -> String {
    "msisdn-harvester/0.1 (number availability research)".to_string()
}
fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}
fn default_true() -> bool {
    true
}
fn default_prefixes() -> Vec<String> {
    vec!["555".to_string()]
}

/// The tariff tree as observed on the operator site. Parents 2 and 3 carry
/// one sub-item each; the flattened filter must come out as
/// `1,2,66,3,67,46,47,48,49`.
fn default_categories() -> Vec<CategoryDef> {
    fn cat(id: u32, name: &str, price: Option<&str>, items: Vec<CategoryDef>) -> CategoryDef {
        CategoryDef {
            id,
            name: name.to_string(),
            price: price.map(|p| p.to_string()),
            items,
        }
    }

    vec![
        cat(1, "standard", Some("0"), vec![]),
        cat(2, "bronze", None, vec![cat(66, "bronze", Some("1 000"), vec![])]),
        cat(3, "silver", None, vec![cat(67, "silver", Some("3 000"), vec![])]),
        cat(46, "gold", Some("10 000"), vec![]),
        cat(47, "platinum", Some("30 000"), vec![]),
        cat(48, "vip", Some("50 000"), vec![]),
        cat(49, "exclusive", Some("100 000"), vec![]),
    ]
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MEGA").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    /// Reject obviously broken inputs before any network traffic happens.
    pub fn validate(&self) -> Result<()> {
        for prefix in &self.prefixes {
            if prefix.len() != 3 || !prefix.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("prefix {:?} is not a 3-digit block", prefix);
            }
        }
        if self.search.page_size == 0 {
            anyhow::bail!("search.page_size must be positive");
        }
        if self.search.max_auth_attempts == 0 {
            anyhow::bail!("search.max_auth_attempts must be positive");
        }
        url::Url::parse(&self.search.base_url)
            .map_err(|e| anyhow::anyhow!("search.base_url: {}", e))?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig {
                base_url: default_base_url(),
                country_code: default_country_code(),
                page_size: default_page_size(),
                timeout_secs: default_timeout_secs(),
                page_delay_ms: default_page_delay_ms(),
                jitter_ms: 0,
                error_backoff_ms: default_error_backoff_ms(),
                auth_retry_delay_ms: default_auth_retry_delay_ms(),
                max_auth_attempts: default_max_auth_attempts(),
                use_session: true,
                user_agent: default_user_agent(),
            },
            output: OutputConfig {
                dir: default_out_dir(),
            },
            prefixes: default_prefixes(),
            categories: default_categories(),
        }
    }
}
