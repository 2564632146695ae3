//! HTTP session construction.
//!
//! Google Scholar blocks automated traffic aggressively, so a session is
//! built by trying proxy strategies in order. When all of them fail the
//! session falls back to direct access and records that it is degraded.

use crate::cookies::CookieJar;
use crate::error::{CitationError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Local Tor daemon SOCKS endpoint
pub const TOR_SOCKS_PROXY: &str = "socks5h://127.0.0.1:9050";

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const SUPPORTED_PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// A proxy to try while building a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStrategy {
    pub name: String,
    pub url: String,
}

impl ProxyStrategy {
    pub fn explicit(url: impl Into<String>) -> Self {
        Self {
            name: "proxy".to_string(),
            url: url.into(),
        }
    }

    pub fn tor() -> Self {
        Self {
            name: "tor".to_string(),
            url: TOR_SOCKS_PROXY.to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.url).map_err(|e| {
            CitationError::Config(format!("Invalid proxy URL '{}': {}", self.url, e))
        })?;
        if !SUPPORTED_PROXY_SCHEMES.contains(&parsed.scheme()) {
            return Err(CitationError::Config(format!(
                "Unsupported proxy scheme '{}' in '{}'",
                parsed.scheme(),
                self.url
            )));
        }
        Ok(())
    }
}

/// Options for [`establish`]
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Strategies tried in order before falling back to direct access
    pub strategies: Vec<ProxyStrategy>,
    /// Custom base URL for mirror sites
    pub base_url: Option<String>,
    /// Probe each proxy with a request to the base URL before accepting it
    pub probe: bool,
    /// Cookie jar to replay; `None` uses the jar in the home directory
    pub cookie_file: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            base_url: None,
            probe: true,
            cookie_file: None,
        }
    }
}

/// How a session reaches Google Scholar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// Through the named strategy
    Proxied { strategy: String },
    /// Directly; `degraded` is set when proxies were configured but none worked
    Direct { degraded: bool },
}

/// A ready-to-use HTTP client plus the mode it was built with
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
    mode: SessionMode,
    base_url: String,
    cookie_header: String,
}

impl Session {
    pub fn mode(&self) -> &SessionMode {
        &self.mode
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, SessionMode::Direct { degraded: true })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch an HTML page, mapping throttling and error statuses
    pub async fn fetch_html(&self, url: &Url) -> Result<String> {
        let mut request = self
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache");

        if !self.cookie_header.is_empty() {
            request = request.header("Cookie", &self.cookie_header);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CitationError::RateLimited(60));
        }

        if !status.is_success() {
            return Err(CitationError::Http {
                status: status.as_u16(),
                message: format!("Google Scholar returned {}", status),
            });
        }

        Ok(response.text().await?)
    }
}

/// Build a session, trying each proxy strategy in order.
///
/// # Errors
///
/// Returns [`CitationError::Unavailable`] only when not even a direct
/// client can be constructed.
pub async fn establish(options: &TransportOptions) -> Result<Session> {
    let base_url = options
        .base_url
        .as_ref()
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_SCHOLAR_URL.to_string());

    let cookie_header = match CookieJar::locate(options.cookie_file.as_deref()) {
        Ok(jar) => jar.header_value(),
        Err(e) => {
            debug!(error = %e, "No cookie jar");
            String::new()
        }
    };
    if cookie_header.is_empty() {
        debug!("Sending requests without browser cookies");
    }

    for strategy in &options.strategies {
        match try_strategy(strategy, &base_url, options.probe).await {
            Ok(client) => {
                info!(strategy = %strategy.name, proxy = %strategy.url, "Using proxy");
                return Ok(Session {
                    client,
                    mode: SessionMode::Proxied {
                        strategy: strategy.name.clone(),
                    },
                    base_url,
                    cookie_header,
                });
            }
            Err(e) => {
                warn!(strategy = %strategy.name, proxy = %strategy.url, error = %e, "Proxy strategy failed");
            }
        }
    }

    let degraded = !options.strategies.is_empty();
    if degraded {
        warn!("Failed to set up proxy, continuing with direct access");
    }

    let client = client_builder()
        .build()
        .map_err(|e| CitationError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Session {
        client,
        mode: SessionMode::Direct { degraded },
        base_url,
        cookie_header,
    })
}

fn client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .cookie_store(true)
}

async fn try_strategy(strategy: &ProxyStrategy, base_url: &str, probe: bool) -> Result<reqwest::Client> {
    strategy.validate()?;

    let proxy = reqwest::Proxy::all(&strategy.url).map_err(|e| {
        CitationError::Config(format!("Invalid proxy URL '{}': {}", strategy.url, e))
    })?;
    let client = client_builder()
        .proxy(proxy)
        .build()
        .map_err(|e| CitationError::Config(format!("Failed to build HTTP client: {}", e)))?;

    if probe {
        let response = client.get(base_url).timeout(PROBE_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(CitationError::Http {
                status: response.status().as_u16(),
                message: "proxy probe rejected".to_string(),
            });
        }
    }

    Ok(client)
}
