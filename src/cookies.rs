//! Browser cookies replayed on Scholar requests.
//!
//! Scholar is much less eager to serve a CAPTCHA to a session a real
//! browser has already cleared. A cookie list exported from the browser
//! (DevTools or Playwright JSON) is imported once into the jar and sent
//! with every request afterwards.

use crate::error::{CitationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Jar file name in the home directory
pub const JAR_FILE_NAME: &str = ".scholar_citations_cookies.json";

/// One exported browser cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    /// Unix seconds; absent or non-positive for session cookies
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
}

impl Cookie {
    /// Set for any Google host (`.google.com`, `scholar.google.co.uk`, ...)
    pub fn is_google(&self) -> bool {
        self.domain
            .trim_start_matches('.')
            .split('.')
            .any(|label| label.eq_ignore_ascii_case("google"))
    }

    pub fn is_expired(&self, now: f64) -> bool {
        matches!(self.expires, Some(t) if t > 0.0 && t <= now)
    }
}

/// The JSON file holding the imported cookies
#[derive(Debug, Clone)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The jar at `path`, or `~/.scholar_citations_cookies.json`
    pub fn locate(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Ok(Self::at(path));
        }
        dirs::home_dir()
            .map(|home| Self::at(home.join(JAR_FILE_NAME)))
            .ok_or_else(|| CitationError::Config("Cannot determine home directory for the cookie jar".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Cookie>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Cookies worth sending to Scholar: Google hosts, not yet expired.
    ///
    /// A missing or unreadable jar yields no cookies.
    pub fn scholar_cookies(&self) -> Vec<Cookie> {
        let stored = match self.read() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(jar = %self.path.display(), error = %e, "Ignoring unreadable cookie jar");
                return Vec::new();
            }
        };

        let now = chrono::Utc::now().timestamp() as f64;
        let total = stored.len();
        let usable: Vec<Cookie> = stored
            .into_iter()
            .filter(|c| c.is_google() && !c.is_expired(now))
            .collect();

        debug!(
            jar = %self.path.display(),
            stored = total,
            usable = usable.len(),
            "Read cookie jar"
        );
        usable
    }

    /// `Cookie` header for Scholar requests, empty when there is nothing to send
    pub fn header_value(&self) -> String {
        self.scholar_cookies()
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Replace the jar with the Google cookies of a browser export.
    ///
    /// Returns how many cookies were kept.
    ///
    /// # Errors
    ///
    /// Fails when the export is not a JSON cookie list or holds no live
    /// Google cookie; the jar is left untouched then.
    pub fn import(&self, export: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(export)?;
        let cookies: Vec<Cookie> = serde_json::from_str(&content)?;

        let now = chrono::Utc::now().timestamp() as f64;
        let offered = cookies.len();
        let kept: Vec<Cookie> = cookies
            .into_iter()
            .filter(|c| c.is_google() && !c.is_expired(now))
            .collect();

        if kept.is_empty() {
            return Err(CitationError::Config(format!(
                "{} holds no unexpired Google cookies",
                export.display()
            )));
        }

        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&kept)?)?;

        info!(
            jar = %self.path.display(),
            kept = kept.len(),
            dropped = offered - kept.len(),
            "Imported browser cookies"
        );
        Ok(kept.len())
    }

    /// Delete the jar; returns whether there was one
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(jar = %self.path.display(), "Removed cookie jar");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXPORT: &str = r#"[
        {"name": "NID", "value": "n1", "domain": ".google.com", "path": "/", "httpOnly": true},
        {"name": "GSP", "value": "g1", "domain": "scholar.google.co.uk", "expirationDate": 4102444800.0},
        {"name": "old", "value": "x", "domain": ".google.com", "expires": 1000.0},
        {"name": "track", "value": "t", "domain": ".example.com"}
    ]"#;

    #[test]
    fn test_missing_jar_sends_nothing() {
        let jar = CookieJar::at("/nonexistent/cookies.json");
        assert!(jar.scholar_cookies().is_empty());
        assert_eq!(jar.header_value(), "");
    }

    #[test]
    fn test_explicit_path_wins() -> Result<()> {
        let jar = CookieJar::locate(Some(Path::new("/tmp/jar.json")))?;
        assert_eq!(jar.path(), Path::new("/tmp/jar.json"));
        Ok(())
    }

    #[test]
    fn test_import_keeps_live_google_cookies() -> Result<()> {
        let dir = TempDir::new()?;
        let export = dir.path().join("export.json");
        std::fs::write(&export, EXPORT)?;
        let jar = CookieJar::at(dir.path().join("jar").join("cookies.json"));

        assert_eq!(jar.import(&export)?, 2);
        assert_eq!(jar.header_value(), "NID=n1; GSP=g1");
        assert!(jar.scholar_cookies()[0].http_only);

        assert!(jar.clear()?);
        assert!(!jar.clear()?);
        assert_eq!(jar.header_value(), "");
        Ok(())
    }

    #[test]
    fn test_import_without_google_cookies_leaves_jar_alone() -> Result<()> {
        let dir = TempDir::new()?;
        let jar = CookieJar::at(dir.path().join("cookies.json"));
        std::fs::write(jar.path(), r#"[{"name":"NID","value":"keep","domain":".google.com"}]"#)?;

        let export = dir.path().join("export.json");
        std::fs::write(&export, r#"[{"name":"a","value":"b","domain":"example.org"}]"#)?;
        assert!(matches!(jar.import(&export), Err(CitationError::Config(_))));

        std::fs::write(&export, "not json")?;
        assert!(matches!(jar.import(&export), Err(CitationError::Json(_))));

        assert_eq!(jar.header_value(), "NID=keep");
        Ok(())
    }

    #[test]
    fn test_expired_cookies_are_not_sent() -> Result<()> {
        let dir = TempDir::new()?;
        let jar = CookieJar::at(dir.path().join("cookies.json"));
        std::fs::write(
            jar.path(),
            r#"[{"name":"old","value":"x","domain":".google.com","expires":1000.0},
                {"name":"session","value":"s","domain":".google.com","expires":-1.0}]"#,
        )?;
        assert_eq!(jar.header_value(), "session=s");
        Ok(())
    }

    #[test]
    fn test_unreadable_jar_sends_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let jar = CookieJar::at(dir.path().join("cookies.json"));
        std::fs::write(jar.path(), "{ broken")?;
        assert!(jar.scholar_cookies().is_empty());
        Ok(())
    }
}
