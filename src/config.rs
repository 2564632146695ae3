//! Author identifier discovery.
//!
//! The Scholar user id lives in the Jekyll site files. Lookup is an
//! explicit, ordered list of [`ResolutionRule`]s: the first rule whose
//! key path yields a non-empty string wins.

use crate::error::{CitationError, Result};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Socials data file, relative to the site root
pub const SOCIALS_FILE: &str = "_data/socials.yml";

/// General Jekyll config, relative to the site root
pub const CONFIG_FILE: &str = "_config.yml";

/// Snapshot output, relative to the site root
pub const OUTPUT_FILE: &str = "_data/citations.yml";

/// A document that may carry the author identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    /// `_data/socials.yml`
    Socials,
    /// `_config.yml`
    SiteConfig,
}

impl ConfigSource {
    fn relative_path(self) -> &'static str {
        match self {
            Self::Socials => SOCIALS_FILE,
            Self::SiteConfig => CONFIG_FILE,
        }
    }
}

/// One (source, key path) pair tried during resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolutionRule {
    pub source: ConfigSource,
    pub key_path: &'static [&'static str],
}

impl ResolutionRule {
    const fn new(source: ConfigSource, key_path: &'static [&'static str]) -> Self {
        Self { source, key_path }
    }

    /// Walk the key path through nested mappings
    fn lookup<'a>(&self, doc: &'a Value) -> Option<&'a str> {
        let mut node = doc;
        for key in self.key_path {
            node = node.as_mapping()?.get(*key)?;
        }
        node.as_str().map(str::trim).filter(|s| !s.is_empty())
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.source.relative_path(), self.key_path.join("."))
    }
}

/// Rules in priority order
pub const DEFAULT_RULES: &[ResolutionRule] = &[
    ResolutionRule::new(ConfigSource::Socials, &["scholar_userid"]),
    ResolutionRule::new(ConfigSource::SiteConfig, &["socials", "scholar_userid"]),
    ResolutionRule::new(ConfigSource::SiteConfig, &["socials", "google_scholar_id"]),
    ResolutionRule::new(ConfigSource::SiteConfig, &["scholar", "scholar_userid"]),
    ResolutionRule::new(ConfigSource::SiteConfig, &["scholar", "google_scholar_id"]),
    ResolutionRule::new(ConfigSource::SiteConfig, &["scholar_userid"]),
    ResolutionRule::new(ConfigSource::SiteConfig, &["google_scholar_id"]),
];

/// Paths of a Jekyll site the tool reads and writes
#[derive(Debug, Clone)]
pub struct SiteLayout {
    root: PathBuf,
    output: Option<PathBuf>,
}

impl SiteLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            output: None,
        }
    }

    /// Override the snapshot location
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self, source: ConfigSource) -> PathBuf {
        self.root.join(source.relative_path())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.root.join(OUTPUT_FILE))
    }

    /// Resolve the author identifier using [`DEFAULT_RULES`]
    pub fn resolve_author_id(&self) -> Result<String> {
        resolve_author_id(self, DEFAULT_RULES)
    }
}

/// Evaluate `rules` in order against the site files.
///
/// Each source is read at most once. A missing or unparseable source is
/// logged and its rules are skipped.
///
/// # Errors
///
/// Returns [`CitationError::Config`] when no rule matches.
pub fn resolve_author_id(site: &SiteLayout, rules: &[ResolutionRule]) -> Result<String> {
    let mut documents: HashMap<ConfigSource, Option<Value>> = HashMap::new();

    for rule in rules {
        let doc = documents
            .entry(rule.source)
            .or_insert_with(|| load_document(&site.source_path(rule.source)));

        let Some(doc) = doc else {
            continue;
        };

        if let Some(id) = rule.lookup(doc) {
            info!(rule = %rule.describe(), author = id, "Found Google Scholar ID");
            return Ok(id.to_string());
        }
        debug!(rule = %rule.describe(), "No author id for rule");
    }

    Err(CitationError::Config(format!(
        "Google Scholar ID not found in {} or {}; add 'scholar_userid: YOUR_ID' to {}",
        SOCIALS_FILE, CONFIG_FILE, SOCIALS_FILE
    )))
}

fn load_document(path: &Path) -> Option<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read config source");
            return None;
        }
    };

    match serde_yaml::from_str::<Value>(&content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not parse config source");
            None
        }
    }
}
