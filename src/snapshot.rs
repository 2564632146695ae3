//! The persisted citation snapshot (`_data/citations.yml`).
//!
//! Loading is lenient: a missing, empty or corrupt file yields an empty
//! baseline, and a single bad entry only costs that entry. Saving goes through a temp file and an atomic rename, and
//! a lock file keeps overlapping runs from clobbering each other.

use crate::error::{CitationError, Result};
use crate::source::{Publication, UNKNOWN_TITLE, UNKNOWN_YEAR};
use chrono::Local;
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Timestamp format of `metadata.last_updated`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Locks older than this are considered abandoned whoever holds them
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Publication id to record, in insertion order
pub type Papers = IndexMap<String, PaperRecord>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub scholar_userid: String,
}

impl Metadata {
    /// Metadata stamped with the current local time
    pub fn now(author_id: &str) -> Self {
        Self {
            last_updated: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            scholar_userid: author_id.to_string(),
        }
    }
}

/// Cached facts for one publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    #[serde(default = "unknown_title")]
    pub title: String,
    #[serde(default = "unknown_year", deserialize_with = "year_from_yaml")]
    pub year: String,
    #[serde(default)]
    pub citations: u64,
}

impl From<Publication> for PaperRecord {
    fn from(p: Publication) -> Self {
        Self {
            title: p.title,
            year: p.year,
            citations: p.citations,
        }
    }
}

fn unknown_title() -> String {
    UNKNOWN_TITLE.to_string()
}

fn unknown_year() -> String {
    UNKNOWN_YEAR.to_string()
}

/// Accept years written as YAML integers as well as strings
fn year_from_yaml<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(unknown_year()),
        other => Err(D::Error::custom(format!("invalid year: {:?}", other))),
    }
}

/// `papers: null` reads as an empty map
fn papers_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Papers, D::Error> {
    Ok(Option::<Papers>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, deserialize_with = "papers_or_empty")]
    pub papers: Papers,
}

impl Snapshot {
    pub fn new(metadata: Metadata, papers: Papers) -> Self {
        Self { metadata, papers }
    }

    /// Insert or overwrite a paper, returning the previous record
    pub fn upsert(&mut self, publication: Publication) -> Option<PaperRecord> {
        let id = publication.id.clone();
        self.papers.insert(id, publication.into())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The `papers` section alone, as it is written to disk
    pub fn papers_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.papers)?)
    }
}

/// How the baseline was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineSource {
    Missing,
    Loaded,
    /// Some entries were unreadable and left out; the file was copied to
    /// `backup` when possible
    Partial { skipped: usize, backup: Option<PathBuf> },
    /// Unparseable; the original was copied to `backup` when possible
    Corrupt { backup: Option<PathBuf> },
}

/// The `papers` section read entry by entry; `metadata` is not needed
/// for a baseline
#[derive(Debug, Deserialize)]
struct StoredPapers {
    #[serde(default)]
    papers: Option<IndexMap<String, serde_yaml::Value>>,
}

/// File-backed snapshot storage
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        sibling(&self.path, ".lock")
    }

    fn directory(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Load the papers of the existing snapshot as a merge baseline.
    ///
    /// Never fails: an unreadable file becomes an empty baseline and an
    /// unreadable entry is dropped on its own.
    pub fn load_baseline(&self) -> (Papers, BaselineSource) {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No existing snapshot");
            return (Papers::new(), BaselineSource::Missing);
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read existing citation data");
                return (Papers::new(), BaselineSource::Corrupt { backup: self.quarantine() });
            }
        };

        if content.trim().is_empty() {
            return (Papers::new(), BaselineSource::Loaded);
        }

        let stored = match serde_yaml::from_str::<StoredPapers>(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not parse existing citation data");
                return (Papers::new(), BaselineSource::Corrupt { backup: self.quarantine() });
            }
        };

        let mut papers = Papers::new();
        let mut skipped = 0;
        for (id, value) in stored.papers.unwrap_or_default() {
            match serde_yaml::from_value::<PaperRecord>(value) {
                Ok(record) => {
                    papers.insert(id, record);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Dropping unreadable snapshot entry");
                    skipped += 1;
                }
            }
        }

        info!(papers = papers.len(), skipped, "Loaded existing citation data");
        if skipped == 0 {
            return (papers, BaselineSource::Loaded);
        }
        (
            papers,
            BaselineSource::Partial {
                skipped,
                backup: self.quarantine(),
            },
        )
    }

    /// Copy an unreadable snapshot aside so the next save cannot destroy it
    fn quarantine(&self) -> Option<PathBuf> {
        let suffix = format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S"));
        let backup = sibling(&self.path, &suffix);
        match std::fs::copy(&self.path, &backup) {
            Ok(_) => {
                warn!(backup = %backup.display(), "Kept a copy of the unreadable snapshot");
                Some(backup)
            }
            Err(e) => {
                warn!(error = %e, "Could not back up unreadable snapshot");
                None
            }
        }
    }

    /// Write the snapshot through a temp file and atomic rename
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = self.directory();
        std::fs::create_dir_all(&dir)?;

        let yaml = snapshot.to_yaml()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(path = %self.path.display(), papers = snapshot.papers.len(), "Citation data saved");
        Ok(())
    }

    /// Take the advisory lock for this snapshot.
    ///
    /// A lock left behind by a dead process, or older than
    /// [`STALE_LOCK_AGE`], is taken over.
    ///
    /// # Errors
    ///
    /// [`CitationError::Locked`] when a live run holds the lock.
    pub fn lock(&self) -> Result<SnapshotLock> {
        std::fs::create_dir_all(self.directory())?;
        let path = self.lock_path();

        let mut took_over = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    debug!(lock = %path.display(), "Acquired snapshot lock");
                    return Ok(SnapshotLock { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if took_over || !lock_is_stale(&path) {
                        return Err(CitationError::Locked(path.display().to_string()));
                    }
                    warn!(lock = %path.display(), "Removing stale snapshot lock");
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(CitationError::Io(e)),
                    }
                    took_over = true;
                }
                Err(e) => return Err(CitationError::Io(e)),
            }
        }
    }
}

/// Whether the lock at `path` was left behind by a run that is gone
fn lock_is_stale(path: &Path) -> bool {
    let age = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok());
    if age.is_some_and(|a| a > STALE_LOCK_AGE) {
        return true;
    }

    let holder = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    match holder {
        Some(pid) => !is_process_alive(pid),
        // Unreadable or half-written; only trust it while it is fresh
        None => age.is_none(),
    }
}

fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs the permission and existence check only
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        // Assume alive if we can't check; the age bound still applies
        true
    }
}

/// Removes the lock file when dropped
#[derive(Debug)]
pub struct SnapshotLock {
    path: PathBuf,
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release snapshot lock");
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
