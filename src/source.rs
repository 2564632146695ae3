//! Author records as returned by a citation source.
//!
//! Every field coming off the wire is optional. [`RawPublication::normalize`]
//! is the single place where defaults are applied and malformed entries
//! are rejected, before anything reaches the merge step.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Title used when a publication has none
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Year used when a publication has none
pub const UNKNOWN_YEAR: &str = "Unknown Year";

/// Something that can return an author's full publication list.
#[allow(async_fn_in_trait)]
pub trait ScholarSource {
    /// Fetch the author and all of their publications.
    async fn fetch_author(&self, author_id: &str) -> Result<AuthorRecord>;
}

/// An author profile with its publications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub author_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub publications: Vec<RawPublication>,
}

/// Bibliographic fields nested under a publication
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bib {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pub_year: Option<String>,
}

/// A publication exactly as the source reported it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPublication {
    #[serde(default)]
    pub pub_id: Option<String>,
    #[serde(default)]
    pub author_pub_id: Option<String>,
    #[serde(default)]
    pub bib: Option<Bib>,
    #[serde(default)]
    pub num_citations: Option<u64>,
}

/// A publication with identifier resolved and sentinels applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub id: String,
    pub title: String,
    pub year: String,
    pub citations: u64,
}

/// Why a raw publication was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    /// Neither `pub_id` nor `author_pub_id` is set
    #[error("No ID found for publication: {title}")]
    MissingId { title: String },
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl RawPublication {
    /// Identifier to key the snapshot by: `pub_id`, else `author_pub_id`
    pub fn stable_id(&self) -> Option<&str> {
        non_empty(self.pub_id.as_ref()).or_else(|| non_empty(self.author_pub_id.as_ref()))
    }

    /// Whether `id` names this publication under either identifier
    pub fn matches(&self, id: &str) -> bool {
        non_empty(self.author_pub_id.as_ref()) == Some(id) || non_empty(self.pub_id.as_ref()) == Some(id)
    }

    pub fn title(&self) -> Option<&str> {
        self.bib.as_ref().and_then(|b| non_empty(b.title.as_ref()))
    }

    pub fn normalize(&self) -> std::result::Result<Publication, Rejected> {
        let id = self.stable_id().ok_or_else(|| Rejected::MissingId {
            title: self.title().unwrap_or("Unknown").to_string(),
        })?;

        let year = self
            .bib
            .as_ref()
            .and_then(|b| non_empty(b.pub_year.as_ref()))
            .unwrap_or(UNKNOWN_YEAR);

        Ok(Publication {
            id: id.to_string(),
            title: self.title().unwrap_or(UNKNOWN_TITLE).to_string(),
            year: year.to_string(),
            citations: self.num_citations.unwrap_or(0),
        })
    }
}
