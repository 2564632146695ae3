//! Single-publication citation lookup.

use crate::source::ScholarSource;
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of one lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(u64),
    NotFound,
    Error(String),
}

impl Lookup {
    /// Citation count, with 0 standing in for "not found" and errors
    pub fn citations(&self) -> u64 {
        match self {
            Self::Found(n) => *n,
            Self::NotFound | Self::Error(_) => 0,
        }
    }
}

/// The JSON object printed by `scholar-citations fetch`
#[derive(Debug, Serialize)]
pub struct CitationOutput {
    pub citations: u64,
}

impl From<&Lookup> for CitationOutput {
    fn from(lookup: &Lookup) -> Self {
        Self {
            citations: lookup.citations(),
        }
    }
}

pub struct Fetcher<S> {
    source: S,
}

impl<S: ScholarSource> Fetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Look up the citation count of one publication. Single attempt.
    pub async fn fetch(&self, author_id: &str, publication_id: &str) -> Lookup {
        let author = match self.source.fetch_author(author_id).await {
            Ok(a) => a,
            Err(e) => {
                error!(author = author_id, error = %e, "Error fetching citation count");
                return Lookup::Error(e.to_string());
            }
        };

        match author.publications.iter().find(|p| p.matches(publication_id)) {
            Some(publication) => {
                let count = publication.num_citations.unwrap_or(0);
                info!(publication = publication_id, citations = count, "Found publication");
                Lookup::Found(count)
            }
            None => {
                warn!(
                    author = author_id,
                    publication = publication_id,
                    "Publication not found for author"
                );
                Lookup::NotFound
            }
        }
    }
}
