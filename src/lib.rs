//! # scholar-citations
//!
//! Keeps a Jekyll site's `_data/citations.yml` in sync with Google Scholar.
//!
//! ## Modules
//!
//! - [`reconciler`] - Merge a fresh profile fetch into the persisted snapshot
//! - [`fetcher`] - One-off citation lookup for a single publication
//! - [`gscholar`] - Google Scholar profile scraping
//! - [`transport`] - HTTP session construction with proxy fallback
//! - [`snapshot`] - Snapshot model and file storage
//! - [`config`] - Author id discovery in the site files
//! - [`cookies`] - Browser cookie jar replayed on requests
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scholar_citations::{config::SiteLayout, gscholar::ProfileScraper};
//! use scholar_citations::{reconciler::Reconciler, snapshot::SnapshotStore, transport};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let site = SiteLayout::new(".");
//!     let session = transport::establish(&Default::default()).await?;
//!     let reconciler = Reconciler::new(
//!         ProfileScraper::new(session),
//!         SnapshotStore::new(site.snapshot_path()),
//!     );
//!     let outcome = reconciler.run(&site).await?;
//!     println!("{} papers", outcome.snapshot.papers.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod error;
pub mod fetcher;
pub mod gscholar;
pub mod reconciler;
pub mod retry;
pub mod snapshot;
pub mod source;
pub mod transport;

pub use error::{CitationError, Result};
