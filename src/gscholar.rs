//! Google Scholar author profile scraping.
//!
//! Fetches `/citations?user=...` pages over a [`Session`] and turns the
//! publication table into an [`AuthorRecord`].

use crate::error::{CitationError, OptionExt, Result};
use crate::source::{AuthorRecord, Bib, RawPublication, ScholarSource};
use crate::transport::Session;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Rows requested per profile page (Scholar's maximum)
pub const PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched for one profile
const MAX_PAGES: usize = 50;

/// One parsed profile page
#[derive(Debug, Clone, Default)]
pub struct ProfilePage {
    pub author_name: Option<String>,
    pub publications: Vec<RawPublication>,
}

/// Scrapes author profiles through a pre-built session
pub struct ProfileScraper {
    session: Session,
}

impl ProfileScraper {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl ScholarSource for ProfileScraper {
    async fn fetch_author(&self, author_id: &str) -> Result<AuthorRecord> {
        info!(author = author_id, mode = ?self.session.mode(), "Fetching author profile");

        let mut record = AuthorRecord {
            author_id: author_id.to_string(),
            ..Default::default()
        };

        for page in 0..MAX_PAGES {
            if page > 0 {
                // Add random delay to avoid detection
                let delay = rand::random::<u64>() % 1500 + 500;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let url = build_profile_url(self.session.base_url(), author_id, page * PAGE_SIZE)?;
            debug!(page, url = %url, "Fetching profile page");

            let html = self.session.fetch_html(&url).await?;
            let parsed = parse_profile_page(&html, self.session.base_url())?;

            if page == 0 {
                record.name = Some(parsed.author_name.ok_or_parse("Author profile not found")?);
            }

            let count = parsed.publications.len();
            debug!(page, count, "Parsed profile page");
            record.publications.extend(parsed.publications);

            if count < PAGE_SIZE {
                break;
            }
        }

        info!(
            author = author_id,
            publications = record.publications.len(),
            "Author profile fetched"
        );
        Ok(record)
    }
}

/// Build the profile URL for one page of publications
fn build_profile_url(base_url: &str, author_id: &str, start: usize) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/citations", base_url))
        .map_err(|e| CitationError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("user", author_id)
        .append_pair("hl", "en") // Force English locale for consistent parsing
        .append_pair("cstart", &start.to_string())
        .append_pair("pagesize", &PAGE_SIZE.to_string());

    Ok(url)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CitationError::Parse(e.to_string()))
}

fn element_text(elem: ElementRef<'_>) -> String {
    elem.text().collect::<String>().trim().to_string()
}

/// Parse one Google Scholar profile page.
///
/// # Errors
///
/// Returns [`CitationError::Captcha`] when Scholar served a block page.
pub fn parse_profile_page(html: &str, base_url: &str) -> Result<ProfilePage> {
    if html.contains("gs_captcha") || html.contains("unusual traffic") || html.contains("Solving the above CAPTCHA") {
        warn!("CAPTCHA detected");
        return Err(CitationError::Captcha);
    }

    let document = Html::parse_document(html);

    let name_selector = selector("#gsc_prf_in")?;
    let row_selector = selector("tr.gsc_a_tr")?;
    let title_selector = selector("a.gsc_a_at")?;
    let cites_selector = selector("td.gsc_a_c a.gsc_a_ac")?;
    let year_selector = selector("td.gsc_a_y span")?;

    let year_regex = Regex::new(r"\b(1[89]|20)\d{2}\b").map_err(|e| CitationError::Parse(e.to_string()))?;
    let count_regex = Regex::new(r"\d+").map_err(|e| CitationError::Parse(e.to_string()))?;

    let base = Url::parse(base_url).map_err(|e| CitationError::Config(format!("Invalid base URL: {}", e)))?;

    let author_name = document
        .select(&name_selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty());

    let mut publications = Vec::new();

    for row in document.select(&row_selector) {
        let mut publication = RawPublication::default();
        let mut bib = Bib::default();

        if let Some(link) = row.select(&title_selector).next() {
            let title = element_text(link);
            if !title.is_empty() {
                bib.title = Some(title);
            }
            let href = link
                .value()
                .attr("data-href")
                .or_else(|| link.value().attr("href"))
                .unwrap_or("");
            publication.author_pub_id = citation_for_view(&base, href);
        }

        if let Some(year) = row.select(&year_selector).next() {
            let text = element_text(year);
            bib.pub_year = year_regex.find(&text).map(|m| m.as_str().to_string());
        }

        if let Some(cites) = row.select(&cites_selector).next() {
            let text = element_text(cites);
            publication.num_citations = count_regex
                .find(&text)
                .and_then(|m| m.as_str().parse::<u64>().ok());
        }

        publication.bib = Some(bib);
        publications.push(publication);
    }

    Ok(ProfilePage {
        author_name,
        publications,
    })
}

/// Pull the `citation_for_view` parameter (`USER:PUBID`) out of a link
fn citation_for_view(base: &Url, href: &str) -> Option<String> {
    if href.is_empty() {
        return None;
    }
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "citation_for_view")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
