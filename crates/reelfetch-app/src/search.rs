//! Search result filtering.

use once_cell::sync::Lazy;
use regex::Regex;
use reelfetch_transfer_core::{SearchProvider, SearchResult};
use tracing::{debug, warn};

static QUALITY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(2160p|1080p|720p|brrip|webrip|bluray|web-dl|x264|x265|hevc)")
        .expect("quality token regex is valid")
});

/// Whether `title` carries a recognized resolution or encoding marker.
#[must_use]
pub fn has_quality_token(title: &str) -> bool {
    QUALITY_TOKEN.is_match(title)
}

/// Keep seeded results whose title carries a quality token, preserving order.
#[must_use]
pub fn filter_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|result| result.seed_count > 0 && has_quality_token(&result.title))
        .collect()
}

/// Query `provider` and filter the answer.
///
/// Provider failures are logged and yield an empty list.
pub async fn search_movies(provider: &dyn SearchProvider, query: &str) -> Vec<SearchResult> {
    match provider.search(query).await {
        Ok(results) => {
            let raw = results.len();
            let kept = filter_results(results);
            debug!(query, raw, kept = kept.len(), "search filtered");
            kept
        }
        Err(err) => {
            warn!(query, error = %err.describe(), "search failed");
            Vec::new()
        }
    }
}
