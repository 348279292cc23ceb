//! Grounding source merge
//!
//! Sources reported across one or two requests are keyed by a brand label
//! derived from the URL host, so "www.bbc.co.uk/news/a" and
//! "bbc.co.uk/sport/b" count once.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use voice_turn_core::GroundingSource;

/// Most citations rendered for one turn
pub const MAX_SOURCES: usize = 5;

/// Hosts that only redirect to the real source
const REDIRECT_HOSTS: &[&str] = &["vertexaisearch.cloud.google.com", "google.com"];

/// Second-level labels that sit under a country code ("co.uk", "com.au")
const SECOND_LEVEL: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

/// A rendered citation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    label: String,
    url: String,
    redirect: bool,
}

/// Ordered, de-duplicated grounding sources for one turn
#[derive(Debug, Clone, Default)]
pub struct GroundingSet {
    entries: Vec<Entry>,
}

impl GroundingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source; a direct URL replaces a redirect for the same brand
    pub fn add(&mut self, source: &GroundingSource) {
        let Some((label, redirect)) = brand_for(source) else {
            tracing::debug!(url = %source.url, "Dropping grounding source without a usable host");
            return;
        };
        let key = label.to_lowercase();

        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) if existing.redirect && !redirect => {
                existing.url = source.url.clone();
                existing.redirect = false;
            }
            Some(_) => {}
            None => self.entries.push(Entry {
                key,
                label,
                url: source.url.clone(),
                redirect,
            }),
        }
    }

    pub fn extend<'a>(&mut self, sources: impl IntoIterator<Item = &'a GroundingSource>) {
        for source in sources {
            self.add(source);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Citations in first-seen order, capped at `MAX_SOURCES`
    pub fn citations(&self) -> Vec<Citation> {
        self.entries
            .iter()
            .take(MAX_SOURCES)
            .map(|e| Citation {
                label: e.label.clone(),
                url: e.url.clone(),
            })
            .collect()
    }
}

/// Brand label and whether the URL is a redirect
fn brand_for(source: &GroundingSource) -> Option<(String, bool)> {
    let url = Url::parse(&source.url).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if REDIRECT_HOSTS.contains(&host.as_str()) {
        let title = source.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let label = match title {
            Some(t) if t.contains('.') && !t.contains(' ') => brand_from_host(t),
            Some(t) => t.to_string(),
            None => brand_from_host(&host),
        };
        return Some((label, true));
    }

    Some((brand_from_host(&host), false))
}

/// "news.bbc.co.uk" → "Bbc", "www.cdc.gov" → "CDC"
pub fn brand_from_host(host: &str) -> String {
    let host = host.trim().trim_start_matches("www.").to_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();

    match labels.as_slice() {
        [] => String::new(),
        [only] => capitalize(only),
        [.., name, "gov"] => name.to_uppercase(),
        [.., name, second, tld] if tld.len() == 2 && SECOND_LEVEL.contains(second) => {
            capitalize(name)
        }
        [.., name, _tld] => capitalize(name),
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_from_host() {
        assert_eq!(brand_from_host("www.reuters.com"), "Reuters");
        assert_eq!(brand_from_host("news.bbc.co.uk"), "Bbc");
        assert_eq!(brand_from_host("www.abc.net.au"), "Abc");
        assert_eq!(brand_from_host("www.cdc.gov"), "CDC");
        assert_eq!(brand_from_host("data.nasa.gov"), "NASA");
        assert_eq!(brand_from_host("localhost"), "Localhost");
    }

    #[test]
    fn test_dedupe_by_brand() {
        let mut set = GroundingSet::new();
        set.add(&GroundingSource::new("https://www.bbc.co.uk/news/a"));
        set.add(&GroundingSource::new("https://bbc.co.uk/sport/b"));
        set.add(&GroundingSource::new("https://en.wikipedia.org/wiki/Obama"));

        let citations = set.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url, "https://www.bbc.co.uk/news/a");
        assert_eq!(citations[1].label, "Wikipedia");
    }

    #[test]
    fn test_direct_url_replaces_redirect() {
        let mut set = GroundingSet::new();
        set.add(
            &GroundingSource::new("https://vertexaisearch.cloud.google.com/grounding-api-redirect/xyz")
                .with_title("reuters.com"),
        );
        set.add(&GroundingSource::new("https://www.reuters.com/world/story"));

        let citations = set.citations();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].label, "Reuters");
        assert_eq!(citations[0].url, "https://www.reuters.com/world/story");
    }

    #[test]
    fn test_redirect_does_not_replace_direct() {
        let mut set = GroundingSet::new();
        set.add(&GroundingSource::new("https://www.reuters.com/a"));
        set.add(
            &GroundingSource::new("https://vertexaisearch.cloud.google.com/r/1").with_title("Reuters"),
        );
        assert_eq!(set.citations()[0].url, "https://www.reuters.com/a");
    }

    #[test]
    fn test_capped_and_invalid_skipped() {
        let mut set = GroundingSet::new();
        set.add(&GroundingSource::new("not a url"));
        for site in ["a", "b", "c", "d", "e", "f", "g"] {
            set.add(&GroundingSource::new(format!("https://{}.com/", site)));
        }
        assert_eq!(set.len(), 7);
        assert_eq!(set.citations().len(), MAX_SOURCES);
    }
}
