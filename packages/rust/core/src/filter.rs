//! Keyword exclusion.

use tracing::{debug, info};

use leadscout_shared::ListingRecord;

/// Drops listings whose name contains a denylisted keyword, ignoring case.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    keywords: Vec<String>,
}

impl ExclusionFilter {
    pub fn new(keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut filter = Self::default();
        for keyword in keywords {
            filter.add_keyword(&keyword.into());
        }
        filter
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Add a keyword. Blank and already-present keywords are ignored.
    pub fn add_keyword(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim();
        if keyword.is_empty() || self.keywords.iter().any(|k| k == keyword) {
            return false;
        }
        self.keywords.push(keyword.to_string());
        true
    }

    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim();
        let before = self.keywords.len();
        self.keywords.retain(|k| k != keyword);
        before != self.keywords.len()
    }

    pub fn should_exclude(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.keywords
            .iter()
            .any(|k| name.contains(&k.to_lowercase()))
    }

    /// Split `records` into kept listings, in input order, and the excluded count.
    pub fn apply(&self, records: Vec<ListingRecord>) -> (Vec<ListingRecord>, usize) {
        let total = records.len();
        let kept: Vec<ListingRecord> = records
            .into_iter()
            .filter(|r| {
                let excluded = self.should_exclude(&r.name);
                if excluded {
                    debug!(name = %r.name, "excluded by keyword");
                }
                !excluded
            })
            .collect();
        let excluded = total - kept.len();
        if excluded > 0 {
            info!(excluded, kept = kept.len(), "exclusion filter applied");
        }
        (kept, excluded)
    }
}
