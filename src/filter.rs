// src/filter.rs
//! Subscriber filter criteria and the predicate that evaluates them.
//!
//! Every field of [`FilterSpec`] is optional; an absent field (or an empty
//! list) means "no constraint". [`matches`] is pure: the same item and spec
//! always give the same answer, and nothing outside the two arguments is read.

use serde::{Deserialize, Serialize};

use crate::item::Item;

pub const DEFAULT_COMMENTS_LIMIT: usize = 5;
pub const DEFAULT_MAX_COMMENTS_LIMIT: usize = 50;

fn default_include_nsfw() -> bool {
    true
}
fn default_comments_limit() -> usize {
    DEFAULT_COMMENTS_LIMIT
}
fn default_max_comments_limit() -> usize {
    DEFAULT_MAX_COMMENTS_LIMIT
}

/// Process-wide defaults applied to specs that leave a field unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefaults {
    /// Used when a spec does not say whether NSFW posts are wanted.
    #[serde(default = "default_include_nsfw")]
    pub include_nsfw: bool,
    #[serde(default = "default_comments_limit")]
    pub comments_limit: usize,
    /// Upper bound on what a single subscriber may request.
    #[serde(default = "default_max_comments_limit")]
    pub max_comments_limit: usize,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            include_nsfw: default_include_nsfw(),
            comments_limit: default_comments_limit(),
            max_comments_limit: default_max_comments_limit(),
        }
    }
}

/// Declarative matching criteria supplied by one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Allowed subreddits (case-insensitive).
    #[serde(default, rename = "subreddits")]
    pub source_buckets: Option<Vec<String>>,
    /// Any one of these must appear in title or body (case-insensitive).
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub min_score: Option<i64>,
    /// `Some(false)` excludes NSFW posts.
    #[serde(default)]
    pub include_nsfw: Option<bool>,
    /// `Some(true)` only text posts, `Some(false)` only link posts.
    #[serde(default)]
    pub is_self: Option<bool>,
    /// Allowed flairs (case-insensitive).
    #[serde(default, rename = "flair")]
    pub category_tags: Option<Vec<String>>,
    #[serde(default)]
    pub fetch_comments: bool,
    #[serde(default)]
    pub comments_limit: Option<usize>,
    #[serde(default)]
    pub opt_out_of_persistence: bool,
}

impl FilterSpec {
    /// Fill unset fields from `defaults`, clamp the comment limit and drop
    /// blank list entries. Done once, when a subscriber or query is accepted.
    pub fn resolve(mut self, defaults: &FilterDefaults) -> Self {
        self.include_nsfw = Some(self.include_nsfw.unwrap_or(defaults.include_nsfw));
        let limit = self.comments_limit.unwrap_or(defaults.comments_limit);
        self.comments_limit = Some(limit.min(defaults.max_comments_limit));
        self.source_buckets = self.source_buckets.map(clean_list);
        self.keywords = self.keywords.map(clean_list);
        self.category_tags = self.category_tags.map(clean_list);
        self
    }

    pub fn comments_limit(&self) -> usize {
        self.comments_limit.unwrap_or(DEFAULT_COMMENTS_LIMIT)
    }

    /// True when matched items should carry comments for this subscriber.
    pub fn wants_comments(&self) -> bool {
        self.fetch_comments && self.comments_limit() > 0
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Non-empty list or `None`; an empty list means "no constraint".
fn constraint(list: &Option<Vec<String>>) -> Option<&[String]> {
    list.as_deref().filter(|l| !l.is_empty())
}

fn contains_ignore_case(allowed: &[String], value: &str) -> bool {
    let value = value.to_lowercase();
    allowed.iter().any(|a| a.to_lowercase() == value)
}

/// Evaluate `item` against `spec`.
///
/// Checks run cheapest-first and stop at the first failure: bucket, nsfw,
/// post type, score, flair, then keyword search.
pub fn matches(item: &Item, spec: &FilterSpec) -> bool {
    if let Some(buckets) = constraint(&spec.source_buckets) {
        if !contains_ignore_case(buckets, &item.source_bucket) {
            return false;
        }
    }

    if spec.include_nsfw == Some(false) && item.nsfw {
        return false;
    }

    if let Some(want_self) = spec.is_self {
        if item.is_self != want_self {
            return false;
        }
    }

    if let Some(min) = spec.min_score {
        if item.score < min {
            return false;
        }
    }

    if let Some(tags) = constraint(&spec.category_tags) {
        let tag = item.category_tag.as_deref().unwrap_or_default();
        if !contains_ignore_case(tags, tag) {
            return false;
        }
    }

    if let Some(keywords) = constraint(&spec.keywords) {
        let haystack = item.searchable_text().to_lowercase();
        if !keywords
            .iter()
            .any(|k| haystack.contains(k.to_lowercase().as_str()))
        {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> Item {
        Item {
            id: "p1".into(),
            title: "AI breakthrough".into(),
            body: Some("Researchers publish new results".into()),
            url: "https://example.com/p1".into(),
            score: 150,
            source_bucket: "technology".into(),
            author: None,
            created_utc: 0.0,
            nsfw: false,
            is_self: true,
            category_tag: Some("News".into()),
            comment_count: 3,
            comments: None,
        }
    }

    #[test]
    fn empty_spec_matches_everything() {
        assert!(matches(&item(), &FilterSpec::default()));
    }

    #[test]
    fn empty_lists_impose_no_constraint() {
        let spec = FilterSpec {
            source_buckets: Some(vec![]),
            keywords: Some(vec![]),
            category_tags: Some(vec![]),
            ..Default::default()
        };
        assert!(matches(&item(), &spec));
    }

    #[test]
    fn keywords_are_or_and_case_insensitive_over_title_and_body() {
        let spec = FilterSpec {
            keywords: Some(vec!["blockchain".into(), "RESULTS".into()]),
            ..Default::default()
        };
        assert!(matches(&item(), &spec));

        let spec = FilterSpec {
            keywords: Some(vec!["blockchain".into()]),
            ..Default::default()
        };
        assert!(!matches(&item(), &spec));
    }

    #[test]
    fn flair_is_case_insensitive_and_missing_flair_never_matches_a_list() {
        let spec = FilterSpec {
            category_tags: Some(vec!["news".into()]),
            ..Default::default()
        };
        assert!(matches(&item(), &spec));

        let mut untagged = item();
        untagged.category_tag = None;
        assert!(!matches(&untagged, &spec));
    }

    #[test]
    fn is_self_tri_state() {
        let mut link = item();
        link.is_self = false;
        let only_self = FilterSpec {
            is_self: Some(true),
            ..Default::default()
        };
        assert!(matches(&item(), &only_self));
        assert!(!matches(&link, &only_self));
        assert!(matches(&link, &FilterSpec::default()));
    }

    #[test]
    fn score_threshold_is_inclusive() {
        let spec = FilterSpec {
            min_score: Some(150),
            ..Default::default()
        };
        assert!(matches(&item(), &spec));
        let spec = FilterSpec {
            min_score: Some(151),
            ..Default::default()
        };
        assert!(!matches(&item(), &spec));
    }

    #[test]
    fn resolve_applies_defaults_and_clamps() {
        let defaults = FilterDefaults {
            include_nsfw: false,
            comments_limit: 5,
            max_comments_limit: 10,
        };
        let spec = FilterSpec {
            keywords: Some(vec!["  ai ".into(), "".into()]),
            comments_limit: Some(500),
            ..Default::default()
        }
        .resolve(&defaults);
        assert_eq!(spec.include_nsfw, Some(false));
        assert_eq!(spec.comments_limit(), 10);
        assert_eq!(spec.keywords, Some(vec!["ai".to_string()]));

        let explicit = FilterSpec {
            include_nsfw: Some(true),
            ..Default::default()
        }
        .resolve(&defaults);
        assert_eq!(explicit.include_nsfw, Some(true));
        assert_eq!(explicit.comments_limit(), 5);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let extra: FilterSpec =
            serde_json::from_str(r#"{"min_score": 3, "sort_by": "new", "limit": 25}"#).unwrap();
        assert_eq!(extra.min_score, Some(3));
        let ok: FilterSpec =
            serde_json::from_str(r#"{"subreddits": ["rust"], "flair": ["Help"]}"#).unwrap();
        assert_eq!(ok.source_buckets, Some(vec!["rust".to_string()]));
        assert_eq!(ok.category_tags, Some(vec!["Help".to_string()]));
    }
}
