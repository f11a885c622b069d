// src/item.rs
use serde::{Deserialize, Serialize};

/// One normalized post as distributed to subscribers.
///
/// Built once per poll cycle and then shared as `Arc<Item>`; nothing mutates
/// it afterwards. Wire names match what clients of the relay already consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(rename = "selftext")]
    pub body: Option<String>,
    pub url: String,
    pub score: i64,
    #[serde(rename = "subreddit")]
    pub source_bucket: String,
    pub author: Option<String>,
    pub created_utc: f64,
    #[serde(rename = "over_18")]
    pub nsfw: bool,
    pub is_self: bool,
    #[serde(rename = "flair")]
    pub category_tag: Option<String>,
    #[serde(rename = "num_comments")]
    pub comment_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<String>>,
}

impl Item {
    /// Title and body joined the way keyword search sees them.
    pub fn searchable_text(&self) -> String {
        match &self.body {
            Some(body) => format!("{} {}", self.title, body),
            None => self.title.clone(),
        }
    }

    /// Copy of this item carrying at most `limit` of the given comments.
    pub fn with_comments(&self, comments: &[String], limit: usize) -> Item {
        let mut out = self.clone();
        out.comments = Some(comments.iter().take(limit).cloned().collect());
        out
    }
}

/// A post as the source returns it (`t3` data in a Reddit listing).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPost {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub num_comments: u64,
}

impl From<RawPost> for Item {
    fn from(raw: RawPost) -> Self {
        let body = normalize_text(&raw.selftext);
        let flair = raw
            .link_flair_text
            .as_deref()
            .map(normalize_text)
            .filter(|f| !f.is_empty());

        Item {
            id: raw.id,
            title: normalize_text(&raw.title),
            body: (!body.is_empty()).then_some(body),
            url: raw.url,
            score: raw.score,
            source_bucket: raw.subreddit,
            // Reddit reports deleted accounts as "[deleted]"
            author: raw.author.filter(|a| a != "[deleted]"),
            created_utc: raw.created_utc,
            nsfw: raw.over_18,
            is_self: raw.is_self,
            category_tag: flair,
            comment_count: raw.num_comments,
            comments: None,
        }
    }
}

/// Decode HTML entities and trim. Reddit escapes `&`, `<` and `>` in titles
/// unless `raw_json=1` is honoured, so this runs on every text field.
pub fn normalize_text(s: &str) -> String {
    html_escape::decode_html_entities(s).trim().to_string()
}
