// src/source/reddit.rs
//! Reddit listing client.
//!
//! Without credentials it reads the public `.json` listings. With a client id
//! and secret it uses an application-only OAuth token against
//! `oauth.reddit.com`, refreshing the token shortly before it expires.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use serde::Deserialize;

use super::{ContentSource, SortMode, MAX_PAGE};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::item::RawPost;

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    #[serde(default = "Vec::new")]
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct Credentials {
    client_id: String,
    client_secret: String,
}

pub struct RedditSource {
    client: Client,
    public_base: String,
    oauth_base: String,
    token_url: String,
    credentials: Option<Credentials>,
    token: Mutex<Option<CachedToken>>,
}

impl RedditSource {
    pub fn new(cfg: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        let credentials = match (&cfg.client_id, &cfg.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some(Credentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            client,
            public_base: cfg.public_base_url.trim_end_matches('/').to_string(),
            oauth_base: cfg.oauth_base_url.trim_end_matches('/').to_string(),
            token_url: cfg.token_url.clone(),
            credentials,
            token: Mutex::new(None),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock().expect("token mutex poisoned");
        guard
            .as_ref()
            .filter(|t| Instant::now() + TOKEN_REFRESH_MARGIN < t.expires_at)
            .map(|t| t.value.clone())
    }

    async fn bearer_token(&self, creds: &Credentials) -> Result<String, SourceError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Auth(format!("token endpoint returned {status}")));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("token response: {e}")))?;

        let expires_in = Duration::from_secs(body.expires_in.max(TOKEN_REFRESH_MARGIN.as_secs()));
        *self.token.lock().expect("token mutex poisoned") = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + expires_in,
        });
        tracing::debug!(target: "source", "refreshed reddit oauth token");
        Ok(body.access_token)
    }

    /// GET `path` (relative, without `.json`) and decode the body as `T`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let request = match &self.credentials {
            Some(creds) => {
                let token = self.bearer_token(creds).await?;
                self.client
                    .get(format!("{}{}", self.oauth_base, path))
                    .bearer_auth(token)
            }
            None => self.client.get(format!("{}{}.json", self.public_base, path)),
        };

        let t0 = Instant::now();
        let resp = request.query(query).send().await?;
        histogram!("source_request_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let status = resp.status();
        if !status.is_success() {
            counter!("source_http_errors_total").increment(1);
            return Err(SourceError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn list_posts(
        &self,
        bucket: Option<&str>,
        sort: SortMode,
        limit: usize,
    ) -> Result<Vec<RawPost>, SourceError> {
        let path = format!("/r/{}/{}", bucket.unwrap_or("all"), sort.as_str());
        let mut query = vec![
            ("limit", limit.clamp(1, MAX_PAGE).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if sort == SortMode::Top {
            query.push(("t", "all".to_string()));
        }

        let listing: Listing<RawPost> = self.get_json(&path, &query).await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .filter(|t| t.kind == "t3")
            .map(|t| t.data)
            .collect())
    }

    async fn list_comments(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let path = format!("/comments/{post_id}");
        let query = [
            ("limit", limit.to_string()),
            ("depth", "1".to_string()),
            ("raw_json", "1".to_string()),
        ];

        // [post listing, comment listing]
        let listings: Vec<Listing<CommentData>> = self.get_json(&path, &query).await?;
        let Some(comments) = listings.into_iter().nth(1) else {
            return Err(SourceError::Decode("comment listing missing".into()));
        };
        Ok(comments
            .data
            .children
            .into_iter()
            .filter(|t| t.kind == "t1")
            .filter_map(|t| t.data.body)
            .take(limit)
            .collect())
    }

    fn name(&self) -> &'static str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_post_listing() {
        let body = r#"{"kind":"Listing","data":{"children":[
            {"kind":"t3","data":{"id":"abc","title":"Hello","selftext":"","url":"https://x",
             "score":12,"subreddit":"rust","author":"ferris","created_utc":1700000000.0,
             "over_18":false,"is_self":false,"link_flair_text":null,"num_comments":4}}
        ]}}"#;
        let listing: Listing<RawPost> = serde_json::from_str(body).unwrap();
        assert_eq!(listing.data.children.len(), 1);
        assert_eq!(listing.data.children[0].data.id, "abc");
        assert_eq!(listing.data.children[0].data.num_comments, 4);
    }

    #[test]
    fn decodes_comment_listing_and_skips_more_stubs() {
        let body = r#"[
            {"kind":"Listing","data":{"children":[{"kind":"t3","data":{}}]}},
            {"kind":"Listing","data":{"children":[
                {"kind":"t1","data":{"body":"first"}},
                {"kind":"more","data":{"count":3}}
            ]}}
        ]"#;
        let listings: Vec<Listing<CommentData>> = serde_json::from_str(body).unwrap();
        let bodies: Vec<String> = listings
            .into_iter()
            .nth(1)
            .unwrap()
            .data
            .children
            .into_iter()
            .filter(|t| t.kind == "t1")
            .filter_map(|t| t.data.body)
            .collect();
        assert_eq!(bodies, vec!["first".to_string()]);
    }

    #[test]
    fn credentials_switch_to_oauth() {
        let mut cfg = SourceConfig::default();
        assert!(!RedditSource::new(&cfg).unwrap().is_authenticated());
        cfg.client_id = Some("id".into());
        cfg.client_secret = Some("secret".into());
        assert!(RedditSource::new(&cfg).unwrap().is_authenticated());
    }
}
