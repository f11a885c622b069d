// src/query.rs
//! One-shot query: a single fetch and a single filter pass, no dedup and no
//! subscribers involved.

use crate::error::SourceError;
use crate::filter::{matches, FilterSpec};
use crate::item::Item;
use crate::source::{bucket_path, ContentSource, SortMode};

/// Fetch twice the requested amount so filtering still leaves enough.
const OVERFETCH: usize = 2;

pub async fn run_query(
    source: &dyn ContentSource,
    spec: &FilterSpec,
    sort: SortMode,
    limit: usize,
) -> Result<Vec<Item>, SourceError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let bucket = spec.source_buckets.as_deref().and_then(bucket_path);
    let posts = source
        .list_posts(bucket.as_deref(), sort, limit.saturating_mul(OVERFETCH))
        .await?;

    let mut out = Vec::new();
    for raw in posts {
        let item = Item::from(raw);
        if !matches(&item, spec) {
            continue;
        }
        let item = if spec.wants_comments() {
            let limit = spec.comments_limit();
            let comments = source
                .list_comments(&item.id, limit)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(target: "query", item_id = %item.id, error = %e, "comment fetch failed");
                    Vec::new()
                });
            item.with_comments(&comments, limit)
        } else {
            item
        };
        out.push(item);
        if out.len() >= limit {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::RawPost;
    use crate::source::memory::ScriptedSource;

    fn post(id: &str, score: i64) -> RawPost {
        RawPost {
            id: id.into(),
            title: format!("post {id}"),
            subreddit: "technology".into(),
            score,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn filters_and_truncates_to_limit() {
        let src = ScriptedSource::fixed(vec![post("a", 5), post("b", 500), post("c", 700), post("d", 900)]);
        let spec = FilterSpec {
            min_score: Some(100),
            source_buckets: Some(vec!["technology".into(), "news".into()]),
            ..Default::default()
        };
        let got = run_query(&src, &spec, SortMode::Hot, 2).await.unwrap();
        assert_eq!(got.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(
            src.last_request(),
            Some((Some("technology+news".to_string()), SortMode::Hot, 4))
        );
    }

    #[tokio::test]
    async fn comments_attached_when_requested() {
        let src = ScriptedSource::fixed(vec![post("a", 1)]).with_comments("a", &["x", "y", "z"]);
        let spec = FilterSpec {
            fetch_comments: true,
            comments_limit: Some(2),
            ..Default::default()
        };
        let got = run_query(&src, &spec, SortMode::New, 10).await.unwrap();
        assert_eq!(got[0].comments, Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[tokio::test]
    async fn huge_limit_does_not_preallocate() {
        let src = ScriptedSource::fixed(vec![post("a", 1), post("b", 2)]);
        let got = run_query(&src, &FilterSpec::default(), SortMode::Hot, usize::MAX)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(src.last_request().unwrap().2, usize::MAX);
    }

    #[tokio::test]
    async fn source_failure_propagates() {
        let src = ScriptedSource::new().then_fail("down");
        assert!(run_query(&src, &FilterSpec::default(), SortMode::Hot, 10)
            .await
            .is_err());
    }
}
