// src/source/memory.rs
//! In-memory source with scripted responses, for tests, demos and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ContentSource, SortMode};
use crate::error::SourceError;
use crate::item::RawPost;

#[derive(Debug, Clone)]
enum Step {
    Posts(Vec<RawPost>),
    Fail(String),
}

/// Each `list_posts` call consumes the next scripted step. Once the script
/// runs out, the `fallback` listing (if any) is served forever; otherwise the
/// call fails with [`SourceError::Exhausted`].
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Vec<RawPost>>,
    comments: HashMap<String, Vec<String>>,
    failing_comments: bool,
    comment_delay: Option<Duration>,
    post_calls: AtomicUsize,
    comment_calls: AtomicUsize,
    last_request: Mutex<Option<(Option<String>, SortMode, usize)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the same listing on every call.
    pub fn fixed(posts: Vec<RawPost>) -> Self {
        Self {
            fallback: Some(posts),
            ..Self::default()
        }
    }

    pub fn then_posts(self, posts: Vec<RawPost>) -> Self {
        self.push(Step::Posts(posts));
        self
    }

    pub fn then_fail(self, reason: &str) -> Self {
        self.push(Step::Fail(reason.to_string()));
        self
    }

    pub fn with_comments(mut self, post_id: &str, comments: &[&str]) -> Self {
        self.comments.insert(
            post_id.to_string(),
            comments.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Make every `list_comments` call fail.
    pub fn with_failing_comments(mut self) -> Self {
        self.failing_comments = true;
        self
    }

    /// Make every `list_comments` call take `delay` before answering.
    pub fn with_comment_delay(mut self, delay: Duration) -> Self {
        self.comment_delay = Some(delay);
        self
    }

    pub fn post_calls(&self) -> usize {
        self.post_calls.load(Ordering::SeqCst)
    }

    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }

    /// Bucket, sort and limit of the most recent `list_posts` call.
    pub fn last_request(&self) -> Option<(Option<String>, SortMode, usize)> {
        self.last_request.lock().expect("last request mutex poisoned").clone()
    }

    fn push(&self, step: Step) {
        self.steps
            .lock()
            .expect("script mutex poisoned")
            .push_back(step);
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn list_posts(
        &self,
        bucket: Option<&str>,
        sort: SortMode,
        limit: usize,
    ) -> Result<Vec<RawPost>, SourceError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().expect("last request mutex poisoned") =
            Some((bucket.map(str::to_string), sort, limit));

        let step = self.steps.lock().expect("script mutex poisoned").pop_front();
        match step {
            Some(Step::Posts(posts)) => Ok(posts.into_iter().take(limit).collect()),
            Some(Step::Fail(reason)) => Err(SourceError::Decode(reason)),
            None => match &self.fallback {
                Some(posts) => Ok(posts.iter().take(limit).cloned().collect()),
                None => Err(SourceError::Exhausted),
            },
        }
    }

    async fn list_comments(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, SourceError> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.comment_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_comments {
            return Err(SourceError::Status {
                status: 503,
                endpoint: format!("/comments/{post_id}"),
            });
        }
        Ok(self
            .comments
            .get(post_id)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
