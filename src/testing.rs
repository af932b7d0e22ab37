//! In-process fakes for the HTTP and model seams, plus canned NCBI and model payloads.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::http::{FetchedPage, HttpClient};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::research::CandidateArticle;
use crate::summary::{SummaryPoint, SummaryResult};

pub const EUTILS_TEST_BASE: &str = "https://eutils.test/entrez/eutils";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    status: u16,
    body: String,
}

fn longest_match<'a>(routes: &'a [Route], url: &str) -> Option<&'a Route> {
    routes
        .iter()
        .filter(|r| url.starts_with(&r.prefix))
        .max_by_key(|r| r.prefix.len())
}

/// Serves canned responses by URL prefix; anything unrouted is a connection error.
#[derive(Debug, Default)]
pub struct FakeHttp {
    gets: Vec<Route>,
    posts: Vec<Route>,
    requested: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, Value)>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, prefix: &str, status: u16, body: &str) -> Self {
        self.gets.push(Route {
            prefix: prefix.to_string(),
            status,
            body: body.to_string(),
        });
        self
    }

    pub fn post_route(mut self, prefix: &str, status: u16, body: &str) -> Self {
        self.posts.push(Route {
            prefix: prefix.to_string(),
            status,
            body: body.to_string(),
        });
        self
    }

    /// Every GET, in order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requested).clone()
    }

    pub fn posted(&self) -> Vec<(String, Value)> {
        lock(&self.posted).clone()
    }

    fn answer(routes: &[Route], url: &str) -> Result<FetchedPage> {
        let route = longest_match(routes, url)
            .ok_or_else(|| AppError::FetchError(format!("connection refused: {}", url)))?;
        Ok(FetchedPage {
            url: url.to_string(),
            status: route.status,
            body: route.body.clone(),
        })
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(&self, url: &str) -> Result<FetchedPage> {
        lock(&self.requested).push(url.to_string());
        Self::answer(&self.gets, url)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<FetchedPage> {
        lock(&self.posted).push((url.to_string(), body.clone()));
        Self::answer(&self.posts, url)
    }
}

/// Replies with queued completions in order, then fails like an unreachable provider.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        lock(&self.requests).push(request.clone());
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| AppError::LlmError("LLM API error 503: no scripted response left".to_string()))
    }
}

pub fn sample_summary(title: &str) -> SummaryResult {
    SummaryResult {
        title: title.to_string(),
        visual_summary: vec![
            SummaryPoint {
                emoji: "🧠".to_string(),
                point: "Participants recalled more words after a full night of sleep".to_string(),
            },
            SummaryPoint {
                emoji: "⏱️".to_string(),
                point: "The effect held for six months".to_string(),
            },
        ],
        keywords: vec!["sleep".to_string(), "memory".to_string()],
        cohort_analysis: Default::default(),
    }
}

/// A model reply that decodes into a valid summary.
pub fn summary_json(title: &str, keywords: &[&str]) -> String {
    json!({
        "title": title,
        "visualSummary": [
            {"emoji": "🧠", "point": format!("{} changed the primary outcome", title)},
            {"emoji": "📊", "point": "The effect size was moderate"}
        ],
        "keywords": keywords,
        "cohortAnalysis": {"studyType": "Randomized controlled trial", "cohortSize": "240"}
    })
    .to_string()
}

pub fn classification_json(verdicts: &[(usize, &str)]) -> String {
    let classifications: Vec<Value> = verdicts
        .iter()
        .map(|(index, label)| json!({"index": index, "classification": label, "reason": format!("{} evidence", label)}))
        .collect();
    json!({ "classifications": classifications }).to_string()
}

pub fn esearch_json(ids: &[&str], total: u64) -> String {
    json!({
        "esearchresult": {
            "count": total.to_string(),
            "retmax": ids.len().to_string(),
            "idlist": ids
        }
    })
    .to_string()
}

pub fn esummary_json(ids: &[&str]) -> String {
    let mut result = serde_json::Map::new();
    result.insert("uids".to_string(), json!(ids));
    for id in ids {
        result.insert(
            id.to_string(),
            json!({
                "uid": id,
                "title": format!("Study {}", id),
                "authors": [{"name": "Smith J"}, {"name": "Lee K"}],
                "fulljournalname": "Journal of Sleep Research",
                "pubdate": "2023 Mar"
            }),
        );
    }
    json!({ "result": result }).to_string()
}

pub fn candidate(name: &str) -> CandidateArticle {
    CandidateArticle {
        id: name.to_string(),
        pmid: None,
        title: format!("Article {}", name),
        url: format!("https://example.org/{}", name),
        authors: Vec::new(),
        journal: None,
        pub_date: None,
        source: "test".to_string(),
    }
}
