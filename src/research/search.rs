use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::CandidateArticle;
use crate::fallback::{Skip, Strategy};
use crate::http::HttpClient;
use crate::pubmed::{self, EUtils};

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

const SCHOLARLY_DOMAINS: &[&str] = &[
    "pubmed.ncbi.nlm.nih.gov",
    "ncbi.nlm.nih.gov",
    "nature.com",
    "sciencedirect.com",
    "thelancet.com",
    "nejm.org",
    "bmj.com",
    "jamanetwork.com",
    "frontiersin.org",
    "plos.org",
    "arxiv.org",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub terms: Vec<String>,
    /// `terms` joined with ` OR `; multi-word terms are parenthesised.
    pub query: String,
    pub max_results: usize,
}

impl SearchQuery {
    pub fn new(terms: Vec<String>, max_results: usize) -> Self {
        let query = terms
            .iter()
            .map(|t| {
                if t.contains(char::is_whitespace) {
                    format!("({})", t)
                } else {
                    t.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        Self {
            terms,
            query,
            max_results,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHits {
    pub total_found: u64,
    pub articles: Vec<CandidateArticle>,
}

/// NCBI E-utilities: `esearch` for ids, then `esummary` for their metadata.
pub struct PubMedSearch {
    http: Arc<dyn HttpClient>,
    eutils: EUtils,
}

impl PubMedSearch {
    pub fn new(http: Arc<dyn HttpClient>, eutils: EUtils) -> Self {
        Self { http, eutils }
    }

    async fn get_json(&self, url: &str, what: &str) -> Result<Value, Skip> {
        let page = self
            .http
            .get(url)
            .await
            .map_err(|e| Skip::new(format!("{} request failed: {}", what, e)))?;
        if !page.is_success() {
            return Err(Skip::new(format!("{} returned HTTP {}", what, page.status)));
        }
        page.json().map_err(|e| Skip::new(format!("{} returned invalid JSON: {}", what, e)))
    }
}

#[async_trait]
impl Strategy<SearchQuery, SearchHits> for PubMedSearch {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    async fn attempt(&self, query: &SearchQuery) -> Result<SearchHits, Skip> {
        let search_url = self
            .eutils
            .esearch_url(&query.query, query.max_results)
            .map_err(|e| Skip::new(e.to_string()))?;
        let found = pubmed::parse_esearch(&self.get_json(&search_url, "esearch").await?)
            .map_err(|e| Skip::new(e.to_string()))?;
        if found.ids.is_empty() {
            return Err(Skip::new("no PubMed results"));
        }

        let summary_url = self
            .eutils
            .esummary_url(&found.ids)
            .map_err(|e| Skip::new(e.to_string()))?;
        let records = pubmed::parse_esummary(&self.get_json(&summary_url, "esummary").await?)
            .map_err(|e| Skip::new(e.to_string()))?;
        if records.is_empty() {
            return Err(Skip::new("esummary returned no usable records"));
        }

        let articles = records
            .into_iter()
            .take(query.max_results)
            .map(|record| CandidateArticle {
                id: record.pmid.clone(),
                url: pubmed::article_url(&record.pmid),
                pmid: Some(record.pmid),
                title: record.title,
                authors: record.authors,
                journal: record.journal,
                pub_date: record.pub_date,
                source: self.name().to_string(),
            })
            .collect();

        Ok(SearchHits {
            total_found: found.total,
            articles,
        })
    }
}

/// General web search (Tavily), restricted to scholarly domains.
pub struct WebSearch {
    http: Arc<dyn HttpClient>,
    api_key: String,
}

impl WebSearch {
    pub fn new(http: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Strategy<SearchQuery, SearchHits> for WebSearch {
    fn name(&self) -> &'static str {
        "web-search"
    }

    async fn attempt(&self, query: &SearchQuery) -> Result<SearchHits, Skip> {
        let body = json!({
            "api_key": self.api_key,
            "query": format!("{} research study", query.terms.join(" ")),
            "max_results": query.max_results,
            "search_depth": "basic",
            "include_domains": SCHOLARLY_DOMAINS,
        });

        let page = self
            .http
            .post_json(TAVILY_SEARCH_URL, &body)
            .await
            .map_err(|e| Skip::new(format!("web search failed: {}", e)))?;
        if !page.is_success() {
            return Err(Skip::new(format!("web search returned HTTP {}", page.status)));
        }
        let value = page
            .json()
            .map_err(|e| Skip::new(format!("web search returned invalid JSON: {}", e)))?;

        let articles: Vec<CandidateArticle> = value
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| {
                        let url = r.get("url")?.as_str()?.to_string();
                        let title = r.get("title")?.as_str()?.trim().to_string();
                        if title.is_empty() {
                            return None;
                        }
                        Some(CandidateArticle {
                            id: url.clone(),
                            pmid: pubmed::detect_pmid(&url),
                            title,
                            url,
                            authors: Vec::new(),
                            journal: None,
                            pub_date: r.get("published_date").and_then(Value::as_str).map(str::to_string),
                            source: "web-search".to_string(),
                        })
                    })
                    .take(query.max_results)
                    .collect()
            })
            .unwrap_or_default();

        if articles.is_empty() {
            return Err(Skip::new("web search found nothing"));
        }

        Ok(SearchHits {
            total_found: articles.len() as u64,
            articles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{esearch_json, FakeHttp, EUTILS_TEST_BASE};

    #[test]
    fn query_parenthesises_phrases() {
        let query = SearchQuery::new(vec!["sleep".into(), "shift work".into()], 10);
        assert_eq!(query.query, "sleep OR (shift work)");
    }

    #[tokio::test]
    async fn pubmed_skips_when_summary_fails() {
        let http = Arc::new(
            FakeHttp::new()
                .route(&format!("{}/esearch.fcgi", EUTILS_TEST_BASE), 200, &esearch_json(&["1"], 1))
                .route(&format!("{}/esummary.fcgi", EUTILS_TEST_BASE), 502, "bad gateway"),
        );
        let search = PubMedSearch::new(http, EUtils::new(EUTILS_TEST_BASE, None));
        let skip = search.attempt(&SearchQuery::new(vec!["sleep".into()], 5)).await.unwrap_err();
        assert_eq!(skip.0, "esummary returned HTTP 502");
    }

    #[tokio::test]
    async fn web_search_maps_results() {
        let body = r#"{"results": [
            {"title": "Sleep study", "url": "https://pubmed.ncbi.nlm.nih.gov/555/", "content": "..."},
            {"title": "", "url": "https://example.org/x"}
        ]}"#;
        let http = Arc::new(FakeHttp::new().post_route(TAVILY_SEARCH_URL, 200, body));
        let search = WebSearch::new(http.clone(), "key");

        let hits = search.attempt(&SearchQuery::new(vec!["sleep".into()], 5)).await.unwrap();
        assert_eq!(hits.articles.len(), 1);
        assert_eq!(hits.articles[0].pmid.as_deref(), Some("555"));

        let posted = http.posted();
        assert_eq!(posted[0].1["api_key"], "key");
        assert_eq!(posted[0].1["query"], "sleep research study");
    }
}
