//! Related-research finder: keyword search over bibliographic sources, then one
//! bulk classification of every hit against the main article.

mod classify;
mod search;
mod sources;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::fallback::Chain;
use crate::http::HttpClient;
use crate::llm::LanguageModel;
use crate::logging::Tracer;
use crate::pubmed::EUtils;
use crate::step::StepName;

pub use classify::{ResearchClassifier, PUBLIC_REASON, SEARCH_LINK_REASON};
pub use search::{PubMedSearch, SearchHits, SearchQuery, WebSearch};
pub use sources::{CuratedSources, IdentifierLinks, ScholarLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(alias = "supporting", alias = "SUPPORTING")]
    Supporting,
    #[serde(alias = "contradictory", alias = "CONTRADICTORY")]
    Contradictory,
    #[serde(alias = "neutral", alias = "NEUTRAL")]
    Neutral,
}

/// A search hit before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateArticle {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<String>,
    /// Which search source produced the hit.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedArticle {
    #[serde(flatten)]
    pub article: CandidateArticle,
    pub classification: Classification,
    pub classification_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedResearch {
    pub supporting: Vec<ClassifiedArticle>,
    pub contradictory: Vec<ClassifiedArticle>,
    #[serde(default)]
    pub neutral: Vec<ClassifiedArticle>,
    pub total_found: u64,
    pub search_keywords: Vec<String>,
}

impl RelatedResearch {
    pub fn empty(search_keywords: Vec<String>) -> Self {
        Self {
            search_keywords,
            ..Self::default()
        }
    }

    pub fn from_classified(articles: Vec<ClassifiedArticle>, total_found: u64, search_keywords: Vec<String>) -> Self {
        let mut research = Self::empty(search_keywords);
        research.total_found = total_found;
        for article in articles {
            match article.classification {
                Classification::Supporting => research.supporting.push(article),
                Classification::Contradictory => research.contradictory.push(article),
                Classification::Neutral => research.neutral.push(article),
            }
        }
        research
    }

    pub fn len(&self) -> usize {
        self.supporting.len() + self.contradictory.len() + self.neutral.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Who asked for the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Unauthenticated callers: every hit is reported as supporting context.
    Public,
    Member,
}

/// The main article the hits are judged against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchContext {
    pub title: String,
    pub key_findings: Vec<String>,
}

/// Trims, drops blanks and case-insensitive duplicates, and keeps the first `limit`.
pub fn normalize_keywords(keywords: &[String], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

pub struct ResearchFinder {
    search: Chain<SearchQuery, SearchHits>,
    classifier: ResearchClassifier,
    max_results: usize,
}

impl ResearchFinder {
    pub fn new(search: Chain<SearchQuery, SearchHits>, classifier: ResearchClassifier, max_results: usize) -> Self {
        Self {
            search,
            classifier,
            max_results: max_results.clamp(1, 10),
        }
    }

    /// The production chain: PubMed, optional web search, then the deterministic fallbacks.
    pub fn standard(
        http: Arc<dyn HttpClient>,
        model: Arc<dyn LanguageModel>,
        eutils: EUtils,
        tavily_api_key: Option<String>,
        max_results: usize,
    ) -> Self {
        let mut chain = Chain::new().with(PubMedSearch::new(http.clone(), eutils));
        if let Some(key) = tavily_api_key {
            chain = chain.with(WebSearch::new(http, key));
        }
        let chain = chain
            .with(IdentifierLinks)
            .with(CuratedSources)
            .with(ScholarLink);
        Self::new(chain, ResearchClassifier::new(model), max_results)
    }

    pub fn query_for(&self, keywords: &[String]) -> Result<SearchQuery> {
        let terms = normalize_keywords(keywords, self.max_results);
        if terms.is_empty() {
            return Err(AppError::Validation("At least one keyword is required".to_string()));
        }
        Ok(SearchQuery::new(terms, self.max_results))
    }

    /// Search phase. Fails with `SearchUnavailable` only when every source declines.
    pub async fn search(&self, query: &SearchQuery, tracer: &dyn Tracer) -> Result<SearchHits> {
        tracer.started(StepName::SearchingSimilarArticles, &query.query);
        match self.search.run(query, StepName::SearchingSimilarArticles, tracer).await {
            Ok(resolved) => {
                tracer.completed(
                    StepName::SearchingSimilarArticles,
                    &format!("{} candidates from {}", resolved.value.articles.len(), resolved.strategy),
                );
                Ok(resolved.value)
            }
            Err(exhausted) => {
                let err = AppError::SearchUnavailable(exhausted.summary());
                tracer.failed(StepName::SearchingSimilarArticles, &err.to_string());
                Err(err)
            }
        }
    }

    /// Classification phase: one model call for the whole candidate set.
    pub async fn assess(
        &self,
        hits: SearchHits,
        context: &ResearchContext,
        audience: Audience,
        search_keywords: Vec<String>,
        tracer: &dyn Tracer,
    ) -> Result<RelatedResearch> {
        tracer.started(StepName::AssessingResearch, &format!("{} candidates", hits.articles.len()));
        if hits.articles.is_empty() {
            tracer.skipped(StepName::AssessingResearch, "no candidates");
            return Ok(RelatedResearch::from_classified(Vec::new(), hits.total_found, search_keywords));
        }

        let classified = match audience {
            Audience::Public => classify::as_supporting(hits.articles),
            Audience::Member => {
                let (links, articles): (Vec<_>, Vec<_>) = hits.articles.into_iter().partition(sources::is_search_link);
                let mut classified = if articles.is_empty() {
                    Vec::new()
                } else {
                    match self.classifier.classify(context, articles).await {
                        Ok(classified) => classified,
                        Err(err) => {
                            tracer.failed(StepName::AssessingResearch, &err.to_string());
                            return Err(err);
                        }
                    }
                };
                classified.extend(classify::as_search_links(links));
                classified
            }
        };

        let research = RelatedResearch::from_classified(classified, hits.total_found, search_keywords);
        tracer.completed(
            StepName::AssessingResearch,
            &format!(
                "{} supporting, {} contradictory, {} neutral",
                research.supporting.len(),
                research.contradictory.len(),
                research.neutral.len()
            ),
        );
        Ok(research)
    }

    /// Both phases back to back. Empty keywords fail before any search is issued.
    pub async fn find_related(
        &self,
        keywords: &[String],
        context: &ResearchContext,
        audience: Audience,
        tracer: &dyn Tracer,
    ) -> Result<RelatedResearch> {
        let query = self.query_for(keywords)?;
        let hits = self.search(&query, tracer).await?;
        self.assess(hits, context, audience, query.terms, tracer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RecordingTracer;
    use crate::testing::{classification_json, esearch_json, esummary_json, FakeHttp, ScriptedModel, EUTILS_TEST_BASE};

    fn finder(http: Arc<FakeHttp>, model: Arc<ScriptedModel>) -> ResearchFinder {
        ResearchFinder::standard(http, model, EUtils::new(EUTILS_TEST_BASE, None), None, 10)
    }

    fn pubmed_http(ids: &[&str]) -> Arc<FakeHttp> {
        Arc::new(
            FakeHttp::new()
                .route(&format!("{}/esearch.fcgi", EUTILS_TEST_BASE), 200, &esearch_json(ids, 120))
                .route(&format!("{}/esummary.fcgi", EUTILS_TEST_BASE), 200, &esummary_json(ids)),
        )
    }

    fn context() -> ResearchContext {
        ResearchContext {
            title: "Melatonin improves sleep".into(),
            key_findings: vec!["Sleep onset was 20 minutes faster".into()],
        }
    }

    #[test]
    fn keywords_are_deduplicated_and_capped() {
        let raw: Vec<String> = ["Sleep", " sleep ", "", "melatonin", "Melatonin", "a", "b", "c", "d", "e", "f", "g", "h", "i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let terms = normalize_keywords(&raw, 10);
        assert_eq!(terms.len(), 10);
        assert_eq!(&terms[..3], &["Sleep".to_string(), "melatonin".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn empty_keywords_are_rejected_without_searching() {
        let http = Arc::new(FakeHttp::new());
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let err = finder(http.clone(), model.clone())
            .find_related(&[" ".to_string()], &context(), Audience::Member, &RecordingTracer::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(http.requests().is_empty());
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn member_results_are_split_by_classification() {
        let ids = ["101", "102", "103"];
        let model = Arc::new(ScriptedModel::new([classification_json(&[
            (0, "Supporting"),
            (1, "Contradictory"),
        ])]));
        let research = finder(pubmed_http(&ids), model.clone())
            .find_related(&["sleep".to_string()], &context(), Audience::Member, &RecordingTracer::new())
            .await
            .unwrap();

        assert_eq!(research.supporting.len(), 1);
        assert_eq!(research.contradictory.len(), 1);
        assert_eq!(research.neutral.len(), 1, "unclassified candidates fall back to neutral");
        assert_eq!(research.total_found, 120);
        assert_eq!(research.search_keywords, vec!["sleep".to_string()]);
        assert_eq!(research.supporting[0].article.url, "https://pubmed.ncbi.nlm.nih.gov/101/");

        let requests = model.requests();
        assert_eq!(requests.len(), 1, "classification is a single bulk call");
        assert!(requests[0].prompt.contains("Melatonin improves sleep"));
    }

    #[tokio::test]
    async fn public_callers_only_see_supporting() {
        let ids = ["1", "2", "3", "4", "5"];
        let model = Arc::new(ScriptedModel::new([classification_json(&[
            (0, "Supporting"),
            (1, "Contradictory"),
            (2, "Contradictory"),
            (3, "Neutral"),
            (4, "Supporting"),
        ])]));
        let finder = finder(pubmed_http(&ids), model.clone());

        let member = finder
            .find_related(&["sleep".to_string()], &context(), Audience::Member, &RecordingTracer::new())
            .await
            .unwrap();
        assert_eq!(member.contradictory.len(), 2);

        let public = finder
            .find_related(&["sleep".to_string()], &ResearchContext::default(), Audience::Public, &RecordingTracer::new())
            .await
            .unwrap();
        assert_eq!(public.supporting.len(), 5);
        assert!(public.contradictory.is_empty());
        assert!(public.neutral.is_empty());
        assert!(public.supporting.iter().all(|a| a.classification == Classification::Supporting));
        assert_eq!(model.requests().len(), 1, "the public path does not call the classifier");
    }

    #[tokio::test]
    async fn empty_pubmed_results_fall_back_to_scholar_link() {
        let http = Arc::new(
            FakeHttp::new().route(&format!("{}/esearch.fcgi", EUTILS_TEST_BASE), 200, &esearch_json(&[], 0)),
        );
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let finder = finder(http, model);
        let tracer = RecordingTracer::new();

        let hits = finder
            .search(&finder.query_for(&["quantum biology".to_string()]).unwrap(), &tracer)
            .await
            .unwrap();
        assert_eq!(hits.articles.len(), 1);
        assert_eq!(hits.articles[0].source, "scholar-link");
        assert!(hits.articles[0].url.starts_with("https://scholar.google.com/scholar?q="));
    }

    #[tokio::test]
    async fn search_page_links_are_neutral_without_a_model_call() {
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let finder = finder(Arc::new(FakeHttp::new()), model.clone());

        let research = finder
            .find_related(&["breast cancer".to_string()], &context(), Audience::Member, &RecordingTracer::new())
            .await
            .unwrap();

        assert!(research.supporting.is_empty());
        assert!(research.contradictory.is_empty());
        assert_eq!(research.neutral.len(), 1);
        assert_eq!(research.neutral[0].article.source, "curated-sources");
        assert_eq!(research.neutral[0].classification_reason, SEARCH_LINK_REASON);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn exhausted_chain_is_search_unavailable() {
        let http: Arc<FakeHttp> = Arc::new(FakeHttp::new());
        let chain = Chain::new().with(PubMedSearch::new(http, EUtils::new(EUTILS_TEST_BASE, None)));
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let finder = ResearchFinder::new(chain, ResearchClassifier::new(model), 10);

        let err = finder
            .find_related(&["sleep".to_string()], &context(), Audience::Member, &RecordingTracer::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SearchUnavailable(_)));
    }

    #[test]
    fn error_payload_defaults_to_empty_lists() {
        let json = serde_json::to_value(RelatedResearch::empty(vec!["k".into()])).unwrap();
        assert_eq!(json["supporting"], serde_json::json!([]));
        assert_eq!(json["contradictory"], serde_json::json!([]));
        assert_eq!(json["totalFound"], 0);
        assert_eq!(json["searchKeywords"], serde_json::json!(["k"]));
    }
}
