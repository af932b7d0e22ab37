//! Article analysis: extraction, summary, keywords, related research, in that order,
//! behind one step cursor a client can resume from.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::extractor::ContentExtractor;
use crate::logging::Tracer;
use crate::research::{normalize_keywords, Audience, RelatedResearch, ResearchContext, ResearchFinder, SearchHits};
use crate::step::{advance, StageOutcome, StepName};
use crate::storage::{ArticleStore, NewArticle};
use crate::summary::{SummaryGenerator, SummaryResult};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    #[serde(default)]
    pub url: String,
    /// Stage to start from; earlier stages are not run.
    #[serde(default)]
    pub step: Option<StepName>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<SummaryResult>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

impl AnalysisRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn starting_at(mut self, step: StepName) -> Self {
        self.step = Some(step);
        self
    }
}

/// Everything computed so far, plus how far processing got.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub current_step: StepName,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_research: Option<RelatedResearch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set once the finished analysis has been stored for a signed-in user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<i64>,
}

impl AnalysisResponse {
    pub fn is_complete(&self) -> bool {
        self.current_step == StepName::Complete && self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Public,
    Member(String),
}

impl Viewer {
    pub fn audience(&self) -> Audience {
        match self {
            Viewer::Public => Audience::Public,
            Viewer::Member(_) => Audience::Member,
        }
    }
}

/// Characters of article text sent to the summary model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBudgets {
    pub public: usize,
    pub member: usize,
}

impl Default for ContentBudgets {
    fn default() -> Self {
        Self {
            public: 15_000,
            member: 50_000,
        }
    }
}

struct AnalysisState {
    response: AnalysisResponse,
    hits: Option<SearchHits>,
    search_terms: Vec<String>,
    /// Stages that completed or skipped during this call.
    ran: Vec<StepName>,
}

impl AnalysisState {
    /// Only results produced here may be stored: a summary the caller sent back is not trusted.
    fn produced_here(&self) -> bool {
        self.ran.contains(&StepName::GeneratingSummary) && self.ran.contains(&StepName::AssessingResearch)
    }
}

pub struct Pipeline {
    extractor: ContentExtractor,
    summarizer: SummaryGenerator,
    research: Arc<ResearchFinder>,
    store: Option<Arc<dyn ArticleStore>>,
    tracer: Arc<dyn Tracer>,
    budgets: ContentBudgets,
    max_keywords: usize,
}

impl Pipeline {
    pub fn new(
        extractor: ContentExtractor,
        summarizer: SummaryGenerator,
        research: Arc<ResearchFinder>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            research,
            store: None,
            tracer,
            budgets: ContentBudgets::default(),
            max_keywords: 10,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArticleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_budgets(mut self, budgets: ContentBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_max_keywords(mut self, max_keywords: usize) -> Self {
        self.max_keywords = max_keywords.clamp(1, 10);
        self
    }

    /// Runs every stage from the requested step onwards, stopping at the first failure.
    ///
    /// Never fails: errors are reported in the response next to whatever was
    /// already computed. A failure while finding related research still ends
    /// on `Complete`. Members get the result stored only when every stage succeeded
    /// and both the summary and the research were produced by this call.
    pub async fn analyze(&self, request: AnalysisRequest, viewer: &Viewer) -> AnalysisResponse {
        let tracer = self.tracer.as_ref();
        let mut step = request.step.unwrap_or(StepName::RetrievingContent);
        let mut state = AnalysisState {
            response: AnalysisResponse {
                current_step: step,
                url: request.url,
                title: request.title,
                content: request.content,
                summary: request.summary,
                keywords: request.keywords,
                related_research: None,
                error: None,
                article_id: None,
            },
            hits: None,
            search_terms: Vec::new(),
            ran: Vec::new(),
        };

        while step != StepName::Complete {
            let outcome = self.run_stage(step, &mut state, viewer).await;
            let next = advance(step, &outcome);
            match outcome {
                StageOutcome::Completed => state.ran.push(step),
                StageOutcome::Skipped(reason) => {
                    tracer.skipped(step, &reason);
                    state.ran.push(step);
                }
                StageOutcome::Failed(error) => {
                    if step.is_research() && state.response.related_research.is_none() {
                        state.response.related_research = Some(RelatedResearch::empty(state.search_terms.clone()));
                    }
                    state.response.error = Some(error);
                    step = next;
                    break;
                }
            }
            step = next;
        }

        state.response.current_step = step;
        if state.response.is_complete() {
            if let Viewer::Member(user_id) = viewer {
                if state.produced_here() {
                    self.persist(&mut state.response, user_id).await;
                } else {
                    tracer.skipped(StepName::Complete, "resumed past the summary; nothing stored");
                }
            }
        }
        state.response
    }

    async fn run_stage(&self, step: StepName, state: &mut AnalysisState, viewer: &Viewer) -> StageOutcome {
        match step {
            StepName::RetrievingContent => self.retrieve_content(state).await,
            StepName::GeneratingSummary => self.generate_summary(state, viewer).await,
            StepName::ExtractingKeywords => self.extract_keywords(state),
            StepName::SearchingSimilarArticles => self.search_similar(state).await,
            StepName::AssessingResearch => self.assess_research(state, viewer).await,
            StepName::Complete => StageOutcome::Completed,
        }
    }

    async fn retrieve_content(&self, state: &mut AnalysisState) -> StageOutcome {
        match self.extractor.extract(&state.response.url, self.tracer.as_ref()).await {
            Ok(article) => {
                state.response.title = Some(article.title);
                state.response.content = Some(article.content);
                StageOutcome::Completed
            }
            Err(failure) => StageOutcome::Failed(failure.error),
        }
    }

    async fn generate_summary(&self, state: &mut AnalysisState, viewer: &Viewer) -> StageOutcome {
        let Some(content) = state.response.content.as_deref().filter(|c| !c.trim().is_empty()) else {
            return StageOutcome::Failed("Cannot generate a summary without article content".to_string());
        };
        let title = state.response.title.as_deref().unwrap_or_default();
        let budget = match viewer {
            Viewer::Public => self.budgets.public,
            Viewer::Member(_) => self.budgets.member,
        };

        match self.summarizer.generate(title, content, budget, self.tracer.as_ref()).await {
            Ok(generated) => {
                state.response.summary = Some(generated.summary);
                state.response.keywords = Some(generated.keywords);
                StageOutcome::Completed
            }
            Err(err) => StageOutcome::Failed(err.to_string()),
        }
    }

    fn extract_keywords(&self, state: &mut AnalysisState) -> StageOutcome {
        let keywords = match (&state.response.keywords, &state.response.summary) {
            (Some(keywords), _) if !keywords.is_empty() => keywords.clone(),
            (_, Some(summary)) => summary.keywords.clone(),
            (Some(keywords), None) => keywords.clone(),
            (None, None) => {
                return StageOutcome::Failed("Cannot extract keywords without a summary".to_string());
            }
        };

        state.search_terms = normalize_keywords(&keywords, self.max_keywords);
        self.tracer.completed(
            StepName::ExtractingKeywords,
            &format!("{} keywords, {} search terms", keywords.len(), state.search_terms.len()),
        );
        state.response.keywords = Some(keywords);
        StageOutcome::Completed
    }

    /// Search terms for a run resumed past keyword extraction.
    fn resumed_terms(&self, state: &AnalysisState) -> Option<Vec<String>> {
        let keywords = state
            .response
            .keywords
            .as_ref()
            .or(state.response.summary.as_ref().map(|s| &s.keywords))?;
        Some(normalize_keywords(keywords, self.max_keywords))
    }

    async fn search_similar(&self, state: &mut AnalysisState) -> StageOutcome {
        if state.search_terms.is_empty() {
            match self.resumed_terms(state) {
                Some(terms) => state.search_terms = terms,
                None => return StageOutcome::Failed("Cannot search without keywords".to_string()),
            }
        }
        if state.search_terms.is_empty() {
            state.response.related_research = Some(RelatedResearch::empty(Vec::new()));
            return StageOutcome::Skipped("no keywords to search with".to_string());
        }

        match self.run_search(state).await {
            Ok(hits) => {
                state.hits = Some(hits);
                StageOutcome::Completed
            }
            Err(error) => StageOutcome::Failed(error),
        }
    }

    async fn run_search(&self, state: &AnalysisState) -> std::result::Result<SearchHits, String> {
        let query = self.research.query_for(&state.search_terms).map_err(|e| e.to_string())?;
        self.research
            .search(&query, self.tracer.as_ref())
            .await
            .map_err(|e| e.to_string())
    }

    async fn assess_research(&self, state: &mut AnalysisState, viewer: &Viewer) -> StageOutcome {
        let hits = match state.hits.take() {
            Some(hits) => hits,
            None if state.response.related_research.is_some() => {
                return StageOutcome::Skipped("nothing was searched".to_string());
            }
            // resumed here directly: search results are not part of the resume payload
            None => {
                let Some(terms) = self.resumed_terms(state).filter(|t| !t.is_empty()) else {
                    return StageOutcome::Failed("Cannot assess research without keywords".to_string());
                };
                state.search_terms = terms;
                match self.run_search(state).await {
                    Ok(hits) => hits,
                    Err(error) => return StageOutcome::Failed(error),
                }
            }
        };

        let context = ResearchContext {
            title: state
                .response
                .summary
                .as_ref()
                .map(|s| s.title.clone())
                .or_else(|| state.response.title.clone())
                .unwrap_or_default(),
            key_findings: state
                .response
                .summary
                .as_ref()
                .map(SummaryResult::key_findings)
                .unwrap_or_default(),
        };

        match self
            .research
            .assess(hits, &context, viewer.audience(), state.search_terms.clone(), self.tracer.as_ref())
            .await
        {
            Ok(research) => {
                state.response.related_research = Some(research);
                StageOutcome::Completed
            }
            Err(err) => StageOutcome::Failed(err.to_string()),
        }
    }

    /// Storage problems are logged and leave the response untouched.
    async fn persist(&self, response: &mut AnalysisResponse, user_id: &str) {
        let Some(store) = &self.store else { return };
        let Some(summary) = response.summary.clone() else {
            self.tracer.skipped(StepName::Complete, "no summary to store");
            return;
        };

        let article = NewArticle {
            url: response.url.clone(),
            title: response.title.clone().unwrap_or_else(|| summary.title.clone()),
            keywords: response.keywords.clone().unwrap_or_else(|| summary.keywords.clone()),
            summary,
            related_research: response.related_research.clone(),
        };

        let stored = match store.upsert_article(&article).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(url = %article.url, error = %err, "failed to store analysis");
                self.tracer.failed(StepName::Complete, &err.to_string());
                return;
            }
        };
        response.article_id = Some(stored.id);

        if let Err(err) = store.record_view(user_id, stored.id).await {
            tracing::warn!(user_id, article_id = stored.id, error = %err, "failed to record view");
            self.tracer.failed(StepName::Complete, &err.to_string());
            return;
        }
        self.tracer.completed(StepName::Complete, &format!("stored article {}", stored.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::Chain;
    use crate::logging::{EventKind, RecordingTracer};
    use crate::pubmed::EUtils;
    use crate::research::{PubMedSearch, ResearchClassifier};
    use crate::storage::SqliteStore;
    use crate::testing::{sample_summary, summary_json, FakeHttp, ScriptedModel, EUTILS_TEST_BASE};

    const URL: &str = "https://journal.example/articles/7";

    fn pipeline(http: &Arc<FakeHttp>, model: &Arc<ScriptedModel>, tracer: &Arc<RecordingTracer>) -> Pipeline {
        let eutils = EUtils::new(EUTILS_TEST_BASE, None);
        let research = ResearchFinder::standard(http.clone(), model.clone(), eutils.clone(), None, 10);
        Pipeline::new(
            ContentExtractor::new(http.clone(), eutils, "https://pmc.test/articles/pmid"),
            SummaryGenerator::new(model.clone()),
            Arc::new(research),
            tracer.clone(),
        )
    }

    fn page(title: &str) -> String {
        format!(
            "<html><head><title>{}</title></head><body><article>{}</article></body></html>",
            title,
            "Night-shift nurses slept less and recalled fewer words. ".repeat(6)
        )
    }

    #[tokio::test]
    async fn public_run_reaches_complete() {
        let http = Arc::new(FakeHttp::new().route(URL, 200, &page("Shift work and memory")));
        let model = Arc::new(ScriptedModel::new([summary_json("Shift work and memory", &["shift work", "memory"])]));
        let tracer = Arc::new(RecordingTracer::new());

        let response = pipeline(&http, &model, &tracer)
            .analyze(AnalysisRequest::new(URL), &Viewer::Public)
            .await;

        assert!(response.is_complete(), "unexpected {:?}", response.error);
        assert_eq!(response.title.as_deref(), Some("Shift work and memory"));
        assert_eq!(response.keywords, Some(vec!["shift work".to_string(), "memory".to_string()]));
        let research = response.related_research.unwrap();
        assert_eq!(research.supporting.len(), 1, "scholar link is the only hit");
        assert!(research.contradictory.is_empty());
        assert_eq!(model.requests().len(), 1, "public runs never call the classifier");
        assert!(response.article_id.is_none());
    }

    #[tokio::test]
    async fn resuming_at_summary_skips_the_fetch() {
        let http = Arc::new(FakeHttp::new());
        let model = Arc::new(ScriptedModel::new([summary_json("Resumed", &["melatonin"])]));
        let tracer = Arc::new(RecordingTracer::new());

        let request = AnalysisRequest {
            title: Some("Resumed".into()),
            content: Some("Melatonin shortened sleep onset in older adults.".into()),
            ..AnalysisRequest::new(URL).starting_at(StepName::GeneratingSummary)
        };
        let response = pipeline(&http, &model, &tracer).analyze(request, &Viewer::Public).await;

        assert_eq!(response.current_step, StepName::Complete);
        assert!(http.requests().iter().all(|u| u != URL));
        assert!(tracer.events().iter().all(|e| e.stage >= StepName::GeneratingSummary));
    }

    #[tokio::test]
    async fn resuming_without_inputs_reports_the_requested_step() {
        let http = Arc::new(FakeHttp::new());
        let model = Arc::new(ScriptedModel::default());
        let tracer = Arc::new(RecordingTracer::new());
        let pipeline = pipeline(&http, &model, &tracer);

        let response = pipeline
            .analyze(AnalysisRequest::new(URL).starting_at(StepName::GeneratingSummary), &Viewer::Public)
            .await;
        assert_eq!(response.current_step, StepName::GeneratingSummary);
        assert!(response.error.unwrap().contains("without article content"));

        let response = pipeline
            .analyze(AnalysisRequest::new(URL).starting_at(StepName::ExtractingKeywords), &Viewer::Public)
            .await;
        assert_eq!(response.current_step, StepName::ExtractingKeywords);
        assert!(response.error.is_some());
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn summary_failure_keeps_partial_results() {
        let http = Arc::new(FakeHttp::new().route(URL, 200, &page("Shift work")));
        let model = Arc::new(ScriptedModel::new([r#"{"title": "T", "visualSummary": []}"#]));
        let tracer = Arc::new(RecordingTracer::new());

        let response = pipeline(&http, &model, &tracer)
            .analyze(AnalysisRequest::new(URL), &Viewer::Public)
            .await;

        assert_eq!(response.current_step, StepName::GeneratingSummary);
        assert!(response.content.is_some());
        assert!(response.summary.is_none());
        assert!(response.error.is_some());
        assert_eq!(tracer.events_of(EventKind::Failed).last().unwrap().stage, StepName::GeneratingSummary);
    }

    #[tokio::test]
    async fn research_failure_still_completes() {
        let http = Arc::new(FakeHttp::new());
        let model = Arc::new(ScriptedModel::default());
        let tracer = Arc::new(RecordingTracer::new());
        let eutils = EUtils::new(EUTILS_TEST_BASE, None);
        let research = ResearchFinder::new(
            Chain::new().with(PubMedSearch::new(http.clone(), eutils.clone())),
            ResearchClassifier::new(model.clone()),
            10,
        );
        let pipeline = Pipeline::new(
            ContentExtractor::new(http.clone(), eutils, "https://pmc.test/articles/pmid"),
            SummaryGenerator::new(model.clone()),
            Arc::new(research),
            tracer.clone(),
        );

        let request = AnalysisRequest {
            summary: Some(sample_summary("Sleep and memory")),
            ..AnalysisRequest::new(URL).starting_at(StepName::ExtractingKeywords)
        };
        let response = pipeline.analyze(request, &Viewer::Member("u1".into())).await;

        assert_eq!(response.current_step, StepName::Complete);
        assert!(response.error.as_deref().unwrap().starts_with("Research search unavailable"));
        let research = response.related_research.unwrap();
        assert!(research.is_empty());
        assert_eq!(research.search_keywords, vec!["sleep".to_string(), "memory".to_string()]);
        assert!(response.article_id.is_none());
    }

    #[tokio::test]
    async fn empty_keywords_skip_the_search() {
        let http = Arc::new(FakeHttp::new());
        let model = Arc::new(ScriptedModel::default());
        let tracer = Arc::new(RecordingTracer::new());

        let request = AnalysisRequest {
            keywords: Some(vec!["  ".into()]),
            ..AnalysisRequest::new(URL).starting_at(StepName::SearchingSimilarArticles)
        };
        let response = pipeline(&http, &model, &tracer).analyze(request, &Viewer::Public).await;

        assert!(response.is_complete());
        assert!(response.related_research.unwrap().is_empty());
        assert!(http.requests().is_empty());
        assert_eq!(tracer.events_of(EventKind::Skipped).len(), 2);
    }

    #[tokio::test]
    async fn step_cursor_never_moves_backwards() {
        let http = Arc::new(FakeHttp::new().route(URL, 200, &page("Shift work")));
        let model = Arc::new(ScriptedModel::new([summary_json("Shift work", &["shift work"])]));
        let tracer = Arc::new(RecordingTracer::new());

        pipeline(&http, &model, &tracer)
            .analyze(AnalysisRequest::new(URL), &Viewer::Public)
            .await;

        let stages: Vec<StepName> = tracer.events().iter().map(|e| e.stage).collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]), "{:?}", stages);
    }

    #[tokio::test]
    async fn only_results_produced_in_the_call_are_stored() {
        let http = Arc::new(FakeHttp::new().route(URL, 200, &page("Shift work")));
        let model = Arc::new(ScriptedModel::new([summary_json("Shift work", &["shift work"])]));
        let tracer = Arc::new(RecordingTracer::new());
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let pipeline = pipeline(&http, &model, &tracer).with_store(store.clone());
        let member = Viewer::Member("u1".into());

        for step in [StepName::Complete, StepName::SearchingSimilarArticles] {
            let request = AnalysisRequest {
                summary: Some(sample_summary("Supplied by the caller")),
                ..AnalysisRequest::new(URL).starting_at(step)
            };
            let response = pipeline.analyze(request, &member).await;
            assert!(response.is_complete(), "{:?}", response.error);
            assert!(response.article_id.is_none());
        }
        assert_eq!(store.article_count().await.unwrap(), 0);
        assert!(model.requests().is_empty());

        let response = pipeline.analyze(AnalysisRequest::new(URL), &member).await;
        assert!(response.article_id.is_some());
        let stored = store.find_by_url(URL).await.unwrap().unwrap();
        assert_eq!(stored.summary.title, "Shift work");
    }

    #[test]
    fn request_accepts_resume_payload() {
        let request: AnalysisRequest = serde_json::from_str(
            r#"{"url": "https://x.com/a", "step": "extractingKeywords", "keywords": ["a"]}"#,
        )
        .unwrap();
        assert_eq!(request.step, Some(StepName::ExtractingKeywords));
        assert_eq!(request.keywords, Some(vec!["a".to_string()]));

        let json = serde_json::to_value(AnalysisResponse {
            current_step: StepName::Complete,
            url: "https://x.com/a".into(),
            title: None,
            content: None,
            summary: None,
            keywords: None,
            related_research: None,
            error: None,
            article_id: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"currentStep": "complete", "url": "https://x.com/a"}));
    }
}
