pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod http;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod pubmed;
pub mod research;
pub mod scraper;
pub mod step;
pub mod storage;
pub mod summary;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use std::sync::Arc;

use config::Config;
use extractor::ContentExtractor;
use http::HttpClient;
use llm::LanguageModel;
use logging::Tracer;
use pipeline::{ContentBudgets, Pipeline};
use pubmed::EUtils;
use research::ResearchFinder;
use storage::ArticleStore;
use summary::SummaryGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub research: Arc<ResearchFinder>,
    pub store: Arc<dyn ArticleStore>,
    pub tracer: Arc<dyn Tracer>,
}

impl AppState {
    /// Wires the production stages around the given network, model and storage seams.
    pub fn assemble(
        config: Config,
        http: Arc<dyn HttpClient>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn ArticleStore>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        let eutils = EUtils::new(&config.eutils_base_url, config.ncbi_api_key.clone());
        let research = Arc::new(ResearchFinder::standard(
            http.clone(),
            model.clone(),
            eutils.clone(),
            config.tavily_api_key.clone(),
            config.max_search_results,
        ));
        let pipeline = Pipeline::new(
            ContentExtractor::new(http, eutils, config.pmc_base_url.clone()),
            SummaryGenerator::new(model),
            research.clone(),
            tracer.clone(),
        )
        .with_store(store.clone())
        .with_budgets(ContentBudgets {
            public: config.public_content_budget,
            member: config.member_content_budget,
        })
        .with_max_keywords(config.max_search_results);

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            research,
            store,
            tracer,
        }
    }
}
