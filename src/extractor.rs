use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fallback::{Chain, Skip, Strategy};
use crate::http::HttpClient;
use crate::logging::Tracer;
use crate::pubmed::{self, EUtils};
use crate::scraper::{extract_page, MIN_CONTENT_CHARS};
use crate::step::StepName;

const UNTITLED: &str = "Untitled article";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedArticle {
    pub title: String,
    pub content: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub error: String,
    pub url: String,
}

pub type ExtractedContent = Result<ExtractedArticle, ExtractionFailure>;

/// What the extraction strategies work on.
#[derive(Debug, Clone)]
pub struct ArticleTarget {
    pub url: String,
    pub pmid: Option<String>,
}

impl ArticleTarget {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            pmid: pubmed::detect_pmid(url),
        }
    }

    fn require_pmid(&self) -> Result<&str, Skip> {
        self.pmid.as_deref().ok_or_else(|| Skip::new("not a PubMed article"))
    }
}

/// Fetches an article and locates its title and body text.
///
/// PubMed links try the PMC full-text mirror, then the E-utilities record
/// merged with the page text, then the page itself. Other links go straight
/// to the page.
pub struct ContentExtractor {
    chain: Chain<ArticleTarget, ExtractedArticle>,
}

impl ContentExtractor {
    pub fn new(http: Arc<dyn HttpClient>, eutils: EUtils, pmc_base_url: impl Into<String>) -> Self {
        let chain = Chain::new()
            .with(PmcMirror {
                http: http.clone(),
                base_url: pmc_base_url.into(),
            })
            .with(PubMedRecordSource {
                http: http.clone(),
                eutils,
            })
            .with(GenericPage { http });
        Self { chain }
    }

    pub async fn extract(&self, url: &str, tracer: &dyn Tracer) -> ExtractedContent {
        let target = ArticleTarget::new(url);
        tracer.started(StepName::RetrievingContent, url);

        match self.chain.run(&target, StepName::RetrievingContent, tracer).await {
            Ok(resolved) => {
                tracer.completed(
                    StepName::RetrievingContent,
                    &format!("{} via {} ({} chars)", url, resolved.strategy, resolved.value.content.len()),
                );
                Ok(resolved.value)
            }
            Err(exhausted) => {
                let error = exhausted
                    .last_reason()
                    .unwrap_or("No extraction strategy available")
                    .to_string();
                tracer.failed(StepName::RetrievingContent, &error);
                Err(ExtractionFailure {
                    error,
                    url: url.to_string(),
                })
            }
        }
    }
}

struct PmcMirror {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

#[async_trait]
impl Strategy<ArticleTarget, ExtractedArticle> for PmcMirror {
    fn name(&self) -> &'static str {
        "pmc-mirror"
    }

    async fn attempt(&self, target: &ArticleTarget) -> Result<ExtractedArticle, Skip> {
        let pmid = target.require_pmid()?;
        let mirror = pubmed::pmc_mirror_url(&self.base_url, pmid);

        let page = self
            .http
            .get(&mirror)
            .await
            .map_err(|e| Skip::new(format!("PMC request failed: {}", e)))?;
        if !page.is_success() {
            return Err(Skip::new(format!("PMC returned HTTP {}", page.status)));
        }

        let text = extract_page(&page.body);
        if text.content.chars().count() <= MIN_CONTENT_CHARS {
            return Err(Skip::new("PMC page has no full text"));
        }

        let title = text
            .title
            .map(|t| t.trim_end_matches(" - PMC").to_string())
            .unwrap_or_else(|| UNTITLED.to_string());

        Ok(ExtractedArticle {
            title,
            content: text.content,
            url: target.url.clone(),
        })
    }
}

struct PubMedRecordSource {
    http: Arc<dyn HttpClient>,
    eutils: EUtils,
}

#[async_trait]
impl Strategy<ArticleTarget, ExtractedArticle> for PubMedRecordSource {
    fn name(&self) -> &'static str {
        "pubmed-efetch"
    }

    async fn attempt(&self, target: &ArticleTarget) -> Result<ExtractedArticle, Skip> {
        let pmid = target.require_pmid()?;
        let efetch = self.eutils.efetch_url(pmid).map_err(|e| Skip::new(e.to_string()))?;

        let response = self
            .http
            .get(&efetch)
            .await
            .map_err(|e| Skip::new(format!("efetch request failed: {}", e)))?;
        if !response.is_success() {
            return Err(Skip::new(format!("efetch returned HTTP {}", response.status)));
        }

        let record = pubmed::parse_efetch(&response.body);
        if record.is_empty() {
            return Err(Skip::new("efetch record has no title or abstract"));
        }

        // The PubMed page adds keywords, MeSH terms and affiliations the XML lacks.
        let page = match self.http.get(&target.url).await {
            Ok(page) if page.is_success() => Some(extract_page(&page.body)),
            _ => None,
        };

        let mut sections = Vec::new();
        if let Some(abstract_text) = record.abstract_text.as_deref() {
            sections.push(format!("Abstract: {}", abstract_text));
        }
        if let Some(page_text) = page.as_ref().map(|p| p.content.as_str()).filter(|c| !c.is_empty()) {
            sections.push(page_text.to_string());
        }
        if sections.is_empty() {
            return Err(Skip::new("efetch record has no usable text"));
        }

        let title = record
            .title
            .or_else(|| page.and_then(|p| p.title))
            .unwrap_or_else(|| UNTITLED.to_string());

        Ok(ExtractedArticle {
            title,
            content: sections.join("\n\n"),
            url: target.url.clone(),
        })
    }
}

struct GenericPage {
    http: Arc<dyn HttpClient>,
}

#[async_trait]
impl Strategy<ArticleTarget, ExtractedArticle> for GenericPage {
    fn name(&self) -> &'static str {
        "page"
    }

    async fn attempt(&self, target: &ArticleTarget) -> Result<ExtractedArticle, Skip> {
        let page = self
            .http
            .get(&target.url)
            .await
            .map_err(|e| Skip::new(format!("Failed to fetch {}: {}", target.url, e)))?;
        if !page.is_success() {
            return Err(Skip::new(format!("HTTP {} fetching {}", page.status, target.url)));
        }

        let text = extract_page(&page.body);
        if text.content.is_empty() {
            return Err(Skip::new(format!("No readable content found at {}", target.url)));
        }

        Ok(ExtractedArticle {
            title: text.title.unwrap_or_else(|| UNTITLED.to_string()),
            content: text.content,
            url: target.url.clone(),
        })
    }
}
