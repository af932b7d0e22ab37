use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::{generate_object, CompletionRequest, LanguageModel, Validate};
use crate::logging::Tracer;
use crate::scraper::truncate_chars;
use crate::step::StepName;

const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 2_500;

const SYSTEM_PROMPT: &str = r#"You are a scientific research assistant who turns research articles into accurate, accessible summaries.
Respond with a single JSON object and nothing else, using exactly this shape:
{
  "title": "the article's title",
  "visualSummary": [{"emoji": "one emoji", "point": "one key finding in a single sentence"}],
  "keywords": ["5 to 10 specific scientific keywords or phrases"],
  "cohortAnalysis": {
    "studyType": "e.g. randomized controlled trial, cohort study, meta-analysis",
    "duration": "how long the study ran",
    "dateRange": "when data was collected",
    "cohortSize": "number of participants or samples",
    "demographics": "who was studied",
    "notes": ["methodological strengths or limitations"]
  }
}
Give 3 to 7 visualSummary entries. Omit any cohortAnalysis field the article does not report instead of guessing."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPoint {
    pub emoji: String,
    pub point: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographics: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Structured summary of one article. Keywords are kept as the model produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    pub title: String,
    pub visual_summary: Vec<SummaryPoint>,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub cohort_analysis: CohortAnalysis,
}

impl SummaryResult {
    pub fn key_findings(&self) -> Vec<String> {
        self.visual_summary.iter().map(|p| p.point.clone()).collect()
    }
}

impl Validate for SummaryResult {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("summary title is empty".to_string());
        }
        if self.visual_summary.is_empty() {
            return Err("visualSummary has no entries".to_string());
        }
        if let Some(idx) = self.visual_summary.iter().position(|p| p.point.trim().is_empty()) {
            return Err(format!("visualSummary[{}].point is empty", idx));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err("keywords has no entries".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSummary {
    pub summary: SummaryResult,
    pub keywords: Vec<String>,
}

pub struct SummaryGenerator {
    model: Arc<dyn LanguageModel>,
}

impl SummaryGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// One model call over the first `budget` characters of `content`.
    pub async fn generate(
        &self,
        title: &str,
        content: &str,
        budget: usize,
        tracer: &dyn Tracer,
    ) -> Result<GeneratedSummary> {
        let excerpt = truncate_chars(content, budget);
        tracer.started(
            StepName::GeneratingSummary,
            &format!("{} of {} chars", excerpt.chars().count(), content.chars().count()),
        );

        let request = CompletionRequest::new(SYSTEM_PROMPT, build_prompt(title, excerpt))
            .temperature(SUMMARY_TEMPERATURE)
            .max_tokens(SUMMARY_MAX_TOKENS);

        match generate_object::<SummaryResult>(self.model.as_ref(), request).await {
            Ok(summary) => {
                tracer.completed(
                    StepName::GeneratingSummary,
                    &format!("{} findings, {} keywords", summary.visual_summary.len(), summary.keywords.len()),
                );
                let keywords = summary.keywords.clone();
                Ok(GeneratedSummary { summary, keywords })
            }
            Err(err) => {
                tracer.failed(StepName::GeneratingSummary, &err.to_string());
                Err(err)
            }
        }
    }
}

pub fn build_prompt(title: &str, content: &str) -> String {
    let mut result = String::with_capacity(content.len() + title.len() + 64);
    result.push_str("Summarize the following scientific article.\n\nTitle: ");
    result.push_str(title);
    result.push_str("\n\nContent:\n");
    result.push_str(content);
    result
}
