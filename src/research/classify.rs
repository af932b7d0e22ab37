use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::{CandidateArticle, Classification, ClassifiedArticle, ResearchContext};
use crate::error::Result;
use crate::llm::{generate_object, CompletionRequest, LanguageModel, Validate};

pub const PUBLIC_REASON: &str = "Related research found by keyword search";
const UNASSESSED_REASON: &str = "Not assessed by the classifier";
pub const SEARCH_LINK_REASON: &str = "Link to a search page, not an individual article";

const SYSTEM_PROMPT: &str = r#"You are a careful scientific reviewer. You will receive a main article (title and key findings) and a numbered list of other articles.
For every numbered article decide whether it is Supporting (its findings agree with or extend the main article), Contradictory (its findings disagree with or challenge the main article) or Neutral (related but neither).
Respond with a single JSON object and nothing else:
{"classifications": [{"index": 0, "classification": "Supporting", "reason": "one sentence"}]}
Include every index exactly once."#;

#[derive(Debug, Deserialize)]
struct ClassificationBatch {
    classifications: Vec<Verdict>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    index: usize,
    classification: Classification,
    #[serde(default)]
    reason: String,
}

impl Validate for ClassificationBatch {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.classifications.is_empty() {
            return Err("classifications has no entries".to_string());
        }
        Ok(())
    }
}

/// Tags candidates as supporting, contradictory or neutral in one model call.
pub struct ResearchClassifier {
    model: Arc<dyn LanguageModel>,
}

impl ResearchClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn classify(
        &self,
        context: &ResearchContext,
        candidates: Vec<CandidateArticle>,
    ) -> Result<Vec<ClassifiedArticle>> {
        let request = CompletionRequest::new(SYSTEM_PROMPT, build_prompt(context, &candidates))
            .temperature(0.1)
            .max_tokens(3_000);
        let batch: ClassificationBatch = generate_object(self.model.as_ref(), request).await?;

        let mut verdicts: HashMap<usize, Verdict> = HashMap::new();
        for verdict in batch.classifications {
            if verdict.index < candidates.len() {
                verdicts.entry(verdict.index).or_insert(verdict);
            }
        }

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(idx, article)| match verdicts.remove(&idx) {
                Some(verdict) => ClassifiedArticle {
                    article,
                    classification: verdict.classification,
                    classification_reason: if verdict.reason.trim().is_empty() {
                        UNASSESSED_REASON.to_string()
                    } else {
                        verdict.reason.trim().to_string()
                    },
                },
                None => ClassifiedArticle {
                    article,
                    classification: Classification::Neutral,
                    classification_reason: UNASSESSED_REASON.to_string(),
                },
            })
            .collect())
    }
}

/// Search-page links carry nothing the model could judge.
pub(super) fn as_search_links(links: Vec<CandidateArticle>) -> Vec<ClassifiedArticle> {
    links
        .into_iter()
        .map(|article| ClassifiedArticle {
            article,
            classification: Classification::Neutral,
            classification_reason: SEARCH_LINK_REASON.to_string(),
        })
        .collect()
}

/// Public callers get every hit as supporting context, without a model call.
pub(super) fn as_supporting(candidates: Vec<CandidateArticle>) -> Vec<ClassifiedArticle> {
    candidates
        .into_iter()
        .map(|article| ClassifiedArticle {
            article,
            classification: Classification::Supporting,
            classification_reason: PUBLIC_REASON.to_string(),
        })
        .collect()
}

fn build_prompt(context: &ResearchContext, candidates: &[CandidateArticle]) -> String {
    let mut prompt = String::new();
    prompt.push_str("MAIN ARTICLE\nTitle: ");
    prompt.push_str(if context.title.is_empty() { "(untitled)" } else { context.title.as_str() });
    prompt.push_str("\nKey findings:\n");
    for finding in &context.key_findings {
        prompt.push_str("- ");
        prompt.push_str(finding);
        prompt.push('\n');
    }

    prompt.push_str("\nOTHER ARTICLES\n");
    for (idx, article) in candidates.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}", idx, article.title));
        if let Some(journal) = &article.journal {
            prompt.push_str(&format!(" | {}", journal));
        }
        if let Some(date) = &article.pub_date {
            prompt.push_str(&format!(" | {}", date));
        }
        if !article.authors.is_empty() {
            let shown: Vec<&str> = article.authors.iter().take(3).map(String::as_str).collect();
            prompt.push_str(&format!(" | {}", shown.join(", ")));
        }
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testing::{candidate, ScriptedModel};

    #[tokio::test]
    async fn unknown_and_missing_indices_become_neutral() {
        let model = Arc::new(ScriptedModel::new([r#"{"classifications": [
            {"index": 1, "classification": "contradictory", "reason": " Opposite effect. "},
            {"index": 1, "classification": "Supporting", "reason": "duplicate"},
            {"index": 9, "classification": "Supporting", "reason": "out of range"}
        ]}"#]));
        let classifier = ResearchClassifier::new(model.clone());

        let classified = classifier
            .classify(&ResearchContext::default(), vec![candidate("a"), candidate("b")])
            .await
            .unwrap();

        assert_eq!(classified[0].classification, Classification::Neutral);
        assert_eq!(classified[0].classification_reason, UNASSESSED_REASON);
        assert_eq!(classified[1].classification, Classification::Contradictory);
        assert_eq!(classified[1].classification_reason, "Opposite effect.");
        assert!(model.requests()[0].prompt.contains("[1] Article b"));
    }

    #[tokio::test]
    async fn unknown_labels_are_schema_errors() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"classifications": [{"index": 0, "classification": "Maybe"}]}"#,
        ]));
        let err = ResearchClassifier::new(model)
            .classify(&ResearchContext::default(), vec![candidate("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaError(_)));
    }
}
