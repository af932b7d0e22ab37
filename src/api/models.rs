use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::research::RelatedResearch;

/// Body of `POST /api/related-research`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedResearchRequest {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
}

/// Failure body for the research route: the usual shape with empty lists plus `error`.
#[derive(Debug, Serialize)]
pub struct ResearchErrorBody {
    #[serde(flatten)]
    pub research: RelatedResearch,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct BookmarkRequest {
    #[serde(default)]
    pub url: String,
    pub bookmarked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub stored_articles: i64,
    pub checked_at: DateTime<Utc>,
}
