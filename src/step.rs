use serde::{Deserialize, Serialize};

/// Progress cursor of one analysis. Variant order is the only valid progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepName {
    RetrievingContent = 1,
    GeneratingSummary = 2,
    ExtractingKeywords = 3,
    SearchingSimilarArticles = 4,
    AssessingResearch = 5,
    Complete = 6,
}

impl StepName {
    pub const ALL: [StepName; 6] = [
        StepName::RetrievingContent,
        StepName::GeneratingSummary,
        StepName::ExtractingKeywords,
        StepName::SearchingSimilarArticles,
        StepName::AssessingResearch,
        StepName::Complete,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::RetrievingContent => "retrievingContent",
            StepName::GeneratingSummary => "generatingSummary",
            StepName::ExtractingKeywords => "extractingKeywords",
            StepName::SearchingSimilarArticles => "searchingSimilarArticles",
            StepName::AssessingResearch => "assessingResearch",
            StepName::Complete => "complete",
        }
    }

    pub fn next(self) -> StepName {
        match self {
            StepName::RetrievingContent => StepName::GeneratingSummary,
            StepName::GeneratingSummary => StepName::ExtractingKeywords,
            StepName::ExtractingKeywords => StepName::SearchingSimilarArticles,
            StepName::SearchingSimilarArticles => StepName::AssessingResearch,
            StepName::AssessingResearch | StepName::Complete => StepName::Complete,
        }
    }

    /// Failures in these stages end the analysis as `Complete` so clients stop polling.
    pub fn is_research(self) -> bool {
        matches!(self, StepName::SearchingSimilarArticles | StepName::AssessingResearch)
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// The stage's guard found nothing to do.
    Skipped(String),
    Failed(String),
}

/// Pure transition of the step cursor. The result is never earlier than `current`.
pub fn advance(current: StepName, outcome: &StageOutcome) -> StepName {
    match outcome {
        StageOutcome::Completed | StageOutcome::Skipped(_) => current.next(),
        StageOutcome::Failed(_) if current.is_research() => StepName::Complete,
        StageOutcome::Failed(_) => current,
    }
}
