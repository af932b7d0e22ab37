use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::{Result, AppError};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a bare JSON object.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.2,
            max_tokens: 2_000,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Structured output that can check itself beyond what deserialization enforces.
pub trait Validate {
    fn validate(&self) -> std::result::Result<(), String>;
}

/// Runs one completion and decodes it into `T`.
///
/// Output that is not valid JSON, does not fit `T`, or fails `T::validate`
/// surfaces as `AppError::SchemaError`. There is no repair attempt.
pub async fn generate_object<T>(model: &dyn LanguageModel, request: CompletionRequest) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let raw = model.complete(&request.json()).await?;
    let object: T = serde_json::from_str(json_payload(&raw))
        .map_err(|e| AppError::SchemaError(format!("model output did not match schema: {}", e)))?;
    object.validate().map_err(AppError::SchemaError)?;
    Ok(object)
}

/// Strips Markdown code fences and any prose around the outermost JSON value.
pub fn json_payload(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    if text.starts_with('{') || text.starts_with('[') {
        return text;
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat completions over the OpenRouter API.
pub struct OpenRouterModel {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    site_url: Option<String>,
    site_name: Option<String>,
}

impl std::fmt::Debug for OpenRouterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterModel")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenRouterModel {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            site_url: None,
            site_name: Some("Sciensaurus".to_string()),
        }
    }

    pub fn with_site_url(mut self, site_url: Option<String>) -> Self {
        self.site_url = site_url;
        self
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);

        // Add optional headers if provided
        if let Some(url) = &self.site_url {
            http = http.header("HTTP-Referer", url);
        }

        if let Some(name) = &self.site_name {
            http = http.header("X-Title", name);
        }

        let res = http
            .send()
            .await
            .map_err(|e| AppError::LlmError(format!("request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(AppError::LlmError(format!("provider returned {}: {}", status, detail)));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| AppError::LlmError(format!("Invalid response format from LLM: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::LlmError("Invalid response format from LLM".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        label: String,
    }

    impl Validate for Verdict {
        fn validate(&self) -> std::result::Result<(), String> {
            if self.label.is_empty() {
                Err("label must not be empty".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn strips_fences_and_prose() {
        assert_eq!(json_payload("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(json_payload("```\n[1]\n```"), "[1]");
        assert_eq!(json_payload("Here you go: {\"a\":1} hope it helps"), "{\"a\":1}");
        assert_eq!(json_payload("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn decodes_and_requests_json_mode() {
        let model = ScriptedModel::new(["{\"label\": \"ok\"}"]);
        let verdict: Verdict = generate_object(&model, CompletionRequest::new("sys", "user")).await.unwrap();
        assert_eq!(verdict.label, "ok");
        assert!(model.requests()[0].json_mode);
    }

    #[tokio::test]
    async fn schema_violations_are_errors() {
        let model = ScriptedModel::new(["{\"other\": 1}", "{\"label\": \"\"}", "not json at all"]);
        for _ in 0..3 {
            let err = generate_object::<Verdict>(&model, CompletionRequest::new("s", "u")).await.unwrap_err();
            assert!(matches!(err, AppError::SchemaError(_)), "unexpected {err:?}");
        }
    }
}
