use crate::parser::parse_model_response;
use crate::types::{AnalysisError, ModelResponse, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Instruction prompt sent with every segment. Asks for the fixed wire schema
/// the parser validates: two integer counts plus two timestamp-string lists,
/// segment-relative decimal seconds.
pub const SHOT_COUNT_PROMPT: &str = "\
You are an expert basketball video analyst. Count shot attempts and made \
shots in this clip. A shot attempt is any shooting motion where the ball \
leaves the shooter's hands toward the basket; a made shot requires the ball \
clearly passing through the hoop. Timestamps are seconds from the start of \
this clip, as decimal strings.

Output VALID JSON ONLY, no markdown fences, exactly this schema:
{
  \"shots_attempted\": 0,
  \"shots_made\": 0,
  \"shot_attempt_events\": [\"0.0\"],
  \"shot_made_events\": [\"0.0\"]
}";

/// Per-model capability record: generation knobs keyed off the model
/// identifier, looked up from a table instead of branching at call sites.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: String,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub response_mime_type: &'static str,
}

impl ModelSpec {
    /// Built-in capability table for the hosted models this harness compares.
    pub fn for_id(id: &str) -> Result<Self> {
        match id {
            "gemini-2.5-pro" => Ok(Self {
                id: id.to_string(),
                temperature: Some(0.0),
                max_output_tokens: Some(2048),
                response_mime_type: "application/json",
            }),
            "gemini-3-pro-preview" => Ok(Self {
                id: id.to_string(),
                // The preview model rejects explicit temperature overrides.
                temperature: None,
                max_output_tokens: Some(4096),
                response_mime_type: "application/json",
            }),
            other => Err(AnalysisError::UnknownModel(other.to_string())),
        }
    }
}

/// A hosted vision-capable model: prompt + video payload in, raw text out.
///
/// Implementations are black boxes; a single failed call yields a single
/// error, with no retries or backoff at this layer.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Identifier used as the key in accumulated results.
    fn model_id(&self) -> String;

    /// Submit one generation request for one video segment.
    async fn generate(&self, prompt: &str, video_bytes: &[u8]) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Gemini REST client
// ---------------------------------------------------------------------------

/// Shared client for the Gemini generateContent REST API.
///
/// Constructed explicitly and injected wherever a model call is made; the
/// API key and HTTP client are never ambient global state.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub const DEFAULT_BASE_URL: &'static str =
        "https://generativelanguage.googleapis.com/v1beta";

    /// Build a client with an explicit per-call timeout. A hung call expires
    /// into an error for that (model, segment) pair instead of blocking the
    /// run indefinitely.
    pub fn new(api_key: String, call_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(call_timeout).build()?;
        Ok(Self {
            http,
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (test servers).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn generate(&self, spec: &ModelSpec, prompt: &str, video_bytes: &[u8]) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, spec.id, self.api_key
        );

        let mut generation_config = json!({
            "responseMimeType": spec.response_mime_type,
        });
        if let Some(t) = spec.temperature {
            generation_config["temperature"] = json!(t);
        }
        if let Some(m) = spec.max_output_tokens {
            generation_config["maxOutputTokens"] = json!(m);
        }

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": {
                        "mime_type": "video/mp4",
                        "data": BASE64.encode(video_bytes),
                    }},
                ],
            }],
            "generationConfig": generation_config,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ModelCall {
                model: spec.id.clone(),
                cause: format!("HTTP {}: {}", status, detail.trim()),
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        if let Some(usage) = &parsed.usage_metadata {
            info!(
                "Model {} tokens (in/out/total): {}/{}/{}",
                spec.id,
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count
            );
        }
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text));

        match text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(AnalysisError::ModelCall {
                model: spec.id.clone(),
                cause: "response contained no candidate text".to_string(),
            }),
        }
    }
}

/// One configured Gemini model: a capability record bound to a shared client.
pub struct GeminiVisionModel {
    client: GeminiClient,
    spec: ModelSpec,
}

impl GeminiVisionModel {
    pub fn new(client: GeminiClient, spec: ModelSpec) -> Self {
        Self { client, spec }
    }
}

#[async_trait]
impl VisionModel for GeminiVisionModel {
    fn model_id(&self) -> String {
        self.spec.id.clone()
    }

    async fn generate(&self, prompt: &str, video_bytes: &[u8]) -> Result<String> {
        self.client.generate(&self.spec, prompt, video_bytes).await
    }
}

// ---------------------------------------------------------------------------
// Mock model for development and testing
// ---------------------------------------------------------------------------

/// Mock vision model that replays scripted responses in order.
///
/// Once the script is exhausted it repeats the final entry, so a single-entry
/// script behaves as a fixed responder. An `Err` entry simulates a failed
/// call.
pub struct MockVisionModel {
    id: String,
    script: Vec<std::result::Result<String, String>>,
    next: std::sync::Mutex<usize>,
}

impl MockVisionModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Vec::new(),
            next: std::sync::Mutex::new(0),
        }
    }

    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.script.push(Ok(text.into()));
        self
    }

    pub fn with_failure(mut self, cause: impl Into<String>) -> Self {
        self.script.push(Err(cause.into()));
        self
    }
}

#[async_trait]
impl VisionModel for MockVisionModel {
    fn model_id(&self) -> String {
        self.id.clone()
    }

    async fn generate(&self, _prompt: &str, _video_bytes: &[u8]) -> Result<String> {
        let index = {
            let mut next = self.next.lock().unwrap();
            let index = (*next).min(self.script.len().saturating_sub(1));
            *next += 1;
            index
        };
        match self.script.get(index) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(cause)) => Err(AnalysisError::ModelCall {
                model: self.id.clone(),
                cause: cause.clone(),
            }),
            None => Err(AnalysisError::ModelCall {
                model: self.id.clone(),
                cause: "mock has no scripted responses".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry and caller
// ---------------------------------------------------------------------------

/// Registry of the models configured for one comparison.
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn VisionModel>>,
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, model: Arc<dyn VisionModel>) {
        let id = model.model_id();
        info!("Registering vision model: {}", id);
        if !self.models.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.models.insert(id, model);
    }

    /// Registered models in registration order.
    pub fn models(&self) -> Vec<Arc<dyn VisionModel>> {
        self.order
            .iter()
            .filter_map(|id| self.models.get(id).cloned())
            .collect()
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Build a registry of Gemini models from the capability table.
    pub fn from_gemini_ids(client: &GeminiClient, ids: &[String]) -> Result<Self> {
        let mut registry = Self::new();
        for id in ids {
            let spec = ModelSpec::for_id(id)?;
            registry.register(Arc::new(GeminiVisionModel::new(client.clone(), spec)));
        }
        Ok(registry)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one model invocation produced: the validated outcome plus the
/// raw response text, which is kept even when validation fails. The raw text
/// is the primary debugging artifact for a harness that exists to
/// characterize free-form model output.
pub struct CallRecord {
    /// Whatever text the model returned, if the call got that far.
    pub raw_text: Option<String>,
    pub outcome: Result<ModelResponse>,
}

/// Invoke one model on one segment payload and validate the response.
///
/// The outcome is a validated [`ModelResponse`] or an error carrying the
/// model identifier and the underlying cause. Never a zero-filled response
/// for a failed call.
pub async fn call_model(model: &dyn VisionModel, prompt: &str, video_bytes: &[u8]) -> CallRecord {
    let started = Instant::now();
    let model_id = model.model_id();

    let text = match model.generate(prompt, video_bytes).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Model {} call failed: {}", model_id, e);
            return CallRecord {
                raw_text: None,
                outcome: Err(e),
            };
        }
    };

    debug!(
        "Model {} responded in {:.2}s ({} chars)",
        model_id,
        started.elapsed().as_secs_f64(),
        text.len()
    );

    let outcome = parse_model_response(&text)
        .map(|(response, _)| response)
        .map_err(|e| AnalysisError::ModelCall {
            model: model_id,
            cause: e.to_string(),
        });

    CallRecord {
        raw_text: Some(text),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_script_then_repeats_last() {
        let model = MockVisionModel::new("mock")
            .with_response("first")
            .with_response("second");
        assert_eq!(model.generate("p", b"v").await.unwrap(), "first");
        assert_eq!(model.generate("p", b"v").await.unwrap(), "second");
        assert_eq!(model.generate("p", b"v").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn call_model_surfaces_parse_failure_with_model_id() {
        let model = MockVisionModel::new("flaky").with_response("not json at all");
        let record = call_model(&model, SHOT_COUNT_PROMPT, b"payload").await;
        match record.outcome {
            Err(AnalysisError::ModelCall { model, cause }) => {
                assert_eq!(model, "flaky");
                assert!(cause.contains("parse"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // The unparseable text itself is preserved for the session log.
        assert_eq!(record.raw_text.as_deref(), Some("not json at all"));
    }

    #[tokio::test]
    async fn failed_transport_leaves_no_raw_text() {
        let model = MockVisionModel::new("down").with_failure("connection refused");
        let record = call_model(&model, SHOT_COUNT_PROMPT, b"payload").await;
        assert!(record.raw_text.is_none());
        assert!(record.outcome.is_err());
    }

    #[test]
    fn capability_table_rejects_unknown_ids() {
        assert!(ModelSpec::for_id("gemini-2.5-pro").is_ok());
        assert!(matches!(
            ModelSpec::for_id("gpt-5-vision-unknown"),
            Err(AnalysisError::UnknownModel(_))
        ));
    }
}
