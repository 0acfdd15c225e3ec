//! LLM provider contract (spec §6). The concrete HTTP implementation talks
//! to an OpenAI-compatible "responses" endpoint; the trait exists so tests
//! can substitute a fake client without a network.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

/// Parameters for a single model call, carried by `LoopStage` (spec §4.2).
#[derive(Debug, Clone)]
pub struct CallParams {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Token accounting returned alongside the completion, used to compute the
/// refund handed back to the reserving bucket(s).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub response_id: String,
    pub usage: Usage,
}

/// An LLM provider capable of the single call shape this pipeline needs:
/// a system instructions string, a user prompt, and an optional id to chain
/// onto a prior turn on the provider's side.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn respond(
        &self,
        instructions: &str,
        prompt: &str,
        params: &CallParams,
        previous_response_id: Option<&str>,
    ) -> PipelineResult<LlmResponse>;
}

/// `reqwest`-backed implementation targeting an OpenAI-compatible `/responses`
/// endpoint (matches the teacher's HTTP client conventions elsewhere in the
/// stack: a thin wrapper struct holding a `reqwest::Client` plus base URL and
/// bearer key).
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ResponseBody {
    id: String,
    output_text: String,
    usage: Usage,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn respond(
        &self,
        instructions: &str,
        prompt: &str,
        params: &CallParams,
        previous_response_id: Option<&str>,
    ) -> PipelineResult<LlmResponse> {
        let body = RequestBody {
            model: &params.model,
            instructions,
            input: prompt,
            max_output_tokens: params.max_output_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            previous_response_id,
        };

        let resp = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::LlmCallFailure(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PipelineError::LlmCallFailure(format!(
                "provider returned status {}",
                resp.status()
            )));
        }

        let parsed: ResponseBody = resp
            .json()
            .await
            .map_err(|e| PipelineError::LlmCallFailure(e.to_string()))?;

        Ok(LlmResponse {
            text: parsed.output_text,
            response_id: parsed.id,
            usage: parsed.usage,
        })
    }
}
