//! Rerank provider contract, ported from the Cohere `/rerank` call in
//! `original_source/.../Searcher.py` and gated via `gated_cohere_rerank_call`
//! in `rate_limits.py`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Serialize)]
pub struct RerankDocument {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankResult {
    pub index: usize,
    pub relevance_score: f64,
}

#[async_trait]
pub trait RerankClient: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_n: usize,
    ) -> PipelineResult<Vec<RerankResult>>;
}

pub struct HttpRerankClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRerankClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [RerankDocument],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[async_trait]
impl RerankClient for HttpRerankClient {
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_n: usize,
    ) -> PipelineResult<Vec<RerankResult>> {
        let body = RerankRequest {
            model: "rerank-v3.5",
            query,
            documents,
            top_n,
        };

        let resp = self
            .client
            .post(format!("{}/v2/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::RerankCallFailure(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PipelineError::RerankCallFailure(format!(
                "rerank service returned status {}",
                resp.status()
            )));
        }

        let parsed: RerankResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::RerankCallFailure(e.to_string()))?;

        Ok(parsed.results)
    }
}
