//! Hierarchical rate-limit gateway, ported from
//! `original_source/.../rate_limits.py`. Wraps every outbound LLM / rerank
//! call in sliding-window token buckets so a burst of IR agents can't blow
//! through the provider's per-minute caps.

use std::time::Duration;

use dashmap::DashMap;
use tiktoken_rs::CoreBPE;

use crate::answer_contracts::GLOBAL_FORMAT;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{CallParams, LlmClient, LlmResponse};
use crate::rerank::{RerankClient, RerankDocument, RerankResult};
use crate::token_bucket::AsyncTokenBucket;

const WINDOW_SECS: u64 = 62;

const PLAN_REQ_CAP: u64 = 50;
const PLAN_TOK_CAP: u64 = 50_000;
const GLOBAL_REQ_CAP: u64 = 200;
const GLOBAL_TOK_CAP: u64 = 200_000;
const PERSONAL_TOK_CAP: u64 = 100_000;
const COHERE_RERANK_CAP: u64 = 500;

/// Report generator/evaluator shared bucket (spec §4.2 GEN row), ported
/// from `gen_ratelimit.py`'s module-level `REQ_BUCKET`/`TOK_BUCKET`.
const GEN_REQ_CAP: u64 = 50;
const GEN_TOK_CAP: u64 = 50_000;
const GEN_MAX_OUTPUT_TOKENS: u64 = 5_000;

/// 2.5% safety buffer reserved on top of prompt + max-output tokens, matching
/// the source's `PROMPT_BUFFER` lambda.
fn prompt_buffer(max_out: u64) -> u64 {
    (max_out as f64 * 0.025) as u64
}

/// The four call shapes an IR agent issues over its lifetime, each with its
/// own model parameters and absolute per-call token cap. `SEARCH_CALL` is
/// charged against the plan buckets; the other three share the personal +
/// global buckets (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStage {
    SearchCall,
    SelectCall,
    UpdateCall,
    FinalCall,
}

impl LoopStage {
    pub fn params(&self) -> CallParams {
        match self {
            LoopStage::SearchCall => CallParams {
                model: "gpt-4.1".to_string(),
                max_output_tokens: 3_000,
                temperature: 0.4,
                top_p: 0.95,
            },
            LoopStage::SelectCall => CallParams {
                model: "gpt-4.1-mini".to_string(),
                max_output_tokens: 3_000,
                temperature: 0.2,
                top_p: 0.9,
            },
            LoopStage::UpdateCall => CallParams {
                model: "gpt-4.1-mini".to_string(),
                max_output_tokens: 6_000,
                temperature: 0.25,
                top_p: 0.9,
            },
            LoopStage::FinalCall => CallParams {
                model: "gpt-4.1-mini".to_string(),
                max_output_tokens: 1_500,
                temperature: 0.4,
                top_p: 0.95,
            },
        }
    }

    /// Absolute per-minute cap the reservation for this stage is checked
    /// against before any bucket is touched.
    pub fn per_call_cap(&self) -> u64 {
        match self {
            LoopStage::SearchCall => 75_000,
            LoopStage::SelectCall => 100_000,
            LoopStage::UpdateCall => 150_000,
            LoopStage::FinalCall => 100_000,
        }
    }

    fn is_plan_call(&self) -> bool {
        matches!(self, LoopStage::SearchCall)
    }
}

struct ReservationIds {
    plan: Option<u64>,
    personal: Option<u64>,
    global: Option<u64>,
}

/// Owns every bucket in the hierarchy: the shared plan/global buckets, the
/// lazily-created per-assistant buckets (one per IR agent id), and the
/// Cohere rerank bucket.
pub struct RateLimiter {
    plan_req: AsyncTokenBucket,
    plan_tok: AsyncTokenBucket,
    global_req: AsyncTokenBucket,
    global_tok: AsyncTokenBucket,
    assistant_tok: DashMap<String, AsyncTokenBucket>,
    cohere_bucket: AsyncTokenBucket,
    gen_req: AsyncTokenBucket,
    gen_tok: AsyncTokenBucket,
    encoder: CoreBPE,
}

impl RateLimiter {
    pub fn new() -> Self {
        let window = Duration::from_secs(WINDOW_SECS);
        Self {
            plan_req: AsyncTokenBucket::new(PLAN_REQ_CAP, window),
            plan_tok: AsyncTokenBucket::new(PLAN_TOK_CAP, window),
            global_req: AsyncTokenBucket::new(GLOBAL_REQ_CAP, window),
            global_tok: AsyncTokenBucket::new(GLOBAL_TOK_CAP, window),
            assistant_tok: DashMap::new(),
            cohere_bucket: AsyncTokenBucket::new(COHERE_RERANK_CAP, window),
            gen_req: AsyncTokenBucket::new(GEN_REQ_CAP, window),
            gen_tok: AsyncTokenBucket::new(GEN_TOK_CAP, window),
            encoder: tiktoken_rs::o200k_base().expect("o200k_base encoder is built into tiktoken-rs"),
        }
    }

    fn count_tokens(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        self.encoder.encode_ordinary(text).len() as u64
    }

    /// Current load of each named bucket, for the bucket monitor.
    pub async fn snapshot(&self) -> Vec<(String, u64, u64)> {
        let mut rows = vec![
            (
                "plan_req".to_string(),
                self.plan_req.current_load().await,
                self.plan_req.capacity(),
            ),
            (
                "plan_tok".to_string(),
                self.plan_tok.current_load().await,
                self.plan_tok.capacity(),
            ),
            (
                "global_req".to_string(),
                self.global_req.current_load().await,
                self.global_req.capacity(),
            ),
            (
                "global_tok".to_string(),
                self.global_tok.current_load().await,
                self.global_tok.capacity(),
            ),
            (
                "cohere_rerank".to_string(),
                self.cohere_bucket.current_load().await,
                self.cohere_bucket.capacity(),
            ),
            (
                "gen_req".to_string(),
                self.gen_req.current_load().await,
                self.gen_req.capacity(),
            ),
            (
                "gen_tok".to_string(),
                self.gen_tok.current_load().await,
                self.gen_tok.capacity(),
            ),
        ];
        for entry in self.assistant_tok.iter() {
            rows.push((
                format!("assistant:{}", entry.key()),
                entry.value().current_load().await,
                entry.value().capacity(),
            ));
        }
        rows
    }

    fn assistant_bucket(&self, assistant_id: &str) -> dashmap::mapref::one::Ref<'_, String, AsyncTokenBucket> {
        if !self.assistant_tok.contains_key(assistant_id) {
            self.assistant_tok.insert(
                assistant_id.to_string(),
                AsyncTokenBucket::new(PERSONAL_TOK_CAP, Duration::from_secs(WINDOW_SECS)),
            );
        }
        self.assistant_tok.get(assistant_id).expect("just inserted")
    }

    /// Gate a single LLM call through the hierarchical buckets, exactly as
    /// `gated_response` does: estimate the prompt's token cost, add the
    /// stage's max output and a safety buffer, fail fast if that reservation
    /// alone exceeds the stage's cap, then acquire the appropriate buckets,
    /// make the call, and refund the unused portion.
    pub async fn gated_response(
        &self,
        client: &dyn LlmClient,
        assistant_id: &str,
        stage: LoopStage,
        prompt: &str,
        context: &str,
        previous_response_id: Option<&str>,
    ) -> PipelineResult<LlmResponse> {
        let params = stage.params();
        let prompt_tokens = self.count_tokens(&format!(
            "{}{}<|user|>\n{}\n",
            GLOBAL_FORMAT, context, prompt
        ));
        let reserve = prompt_tokens + params.max_output_tokens as u64 +
            prompt_buffer(prompt_tokens + params.max_output_tokens as u64);

        if reserve > stage.per_call_cap() {
            return Err(PipelineError::ReservationTooLarge {
                requested: reserve,
                capacity: stage.per_call_cap(),
            });
        }

        let mut ids = ReservationIds {
            plan: None,
            personal: None,
            global: None,
        };

        if stage.is_plan_call() {
            ids.plan = Some(self.plan_tok.acquire(reserve).await);
            self.plan_req.acquire(1).await;
        } else {
            ids.global = Some(self.global_tok.acquire(reserve).await);
            let bucket = self.assistant_bucket(assistant_id);
            ids.personal = Some(bucket.acquire(reserve).await);
            drop(bucket);
            self.global_req.acquire(1).await;
        }

        let result = client
            .respond(GLOBAL_FORMAT, prompt, &params, previous_response_id)
            .await;

        match &result {
            Ok(response) => {
                self.refund(assistant_id, response.usage.total_tokens, reserve, stage.is_plan_call(), &ids)
                    .await;
            }
            Err(_) => {
                // Reservation stays in place; it ages out of the window on
                // its own, same as the source's unwound `except: raise`.
            }
        }

        result
    }

    async fn refund(
        &self,
        assistant_id: &str,
        used: u64,
        reserved: u64,
        is_plan_call: bool,
        ids: &ReservationIds,
    ) {
        if reserved <= used {
            return;
        }
        let diff = reserved - used;

        if is_plan_call {
            if let Some(id) = ids.plan {
                self.plan_tok.credit_by_id(id, diff).await;
            }
            return;
        }

        if let Some(id) = ids.personal {
            let bucket = self.assistant_bucket(assistant_id);
            bucket.credit_by_id(id, diff).await;
        }
        if let Some(id) = ids.global {
            self.global_tok.credit_by_id(id, diff).await;
        }
    }

    /// Gate a Report Generator/Evaluator call through the shared GEN
    /// bucket (spec §4.2 GEN row), ported from `gen_ratelimit.py`'s
    /// `gated_call_gen`. Retries the provider call once on failure before
    /// surfacing the error, matching the source's single recall attempt.
    pub async fn gated_call_gen(
        &self,
        client: &dyn LlmClient,
        prompt: &str,
        temperature: f32,
    ) -> PipelineResult<LlmResponse> {
        let prompt_tokens = self.count_tokens(prompt);
        let reserve = prompt_tokens + GEN_MAX_OUTPUT_TOKENS + prompt_buffer(prompt_tokens + GEN_MAX_OUTPUT_TOKENS);

        if reserve > GEN_TOK_CAP {
            return Err(PipelineError::ReservationTooLarge {
                requested: reserve,
                capacity: GEN_TOK_CAP,
            });
        }

        let _req_id = self.gen_req.acquire(1).await;
        let tok_id = self.gen_tok.acquire(reserve).await;

        let params = CallParams {
            model: "gpt-4.1".to_string(),
            max_output_tokens: GEN_MAX_OUTPUT_TOKENS as u32,
            temperature,
            top_p: 1.0,
        };

        let mut result = client.respond("", prompt, &params, None).await;
        if result.is_err() {
            result = client.respond("", prompt, &params, None).await;
        }

        if let Ok(response) = &result {
            if reserve > response.usage.total_tokens {
                self.gen_tok
                    .credit_by_id(tok_id, reserve - response.usage.total_tokens)
                    .await;
            }
        }

        result
    }

    /// Gate a Cohere rerank call so the process issues at most
    /// `COHERE_RERANK_CAP` requests per window.
    pub async fn gated_cohere_rerank_call(
        &self,
        client: &dyn RerankClient,
        query: &str,
        documents: &[RerankDocument],
        top_n: usize,
    ) -> PipelineResult<Vec<RerankResult>> {
        let _id = self.cohere_bucket.acquire(1).await;
        client.rerank(query, documents, top_n).await
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Usage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeClient {
        /// Reported `usage.total_tokens` on every successful call.
        used: u64,
        calls: Arc<AtomicUsize>,
        fail_first_n: usize,
    }

    #[async_trait]
    impl LlmClient for FakeClient {
        async fn respond(
            &self,
            _instructions: &str,
            _prompt: &str,
            _params: &CallParams,
            _previous_response_id: Option<&str>,
        ) -> PipelineResult<LlmResponse> {
            let call_idx = self.calls.fetch_add(1, Ordering::SeqCst);
            if call_idx < self.fail_first_n {
                return Err(PipelineError::LlmCallFailure("simulated outage".into()));
            }
            Ok(LlmResponse {
                text: "ok".to_string(),
                response_id: format!("resp-{call_idx}"),
                usage: Usage {
                    total_tokens: self.used,
                },
            })
        }
    }

    /// spec §8 S6: a prompt whose estimate + max_output exceeds the stage's
    /// per-call cap raises `ReservationTooLarge` before any bucket is
    /// touched or the LLM client is invoked.
    #[tokio::test]
    async fn reservation_too_large_fails_before_any_bucket_or_call() {
        let limiter = RateLimiter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            used: 10,
            calls: Arc::clone(&calls),
            fail_first_n: 0,
        };

        // SEARCH_CALL's per-call cap is 75,000; a prompt this long blows
        // past it even before max_output_tokens is added.
        let huge_prompt = "word ".repeat(80_000);
        let result = limiter
            .gated_response(
                &client,
                "agent-1",
                LoopStage::SearchCall,
                &huge_prompt,
                "",
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::ReservationTooLarge { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "LLM must not be called");
        assert_eq!(limiter.plan_tok.current_load().await, 0);
    }

    /// The surplus between what was reserved and what the provider actually
    /// billed is refunded to the exact reservation, not just subtracted from
    /// the bucket total (spec §4.2 step 4 / §8 invariant 2).
    #[tokio::test]
    async fn gated_response_refunds_unused_reservation() {
        let limiter = RateLimiter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            used: 5,
            calls,
            fail_first_n: 0,
        };

        limiter
            .gated_response(&client, "agent-1", LoopStage::UpdateCall, "hello", "", None)
            .await
            .unwrap();

        // Only the 5 actually-used tokens should remain reserved; the rest
        // of the prompt+max_output+buffer estimate was refunded.
        assert_eq!(limiter.global_tok.current_load().await, 5);
        assert_eq!(
            limiter
                .assistant_tok
                .get("agent-1")
                .unwrap()
                .current_load()
                .await,
            5
        );
    }

    /// SEARCH_CALL routes through the plan buckets, never the global/
    /// per-assistant ones (spec §4.2 step 2).
    #[tokio::test]
    async fn search_call_uses_plan_buckets_not_global() {
        let limiter = RateLimiter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            used: 100,
            calls,
            fail_first_n: 0,
        };

        limiter
            .gated_response(&client, "agent-1", LoopStage::SearchCall, "hi", "", None)
            .await
            .unwrap();

        assert_eq!(limiter.global_tok.current_load().await, 0);
        assert!(limiter.plan_tok.current_load().await > 0);
    }

    /// `gated_call_gen` retries exactly once on failure before surfacing the
    /// error to the caller (spec §4.2 GEN row / §7 LLMCallFailure).
    #[tokio::test]
    async fn gated_call_gen_retries_once_then_succeeds() {
        let limiter = RateLimiter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            used: 1,
            calls: Arc::clone(&calls),
            fail_first_n: 1,
        };

        let response = limiter
            .gated_call_gen(&client, "prompt text", 0.2)
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// A reservation that fails outright (both attempts) leaves its tokens
    /// in place to age out rather than refunding speculatively (spec §7
    /// LLMCallFailure: "reservation is left to age out").
    #[tokio::test]
    async fn gated_call_gen_exhausted_retries_leaves_reservation_in_place() {
        let limiter = RateLimiter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            used: 1,
            calls,
            fail_first_n: 2,
        };

        let before = limiter.gen_tok.current_load().await;
        let result = limiter.gated_call_gen(&client, "prompt text", 0.2).await;
        assert!(result.is_err());
        assert!(limiter.gen_tok.current_load().await > before);
    }
}
