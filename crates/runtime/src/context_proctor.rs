//! Context Proctor: a queue-driven worker pool that fans batches of
//! questions out to the IR ensemble, ported from
//! `original_source/.../IR_Ensemble/context_builder.py`'s `ContextProctor`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::config::RuntimeConfig;
use crate::error::PipelineResult;
use crate::ir_agent::IrAgent;
use crate::llm::LlmClient;
use crate::rate_limit::RateLimiter;
use crate::searcher::SearchBackend;
use crate::types::Question;

const MAX_WORKERS: usize = 5;
const STAGGER_SECS: f64 = 1.0;
const BATCH_SIZE: usize = 2;

/// Sentinel recorded into a batch slot when its worker's IR agent run fails
/// outright (spec §4.6 "any worker error sets that slot to an error
/// sentinel; other slots are unaffected").
const ERROR_SENTINEL: &str = r#"{"error":"ir agent run failed"}"#;

struct Batch {
    index: usize,
    questions: Vec<Question>,
}

/// Runs the Search→Select→Update IR ensemble against a batch of questions
/// produced by the evaluator, then folds the results into the per-topic
/// context file (spec §4.6).
pub struct ContextProctor {
    config: RuntimeConfig,
    client: Arc<dyn LlmClient>,
    rate_limiter: Arc<RateLimiter>,
    backend: Arc<dyn SearchBackend>,
    num: u32,
}

impl ContextProctor {
    pub fn new(
        config: RuntimeConfig,
        client: Arc<dyn LlmClient>,
        rate_limiter: Arc<RateLimiter>,
        backend: Arc<dyn SearchBackend>,
        num: u32,
    ) -> Self {
        Self {
            config,
            client,
            rate_limiter,
            backend,
            num,
        }
    }

    /// Splits `questions` into batches of `BATCH_SIZE`, runs up to
    /// `MAX_WORKERS` concurrently (staggered by `STAGGER_SECS` per worker
    /// index) and appends the concatenated results to the per-topic
    /// context file.
    pub async fn create_context(&self, questions: Vec<Question>) -> PipelineResult<()> {
        let batches: Vec<Batch> = questions
            .chunks(BATCH_SIZE)
            .enumerate()
            .map(|(index, chunk)| Batch {
                index,
                questions: chunk.to_vec(),
            })
            .collect();

        let results: Arc<Mutex<Vec<Option<String>>>> =
            Arc::new(Mutex::new(vec![None; batches.len()]));
        let queue = Arc::new(Mutex::new(batches));

        let mut workers = Vec::new();
        for worker_idx in 0..MAX_WORKERS {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let config = self.config.clone();
            let client = Arc::clone(&self.client);
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let backend = Arc::clone(&self.backend);
            let num = self.num;

            workers.push(tokio::spawn(async move {
                if worker_idx > 0 {
                    sleep(Duration::from_secs_f64(worker_idx as f64 * STAGGER_SECS)).await;
                }
                loop {
                    let batch = {
                        let mut q = queue.lock().await;
                        if q.is_empty() {
                            None
                        } else {
                            Some(q.remove(0))
                        }
                    };
                    let Some(batch) = batch else { break };

                    let result = run_batch(&config, &client, &rate_limiter, &backend, num, &batch.questions)
                        .await
                        .unwrap_or_else(|e| {
                            warn!("context proctor batch {} failed: {e}", batch.index);
                            ERROR_SENTINEL.to_string()
                        });

                    let mut r = results.lock().await;
                    r[batch.index] = Some(result);
                }
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }

        let results = results.lock().await;
        let separator = "\n===================================\n";
        let total_context = results
            .iter()
            .filter_map(|slot| slot.clone())
            .collect::<Vec<_>>()
            .join(separator);

        let ctx_path = PathBuf::from(format!("{}{}.txt", self.config.context_path.display(), self.num));
        if let Some(parent) = ctx_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ctx_path)
            .await?;
        file.write_all(total_context.as_bytes()).await?;
        Ok(())
    }
}

async fn run_batch(
    config: &RuntimeConfig,
    client: &Arc<dyn LlmClient>,
    rate_limiter: &Arc<RateLimiter>,
    backend: &Arc<dyn SearchBackend>,
    num: u32,
    questions: &[Question],
) -> PipelineResult<String> {
    let stringified: Vec<String> = questions
        .iter()
        .map(|q| serde_json::to_string(q).unwrap_or_default())
        .collect();
    let payload = stringified.join("\n");

    let mut agent = IrAgent::new(
        payload,
        num,
        Arc::clone(client),
        Arc::clone(rate_limiter),
        Arc::clone(backend),
        config.clone(),
    )
    .await?;

    let result = agent.run().await;
    Ok(serde_json::json!({
        "summary": result.summary,
        "status": result.status.as_str(),
        "evidence": result.evidence,
    })
    .to_string())
}
