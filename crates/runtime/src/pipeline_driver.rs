//! Pipeline Driver: the top-level Generate → Evaluate → Retrieve loop wiring
//! one topic's Generator, Evaluator, and Context Proctor together, ported
//! from `original_source/main_.py`'s `newTest`/topic-processing shape and
//! spec §4.9.

use std::sync::Arc;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::context_proctor::ContextProctor;
use crate::llm::LlmClient;
use crate::rate_limit::RateLimiter;
use crate::report_evaluator::ReportEvaluator;
use crate::report_generator::ReportGenerator;
use crate::searcher::SearchBackend;
use crate::types::{EvalStatus, Topic, TopicResult};

/// Runs one topic through the bounded Generate/Evaluate/Retrieve loop and
/// emits its final `{ id, report, score }` row (spec §4.9).
pub async fn run_topic(
    topic: &Topic,
    num: u32,
    config: RuntimeConfig,
    client: Arc<dyn LlmClient>,
    rate_limiter: Arc<RateLimiter>,
    backend: Arc<dyn SearchBackend>,
) -> crate::error::PipelineResult<TopicResult> {
    let max_rounds = config.max_pipeline_rounds;

    let mut generator = ReportGenerator::new(
        topic.text.clone(),
        Arc::clone(&client),
        Arc::clone(&rate_limiter),
        &config,
        num,
    )
    .await?;
    let mut evaluator = ReportEvaluator::new(
        topic.text.clone(),
        Arc::clone(&client),
        Arc::clone(&rate_limiter),
        &config,
        num,
    )
    .await?;

    let mut round = 0u32;
    let mut ir_context = String::new();
    let mut eval_note = String::new();
    let mut eval_blob = String::new();
    let mut pending_questions = Vec::new();

    loop {
        if round > 0 {
            if config.terminate_when_ir_questions_empty && pending_questions.is_empty() {
                info!(topic = %topic.docid, round, "no ir questions pending, stopping early");
                break;
            }
            if !pending_questions.is_empty() {
                let proctor = ContextProctor::new(
                    config.clone(),
                    Arc::clone(&client),
                    Arc::clone(&rate_limiter),
                    Arc::clone(&backend),
                    num,
                );
                proctor.create_context(pending_questions.clone()).await?;
                ir_context = tokio::fs::read_to_string(format!(
                    "{}{}.txt",
                    config.context_path.display(),
                    num
                ))
                .await
                .unwrap_or_default();
            }
        }

        let (report, note) = generator
            .generate_report(&ir_context, &eval_note, &eval_blob)
            .await?;

        let outcome = evaluator.evaluate(&report, &ir_context, &note).await?;
        eval_note = outcome.note;
        pending_questions = outcome.questions;
        eval_blob = outcome
            .score
            .map(|s| serde_json::to_string(&s).unwrap_or_default())
            .unwrap_or_default();

        info!(
            topic = %topic.docid,
            round,
            status = ?outcome.status,
            "completed generate/evaluate round"
        );

        if outcome.status == EvalStatus::Pass {
            break;
        }

        round += 1;
        if round >= max_rounds {
            break;
        }
    }

    Ok(TopicResult {
        id: topic.docid.clone(),
        report: evaluator.best.report.clone().unwrap_or_default(),
        score: evaluator.best.score,
    })
}

/// Runs every topic concurrently via a structured task set (spec §4.9
/// "topics are run concurrently via a parallel task group").
pub async fn run_all(
    topics: Vec<Topic>,
    config: RuntimeConfig,
    client: Arc<dyn LlmClient>,
    rate_limiter: Arc<RateLimiter>,
    backend: Arc<dyn SearchBackend>,
) -> Vec<crate::error::PipelineResult<TopicResult>> {
    let mut handles = Vec::with_capacity(topics.len());
    for (num, topic) in topics.into_iter().enumerate() {
        let config = config.clone();
        let client = Arc::clone(&client);
        let rate_limiter = Arc::clone(&rate_limiter);
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            run_topic(&topic, num as u32, config, client, rate_limiter, backend).await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::error!("topic task panicked: {e}");
                results.push(Err(crate::error::PipelineError::Cancelled));
            }
        }
    }
    results
}
