//! Report Evaluator: scores a report against the rubric, emits IR questions
//! for the next round, and tracks the best report seen so far, ported from
//! `original_source/.../ReportEvaluator/report_evaluator.py`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::answer_contracts::REPORT_EVALUATOR_PROMPT;
use crate::config::RuntimeConfig;
use crate::error::PipelineResult;
use crate::llm::LlmClient;
use crate::rate_limit::RateLimiter;
use crate::types::{BestReportSlot, EvalStatus, Question, Report, RubricScore};

fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let start = format!("<{tag}>");
    let end = format!("</{tag}>");
    let after_start = text.split_once(&start)?.1;
    let before_end = after_start.split_once(&end)?.0;
    Some(before_end.trim().to_string())
}

#[derive(Deserialize)]
struct IrQuestions {
    #[serde(default)]
    questions: Vec<Question>,
}

/// Result of one evaluator round, ported from `evaluate`'s `(note,
/// questions, eval_)` return tuple.
pub struct EvaluationOutcome {
    pub note: String,
    pub questions: Vec<Question>,
    pub status: EvalStatus,
    pub score: Option<RubricScore>,
}

pub struct ReportEvaluator {
    topic_text: String,
    client: Arc<dyn LlmClient>,
    rate_limiter: Arc<RateLimiter>,

    my_notes: Vec<String>,
    gen_notes: Vec<String>,
    status: EvalStatus,
    pending_questions: Vec<Question>,
    pending_score: Option<RubricScore>,

    pub best: BestReportSlot,

    log_path: PathBuf,
}

impl ReportEvaluator {
    pub async fn new(
        topic_text: String,
        client: Arc<dyn LlmClient>,
        rate_limiter: Arc<RateLimiter>,
        config: &RuntimeConfig,
        num: u32,
    ) -> PipelineResult<Self> {
        let log_path = PathBuf::from(format!("{}{}.txt", config.eval_path.display(), num));
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&log_path, b"").await?;

        Ok(Self {
            topic_text,
            client,
            rate_limiter,
            my_notes: Vec::new(),
            gen_notes: Vec::new(),
            status: EvalStatus::Incomplete,
            pending_questions: Vec::new(),
            pending_score: None,
            best: BestReportSlot::default(),
            log_path,
        })
    }

    fn serialize_notes(&self, mine: bool) -> String {
        let notes = if mine { &self.my_notes } else { &self.gen_notes };
        let mut out = String::new();
        for (i, note) in notes.iter().enumerate() {
            let note = if note.is_empty() {
                "First round no note yet or trouble parsing eval note"
            } else {
                note.as_str()
            };
            out.push_str(&format!("{i}. Evaluation note: {note}\n"));
        }
        out
    }

    async fn log(&self, msg: &str) -> PipelineResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(msg.as_bytes()).await?;
        Ok(())
    }

    /// Runs one evaluator round, ported from `evaluate`.
    pub async fn evaluate(
        &mut self,
        report: &Report,
        ir_context: &str,
        generator_comment: &str,
    ) -> PipelineResult<EvaluationOutcome> {
        self.gen_notes.push(generator_comment.to_string());

        let report_json = serde_json::to_string_pretty(report).unwrap_or_default();
        let ir_context = if ir_context.is_empty() {
            "First round no IR context yet"
        } else {
            ir_context
        };

        let prompt = format!(
            "{prompt}\nTopic document:\n{topic}\n \nReport:\n{report}\nIR Context:\n{ir}\nGenerator Comments:\n{gen}\n Your Comments:\n{mine}",
            prompt = REPORT_EVALUATOR_PROMPT,
            topic = self.topic_text,
            report = report_json,
            ir = ir_context,
            gen = self.serialize_notes(false),
            mine = self.serialize_notes(true),
        );
        self.log(&prompt).await?;

        let response = self
            .rate_limiter
            .gated_call_gen(self.client.as_ref(), &prompt, 0.2)
            .await?;
        self.log(&response.text).await?;

        self.update_status(&response.text, report);

        Ok(EvaluationOutcome {
            note: self.my_notes.last().cloned().unwrap_or_default(),
            questions: self.last_questions(),
            status: self.status,
            score: self.last_score(),
        })
    }

    fn update_status(&mut self, content: &str, report: &Report) {
        let parsed = (|| -> Option<(String, Vec<Question>, RubricScore)> {
            let note = extract_tag(content, "note")?;
            let ir_raw = extract_tag(content, "ir")?;
            let ir: IrQuestions = serde_json::from_str(&ir_raw).ok()?;
            let eval_raw = extract_tag(content, "eval")?;
            let score: RubricScore = serde_json::from_str(&eval_raw).ok()?;
            Some((note, ir.questions, score))
        })();

        match parsed {
            Some((note, questions, score)) => {
                self.my_notes.push(note);
                self.pending_questions = questions;
                self.pending_score = Some(score);
                let total = score.total();
                if total >= self.best.score {
                    self.best.consider(report.clone(), total);
                }
                self.status = if score.passes() {
                    EvalStatus::Pass
                } else {
                    EvalStatus::Fail
                };
            }
            None => {
                warn!("report evaluator: failed to parse <note>/<ir>/<eval>, marking FAIL");
                self.pending_questions = Vec::new();
                self.pending_score = None;
                self.status = EvalStatus::Fail;
                self.my_notes.push("Error parsing evaluation".to_string());
            }
        }
    }

    fn last_questions(&self) -> Vec<Question> {
        self.pending_questions.clone()
    }

    fn last_score(&self) -> Option<RubricScore> {
        self.pending_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CallParams, LlmResponse, Usage};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FakeClient {
        response: String,
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
            Ok(LlmResponse {
                text: self.response.clone(),
                response_id: "resp-1".to_string(),
                usage: Usage { total_tokens: 100 },
            })
        }
    }

    fn test_config(base: &std::path::Path) -> RuntimeConfig {
        RuntimeConfig {
            bm25_results_path: base.join("bm25"),
            context_path: base.join("ctx"),
            report_path: base.join("report"),
            eval_path: base.join("eval"),
            bucket_monitor_out: None,
            openai_base_url: "http://localhost".into(),
            openai_api_key: "test".into(),
            cohere_base_url: "http://localhost".into(),
            cohere_api_key: "test".into(),
            daemon: crate::config::DaemonConfig::default(),
            max_ir_rounds: 3,
            max_pipeline_rounds: 3,
            terminate_when_ir_questions_empty: false,
        }
    }

    #[tokio::test]
    async fn all_fives_passes_and_updates_best() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let raw = r#"<cot>plan</cot><note>great job</note><ir>{"questions":[]}</ir><eval>{"coverage":5,"accuracy":5,"citation_quality":5,"style":5,"prioritization":5,"completeness":5}</eval>"#;
        let client = Arc::new(FakeClient {
            response: raw.to_string(),
        });
        let mut evaluator = ReportEvaluator::new(
            "topic".to_string(),
            client,
            Arc::new(RateLimiter::new()),
            &config,
            0,
        )
        .await
        .unwrap();

        let report = Report::default();
        let outcome = evaluator.evaluate(&report, "", "").await.unwrap();
        assert_eq!(outcome.status, EvalStatus::Pass);
        assert_eq!(outcome.score.unwrap().total(), 50);
        assert_eq!(evaluator.best.score, 50);
    }

    #[tokio::test]
    async fn malformed_eval_fails_with_empty_questions() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let client = Arc::new(FakeClient {
            response: "not even tagged".to_string(),
        });
        let mut evaluator = ReportEvaluator::new(
            "topic".to_string(),
            client,
            Arc::new(RateLimiter::new()),
            &config,
            1,
        )
        .await
        .unwrap();

        let outcome = evaluator.evaluate(&Report::default(), "", "").await.unwrap();
        assert_eq!(outcome.status, EvalStatus::Fail);
        assert!(outcome.questions.is_empty());
        assert_eq!(evaluator.best.score, 0);
    }
}
