//! Report Generator: a single gated LLM turn per round that produces a
//! structured report plus a note to the evaluator, ported from
//! `original_source/.../ReportGenerator/report_generator.py`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::answer_contracts::REPORT_GENERATOR_PROMPT;
use crate::config::RuntimeConfig;
use crate::error::PipelineResult;
use crate::llm::LlmClient;
use crate::rate_limit::RateLimiter;
use crate::types::Report;

fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let start = format!("<{tag}>");
    let end = format!("</{tag}>");
    let after_start = text.split_once(&start)?.1;
    let before_end = after_start.split_once(&end)?.0;
    Some(before_end.trim().to_string())
}

/// Generates one report per round, remembering its own notes and the
/// evaluator's notes across rounds so each prompt can serialize the running
/// conversation (spec §4.7).
pub struct ReportGenerator {
    topic_text: String,
    client: Arc<dyn LlmClient>,
    rate_limiter: Arc<RateLimiter>,

    cur_report_raw: Option<String>,
    eval_notes: Vec<String>,
    my_notes: Vec<String>,

    log_path: PathBuf,
}

impl ReportGenerator {
    pub async fn new(
        topic_text: String,
        client: Arc<dyn LlmClient>,
        rate_limiter: Arc<RateLimiter>,
        config: &RuntimeConfig,
        num: u32,
    ) -> PipelineResult<Self> {
        let log_path = PathBuf::from(format!("{}{}.txt", config.report_path.display(), num));
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&log_path, b"").await?;

        Ok(Self {
            topic_text,
            client,
            rate_limiter,
            cur_report_raw: None,
            eval_notes: Vec::new(),
            my_notes: Vec::new(),
            log_path,
        })
    }

    fn serialize_notes(&self, mine: bool) -> String {
        let notes = if mine { &self.my_notes } else { &self.eval_notes };
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

    /// Runs one generator round and returns `(report, note)`, ported from
    /// `generate_report`.
    pub async fn generate_report(
        &mut self,
        ir_context: &str,
        evaluator_note: &str,
        eval_blob: &str,
    ) -> PipelineResult<(Report, String)> {
        self.eval_notes.push(evaluator_note.to_string());

        let prev_report = self
            .cur_report_raw
            .clone()
            .unwrap_or_else(|| "First round no report yet".to_string());
        let ir_context = if ir_context.is_empty() {
            "First round no IR context yet"
        } else {
            ir_context
        };

        let prompt = format!(
            "{prompt}\nTopic:\n{topic}\nPrevious report: \n{prev}\nYour notes:\n{mine}Evaluation notes: \n{theirs}Evaluation:\n{eval_blob}\nIR context: \n{ir}\n",
            prompt = REPORT_GENERATOR_PROMPT,
            topic = self.topic_text,
            prev = prev_report,
            mine = self.serialize_notes(true),
            theirs = self.serialize_notes(false),
            eval_blob = eval_blob,
            ir = ir_context,
        );

        let response = self
            .rate_limiter
            .gated_call_gen(self.client.as_ref(), &prompt, 0.25)
            .await?;

        self.log("\n=========\n").await?;
        self.log(&format!("Prompt:\n{prompt}\n")).await?;
        self.log(&format!("Response:\n{}\n", response.text)).await?;

        self.update_status(&response.text).await;

        let report = match &self.cur_report_raw {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("report json parse failure, storing raw text: {e}");
                Report {
                    responses: vec![crate::types::ReportItem {
                        text: raw.clone(),
                        citations: Vec::new(),
                    }],
                }
            }),
            None => Report::default(),
        };

        if !report.within_shape_limits() {
            warn!(
                word_count = report.word_count(),
                "report generator: provider violated the citation/word-count contract"
            );
        }

        let note = self
            .my_notes
            .last()
            .cloned()
            .unwrap_or_else(|| "parse error: no note extracted".to_string());
        Ok((report, note))
    }

    async fn update_status(&mut self, content: &str) {
        match extract_tag(content, "report") {
            Some(report) => {
                self.cur_report_raw = Some(report);
                self.my_notes
                    .push(extract_tag(content, "note").unwrap_or_default());
            }
            None => {
                warn!("report generator: failed to extract <report>, storing raw content");
                self.cur_report_raw = Some(content.to_string());
                self.my_notes.push(String::new());
            }
        }
    }
}
