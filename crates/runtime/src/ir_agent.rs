//! IR agent plan/search/select/update state machine, ported from
//! `original_source/.../base.py` (`BaseAgent`) and `question_eval.py`
//! (`QuestionEvalAgent`/`assess_questions`).

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::answer_contracts::{FINAL_CONTRACT, SEARCH_CONTRACT, SELECT_CONTRACT, UPDATE_CONTRACT};
use crate::config::RuntimeConfig;
use crate::error::PipelineResult;
use crate::rate_limit::{LoopStage, RateLimiter};
use crate::searcher::SearchBackend;
use crate::types::{Citation, EvidenceItem, HistoryEntry, QaStatus};

const MAX_TOOL_ROUNDS: u32 = 3;
/// Log lines describing a tool call are truncated at this length before
/// being appended to `Tools.txt`, matching the truncation the IR ensemble's
/// other agent variants apply to verbose tool payloads.
const TOOL_LOG_TRUNCATE: usize = 2500;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchCall {
    queries: Vec<String>,
    master_query: String,
}

#[derive(Debug, Deserialize)]
struct SearchCallSet {
    searches: Vec<SearchCall>,
}

#[derive(Debug, Deserialize)]
struct SelectCallSet {
    selections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCitation {
    #[serde(default)]
    summary: String,
    citation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAnswer {
    text: String,
    #[serde(default)]
    citations: Vec<RawCitation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawQuestionItem {
    question: String,
    #[serde(default)]
    doc_context: String,
    answer: RawAnswer,
    finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoundSummary {
    summary: String,
    #[serde(default)]
    seen_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct UpdatePayload {
    #[serde(default)]
    questions: Vec<RawQuestionItem>,
    #[serde(default)]
    rounds: Vec<RoundSummary>,
}

/// Result returned once an agent's `run()` loop ends, matching
/// `assess_questions`'s return shape.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub summary: Option<String>,
    pub status: QaStatus,
    pub evidence: Vec<EvidenceItem>,
}

pub struct IrAgent {
    pub agent_id: Uuid,
    num: u32,
    questions: String,

    rate_limiter: Arc<RateLimiter>,
    backend: Arc<dyn SearchBackend>,
    config: RuntimeConfig,
    client: Arc<dyn crate::llm::LlmClient>,

    history: Vec<HistoryEntry>,
    status: QaStatus,
    full_answer: Option<String>,
    summary: Option<String>,
    prev_id: Option<String>,

    results_path: PathBuf,
    convo_path: PathBuf,
    tools_path: PathBuf,
}

impl IrAgent {
    pub async fn new(
        questions: String,
        num: u32,
        client: Arc<dyn crate::llm::LlmClient>,
        rate_limiter: Arc<RateLimiter>,
        backend: Arc<dyn SearchBackend>,
        config: RuntimeConfig,
    ) -> PipelineResult<Self> {
        let agent_id = Uuid::new_v4();
        let results_path = config.bm25_results_path.join(agent_id.to_string());
        let convo_path = results_path.join("Convo.txt");
        let tools_path = results_path.join("Tools.txt");

        tokio::fs::create_dir_all(&results_path).await?;
        ensure_file(&convo_path).await?;
        ensure_file(&tools_path).await?;

        let agent = Self {
            agent_id,
            num,
            questions,
            rate_limiter,
            backend,
            config,
            client,
            history: Vec::new(),
            status: QaStatus::NoAnswer,
            full_answer: None,
            summary: None,
            prev_id: None,
            results_path,
            convo_path,
            tools_path,
        };
        agent
            .log(&format!("Agent {} created\n", agent.agent_id))
            .await?;
        Ok(agent)
    }

    async fn log(&self, msg: &str) -> PipelineResult<()> {
        self.append_to(&self.convo_path, msg).await
    }

    async fn log_tool(&self, msg: &str) -> PipelineResult<()> {
        self.append_to(&self.tools_path, msg).await
    }

    async fn append_to(&self, path: &PathBuf, msg: &str) -> PipelineResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(msg.as_bytes()).await?;
        Ok(())
    }

    fn record(&mut self, role: &str, content: &str) {
        self.history.push(HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    /// Exact plain-text mirror of what the backend tokenises, used solely
    /// for prompt-token estimation in the rate-limit gateway.
    fn serialise_history(&self) -> String {
        self.history
            .iter()
            .map(|m| format!("<|{}|>\n{}\n", m.role, m.content))
            .collect()
    }

    fn extract_tag(text: &str, tag: &str) -> Option<String> {
        let start = format!("<{tag}>");
        let end = format!("</{tag}>");
        let after_start = text.split_once(&start)?.1;
        let before_end = after_start.split_once(&end)?.0;
        Some(before_end.trim().to_string())
    }

    /// Runs the Search→Select turn pair and returns the selected-segments
    /// JSON text, ported from `get_info`.
    pub async fn get_info(&mut self, first_round: bool) -> PipelineResult<String> {
        let context_block = if first_round {
            format!("<questions>{}</questions>", self.questions)
        } else {
            format!(
                "<current_answer>{}</current_answer>",
                self.full_answer.clone().unwrap_or_default()
            )
        };

        let content = format!("{SEARCH_CONTRACT}{context_block}");
        self.record("user", &content);
        let response = self
            .rate_limiter
            .gated_response(
                self.client.as_ref(),
                &self.agent_id.to_string(),
                LoopStage::SearchCall,
                &content,
                "",
                None,
            )
            .await?;
        self.prev_id = Some(response.response_id.clone());
        let search_calls_raw = response.text;
        self.record("assistant", &search_calls_raw);
        self.log(&format!(
            "\n------- SEARCH CALLS------\n{}",
            self.serialise_history()
        ))
        .await?;

        let search_results = match self.run_search_calls(&search_calls_raw).await {
            Ok(results) => results,
            Err(e) => {
                warn!("search dispatch failed: {e}");
                "Error performing search, produce an empty selections array".to_string()
            }
        };

        let content = format!(
            "{SELECT_CONTRACT}\n\n<search_metadata>{search_results}</search_metadata>"
        );
        self.log(&format!("\n------TOOL RESULTS-------\n{content}"))
            .await?;

        let anchor_id = self.prev_id.clone();
        let select_response = self
            .rate_limiter
            .gated_response(
                self.client.as_ref(),
                &self.agent_id.to_string(),
                LoopStage::SelectCall,
                &content,
                &self.serialise_history(),
                anchor_id.as_deref(),
            )
            .await?;
        let select_calls_raw = select_response.text;
        self.log(&format!(
            "\n-SELECT CALLS (NOT PERSISTED IN LOGICAL THREAD)-\n{select_calls_raw}"
        ))
        .await?;

        let selected_segments = match self.run_select_call(&select_calls_raw).await {
            Ok(json) => json,
            Err(e) => {
                warn!("document selection failed: {e}");
                "Error performing document retrieval: instead of attempting to update the answer just rewrite the previous answer.".to_string()
            }
        };

        self.log(&format!("\n----RESULTS----\n{selected_segments}"))
            .await?;

        // Chain response id for the next update_answer call.
        self.prev_id = anchor_id;
        Ok(selected_segments)
    }

    async fn run_search_calls(&mut self, raw: &str) -> PipelineResult<String> {
        let answer = Self::extract_tag(raw, "answer")
            .ok_or_else(|| crate::error::PipelineError::ParseFailure("missing <answer>".into()))?;
        let parsed: SearchCallSet = serde_json::from_str(&answer)?;

        let mut results = Vec::new();
        for call in parsed.searches.into_iter().take(2) {
            let search_results = self
                .backend
                .search(&call.queries, &call.master_query, self.agent_id)
                .await?;
            let payload = json!({
                "search": serde_json::to_string(&call)?.chars().take(150).collect::<String>(),
                "results": search_results,
            });
            let log_line = format!(
                "\n----TOOL CALL----\n{}",
                truncate(&payload.to_string(), TOOL_LOG_TRUNCATE)
            );
            self.log_tool(&log_line).await?;
            results.push(payload.to_string());
        }
        Ok(results.join("\n"))
    }

    async fn run_select_call(&mut self, raw: &str) -> PipelineResult<String> {
        let answer = Self::extract_tag(raw, "answer")
            .ok_or_else(|| crate::error::PipelineError::ParseFailure("missing <answer>".into()))?;
        let parsed: SelectCallSet = serde_json::from_str(&answer)?;

        let mut ids: Vec<String> = parsed.selections.into_iter().take(6).collect();
        if ids.is_empty() {
            warn!("empty select_calls list, using dummy id");
            ids.push("dummy_id".to_string());
        }

        let results = self.backend.select_documents(&ids, true).await?;
        let payload = json!({
            "call": "select_documents",
            "kwargs": { "segment_ids": ids, "is_segment": true },
            "results": results,
        });
        self.log_tool(&format!(
            "\n----TOOL CALL----\n{}",
            truncate(&payload.to_string(), TOOL_LOG_TRUNCATE)
        ))
        .await?;
        Ok(serde_json::to_string(&results)?)
    }

    /// Feeds tool outputs back to the model and folds the updated answer
    /// into agent state, ported from `update_answer`.
    pub async fn update_answer(&mut self, tool_outputs: &str) -> PipelineResult<String> {
        let content = format!(
            "{UPDATE_CONTRACT}\n\n<selected_segments>{tool_outputs}</selected_segments>"
        );
        self.record("user", &content);

        let response = self
            .rate_limiter
            .gated_response(
                self.client.as_ref(),
                &self.agent_id.to_string(),
                LoopStage::UpdateCall,
                &content,
                &self.serialise_history(),
                self.prev_id.as_deref(),
            )
            .await?;
        let raw = response.text;
        self.record("assistant", &raw);
        self.full_answer = Some(Self::extract_tag(&raw, "answer").unwrap_or_else(|| raw.clone()));
        self.prev_id = Some(response.response_id);

        self.log(&format!(
            "\n==== UPDATE PROMPT ====\n{content}\n==== ANSWER UPDATE ====\n{raw}\n"
        ))
        .await?;
        self.update_status(false, None).await?;
        Ok(raw)
    }

    /// Forces a final summary turn once rounds are exhausted, ported from
    /// `force_final_prompt`.
    pub async fn force_final_prompt(&mut self) -> PipelineResult<()> {
        self.record("user", FINAL_CONTRACT);
        self.log(&format!("\n-----FORCED FINAL-----\n{FINAL_CONTRACT}"))
            .await?;

        let response = self
            .rate_limiter
            .gated_response(
                self.client.as_ref(),
                &self.agent_id.to_string(),
                LoopStage::FinalCall,
                FINAL_CONTRACT,
                &self.serialise_history(),
                self.prev_id.as_deref(),
            )
            .await?;
        let answer = response.text;
        self.log(&format!("\n==== FINAL SUMMARY ====\n{answer}\n"))
            .await?;
        self.update_status(true, Some(&answer)).await?;
        Ok(())
    }

    /// Clears in-memory turn history and the response-id chain at a round
    /// boundary, ported from `reset_logical_thread`.
    pub async fn reset_logical_thread(&mut self) -> PipelineResult<()> {
        self.history.clear();
        self.log("\n―――― Logical thread reset ――――\n").await?;
        self.prev_id = None;
        Ok(())
    }

    async fn update_status(&mut self, is_summary: bool, content: Option<&str>) -> PipelineResult<()> {
        if is_summary {
            self.summary = content.and_then(|c| Self::extract_tag(c, "summary"));
            return Ok(());
        }

        let Some(full_answer) = self.full_answer.clone() else {
            self.status = QaStatus::NoAnswer;
            return Ok(());
        };

        let prev_status = self.status;

        let parsed: Result<UpdatePayload, _> = serde_json::from_str(&full_answer);
        let payload = match parsed {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to parse update payload, marking partial: {e}");
                self.status = QaStatus::Partial;
                return Ok(());
            }
        };

        let (finished, remaining): (Vec<_>, Vec<_>) =
            payload.questions.into_iter().partition(|q| q.finished);

        if !finished.is_empty() {
            let ctx_path = PathBuf::from(format!(
                "{}{}.txt",
                self.config.context_path.display(),
                self.num
            ));
            if let Some(parent) = ctx_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&ctx_path)
                .await?;
            for item in &finished {
                file.write_all(serde_json::to_string(item)?.as_bytes())
                    .await?;
                file.write_all(b"\n").await?;
            }
        }

        let remaining_payload = UpdatePayload {
            questions: remaining.clone(),
            rounds: payload.rounds,
        };
        self.full_answer = Some(serde_json::to_string(&remaining_payload)?);

        self.status = if remaining.is_empty() {
            QaStatus::Finished
        } else if !finished.is_empty() {
            QaStatus::Partial
        } else if prev_status == QaStatus::NoAnswer {
            QaStatus::NoAnswer
        } else {
            QaStatus::Partial
        };

        Ok(())
    }

    fn evidence_from_full_answer(&self) -> Vec<EvidenceItem> {
        let Some(full_answer) = &self.full_answer else {
            return Vec::new();
        };
        let Ok(payload) = serde_json::from_str::<UpdatePayload>(full_answer) else {
            return Vec::new();
        };
        payload
            .questions
            .into_iter()
            .map(|q| EvidenceItem {
                question: q.question,
                doc_context: q.doc_context,
                answer_text: q.answer.text,
                citations: q
                    .answer
                    .citations
                    .into_iter()
                    .map(|c| Citation {
                        summary: c.summary,
                        segment_id: c.citation,
                    })
                    .collect(),
                finished: q.finished,
            })
            .collect()
    }

    /// Drives the agent through Search→Select→Update rounds until every
    /// question is finished or `MAX_TOOL_ROUNDS` is exhausted, ported from
    /// `QuestionEvalAgent.run`/`assess_questions`.
    pub async fn run(&mut self) -> AgentResult {
        let outcome = self.run_inner().await;
        if let Err(e) = outcome {
            warn!("ir agent {} run failed: {e}", self.agent_id);
        }
        AgentResult {
            summary: self.summary.clone(),
            status: self.status,
            evidence: self.evidence_from_full_answer(),
        }
    }

    async fn run_inner(&mut self) -> PipelineResult<()> {
        let mut rounds = 0u32;
        while self.status != QaStatus::Finished {
            let segments = self.get_info(rounds == 0).await?;
            self.update_answer(&segments).await?;
            rounds += 1;
            if rounds >= MAX_TOOL_ROUNDS {
                self.force_final_prompt().await?;
                break;
            }
            self.reset_logical_thread().await?;
        }
        info!(agent_id = %self.agent_id, rounds, status = ?self.status, "ir agent finished");
        Ok(())
    }
}


async fn ensure_file(path: &PathBuf) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
