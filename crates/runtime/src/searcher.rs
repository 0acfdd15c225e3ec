//! Search + rerank composition, ported from
//! `original_source/.../Searcher.py`. Runs a BM25 query through the search
//! daemon, writes its JSONL results to a scratch path, then reranks the
//! segments against a master query and projects the top 15 down to the
//! metadata an IR agent actually needs.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::rate_limit::RateLimiter;
use crate::rerank::{RerankClient, RerankDocument};
use crate::search_daemon::SearchDaemon;
use crate::types::SearchResult;

/// Seam an IR agent drives instead of depending on `Searcher`/`SearchDaemon`
/// directly, so the Search→Select turn pair can be exercised against a fake
/// in tests without a live JVM subprocess.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        queries: &[String],
        master_query: &str,
        agent_id: Uuid,
    ) -> PipelineResult<Vec<SearchResult>>;

    async fn select_documents(
        &self,
        segment_ids: &[String],
        is_segment: bool,
    ) -> PipelineResult<Vec<Value>>;
}

#[derive(Deserialize)]
struct RawSegment {
    segment: Option<String>,
    title: Option<String>,
    url: Option<String>,
    headings: Option<String>,
    docid: Option<String>,
}

/// How many candidates are requested from the rerank service before being
/// truncated to the agent-facing top 15.
const RERANK_TOP_N: usize = 75;
const AGENT_TOP_K: usize = 15;

pub struct Searcher {
    config: RuntimeConfig,
    daemon: Arc<SearchDaemon>,
    rerank: Arc<dyn RerankClient>,
    rate_limiter: Arc<RateLimiter>,
}

impl Searcher {
    pub fn new(
        config: RuntimeConfig,
        daemon: Arc<SearchDaemon>,
        rerank: Arc<dyn RerankClient>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            daemon,
            rerank,
            rate_limiter,
        }
    }

    /// Run the full search pipeline for one agent turn: BM25 search via the
    /// daemon, then rerank, returning the top 15 `{title, url, headings,
    /// segment_id}` tuples.
    pub async fn search(
        &self,
        queries: &[String],
        master_query: &str,
        agent_id: Uuid,
    ) -> PipelineResult<Vec<SearchResult>> {
        let scratch_dir = self.config.bm25_results_path.join(agent_id.to_string());
        tokio::fs::create_dir_all(&scratch_dir).await?;
        let out_path = scratch_dir.join(format!("results-{}.jsonl", Uuid::new_v4()));

        self.daemon.run_bm25_search(queries, &out_path).await?;
        self.rerank_jsonl(&out_path, master_query).await
    }

    async fn rerank_jsonl(
        &self,
        jsonl_path: &PathBuf,
        master_query: &str,
    ) -> PipelineResult<Vec<SearchResult>> {
        let file = tokio::fs::File::open(jsonl_path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut segments = Vec::new();
        let mut meta = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawSegment = serde_json::from_str(&line)?;
            segments.push(RerankDocument {
                text: raw.segment.unwrap_or_default(),
            });
            meta.push(SearchResult {
                title: raw.title,
                url: raw.url,
                headings: raw.headings,
                segment_id: raw.docid.unwrap_or_default(),
            });
        }

        let ranked = self
            .rate_limiter
            .gated_cohere_rerank_call(self.rerank.as_ref(), master_query, &segments, RERANK_TOP_N)
            .await?;

        let mut sorted = ranked;
        sorted.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut out = Vec::with_capacity(AGENT_TOP_K);
        for r in sorted.into_iter().take(AGENT_TOP_K) {
            let m = meta
                .get(r.index)
                .ok_or_else(|| PipelineError::ParseFailure("rerank index out of range".into()))?;
            out.push(m.clone());
        }
        Ok(out)
    }
}

#[async_trait]
impl SearchBackend for Searcher {
    async fn search(
        &self,
        queries: &[String],
        master_query: &str,
        agent_id: Uuid,
    ) -> PipelineResult<Vec<SearchResult>> {
        Searcher::search(self, queries, master_query, agent_id).await
    }

    async fn select_documents(
        &self,
        segment_ids: &[String],
        is_segment: bool,
    ) -> PipelineResult<Vec<Value>> {
        self.daemon.select_documents(segment_ids, is_segment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::error::PipelineResult as Result_;
    use crate::rerank::RerankResult;
    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    struct FakeRerank;

    #[async_trait]
    impl RerankClient for FakeRerank {
        async fn rerank(
            &self,
            _query: &str,
            documents: &[RerankDocument],
            _top_n: usize,
        ) -> Result_<Vec<RerankResult>> {
            Ok(documents
                .iter()
                .enumerate()
                .map(|(i, _)| RerankResult {
                    index: i,
                    relevance_score: 1.0 - (i as f64 * 0.1),
                })
                .collect())
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
            daemon: DaemonConfig::default(),
            max_ir_rounds: 3,
            max_pipeline_rounds: 3,
            terminate_when_ir_questions_empty: false,
        }
    }

    #[tokio::test]
    async fn rerank_jsonl_projects_top_k_metadata() {
        let dir = tempdir().unwrap();
        let jsonl_path = dir.path().join("results.jsonl");
        let mut file = tokio::fs::File::create(&jsonl_path).await.unwrap();
        for i in 0..20 {
            let line = serde_json::json!({
                "segment": format!("segment text {i}"),
                "title": format!("title {i}"),
                "url": format!("https://example.com/{i}"),
                "headings": "h1",
                "docid": format!("seg-{i}"),
            });
            file.write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
        }
        file.flush().await.unwrap();

        let config = test_config(dir.path());
        let daemon = SearchDaemon::new(DaemonConfig::default());
        let searcher = Searcher::new(
            config,
            daemon,
            Arc::new(FakeRerank),
            Arc::new(crate::rate_limit::RateLimiter::new()),
        );

        let results = searcher
            .rerank_jsonl(&jsonl_path, "query")
            .await
            .unwrap();
        assert_eq!(results.len(), AGENT_TOP_K);
        assert_eq!(results[0].segment_id, "seg-0");
    }
}
