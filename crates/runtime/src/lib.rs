//! Orchestration engine for the fact-checking pipeline.
//!
//! Every component is assembled once, behind `Arc`, and handed to callers
//! through a single [`Runtime`] so nothing reaches for a process-global
//! (spec §9 "implementers should avoid ad-hoc globals in favor of an
//! injectable runtime handle").

pub mod answer_contracts;
pub mod bucket_monitor;
pub mod config;
pub mod context_proctor;
pub mod daemon_protocol;
pub mod error;
pub mod ir_agent;
pub mod llm;
pub mod pipeline_driver;
pub mod rate_limit;
pub mod report_evaluator;
pub mod report_generator;
pub mod rerank;
pub mod search_daemon;
pub mod searcher;
pub mod token_bucket;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::bucket_monitor::BucketMonitor;
use crate::config::RuntimeConfig;
use crate::error::PipelineResult;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::rate_limit::RateLimiter;
use crate::rerank::{HttpRerankClient, RerankClient};
use crate::search_daemon::SearchDaemon;
use crate::searcher::Searcher;
use crate::types::{Topic, TopicResult};

/// The assembled set of shared components every pipeline stage needs:
/// the rate limiter, the search daemon and its rerank-aware `Searcher`
/// wrapper, the LLM client, and the static config they were built from.
/// Construct one per process via [`Runtime::new`] and clone the `Arc`
/// fields into whatever concurrent tasks need them.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub client: Arc<dyn LlmClient>,
    pub rate_limiter: Arc<RateLimiter>,
    pub searcher: Arc<Searcher>,
    pub daemon: Arc<SearchDaemon>,
    bucket_monitor: Option<BucketMonitor>,
}

impl Runtime {
    /// Build every component from `config`, using the `reqwest`-backed
    /// HTTP clients for the LLM and rerank providers. Does not start the
    /// search daemon subprocess; that happens lazily on first use.
    pub fn new(config: RuntimeConfig) -> Self {
        let client: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
        ));
        let rerank: Arc<dyn RerankClient> = Arc::new(HttpRerankClient::new(
            config.cohere_base_url.clone(),
            config.cohere_api_key.clone(),
        ));
        let daemon = SearchDaemon::new(config.daemon.clone());
        let rate_limiter = Arc::new(RateLimiter::new());
        let searcher = Arc::new(Searcher::new(
            config.clone(),
            Arc::clone(&daemon),
            rerank,
            Arc::clone(&rate_limiter),
        ));

        let bucket_monitor = config
            .bucket_monitor_out
            .clone()
            .map(|path| BucketMonitor::new(Arc::clone(&rate_limiter), path));

        Self {
            config,
            client,
            rate_limiter,
            searcher,
            daemon,
            bucket_monitor,
        }
    }

    /// Starts the bucket monitor's background task, if one was configured
    /// via `BUCKET_MONITOR_OUT`. A no-op otherwise.
    pub async fn start_bucket_monitor(&self) -> Option<tokio::task::JoinHandle<()>> {
        match &self.bucket_monitor {
            Some(monitor) => Some(monitor.start().await),
            None => None,
        }
    }

    /// Runs every topic through the bounded Generate/Evaluate/Retrieve loop
    /// concurrently (spec §4.9) and returns each topic's final row.
    pub async fn run_all(&self, topics: Vec<Topic>) -> Vec<PipelineResult<TopicResult>> {
        pipeline_driver::run_all(
            topics,
            self.config.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.rate_limiter),
            Arc::clone(&self.searcher) as Arc<dyn crate::searcher::SearchBackend>,
        )
        .await
    }

    /// Stops the bucket monitor (if running) and the search daemon
    /// subprocess, graceful-then-SIGTERM-then-SIGKILL.
    pub async fn shutdown(&self) {
        if let Some(monitor) = &self.bucket_monitor {
            monitor.stop();
        }
        self.daemon
            .stop(Duration::from_secs(5), Duration::from_secs(5))
            .await;
    }
}
