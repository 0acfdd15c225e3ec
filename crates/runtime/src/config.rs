//! Runtime configuration, loaded from environment variables (spec §6 / §9
//! ambient layer). Names mirror `original_source/`'s `os.getenv` calls so an
//! existing `.env` from that deployment works unchanged.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Configuration for the daemon subprocess (spec §4.3): path to the BM25
/// search engine's executable jar/binary and the working directory it's
/// launched in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub jar_path: PathBuf,
    pub working_dir: PathBuf,
    pub start_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            jar_path: PathBuf::from("bm25-daemon.jar"),
            working_dir: PathBuf::from("."),
            start_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

/// Top-level runtime configuration, assembled once at process start and
/// shared (read-only) by every component via the `Runtime` handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Scratch directory each IR agent writes its raw BM25 result JSONL
    /// files under, keyed by agent id (`BM25_RESULTS_PATH`).
    pub bm25_results_path: PathBuf,
    /// Directory holding per-topic context files (`CONTEXT_PATH`).
    pub context_path: PathBuf,
    /// Directory holding per-topic report generator logs (`REPORT_PATH`).
    pub report_path: PathBuf,
    /// Directory holding per-topic evaluator logs (`EVAL_PATH`).
    pub eval_path: PathBuf,
    /// Optional CSV path the bucket monitor appends to (`BUCKET_MONITOR_OUT`).
    /// When unset, the monitor task is not spawned.
    pub bucket_monitor_out: Option<PathBuf>,

    pub openai_base_url: String,
    #[serde(skip_serializing)]
    pub openai_api_key: String,
    pub cohere_base_url: String,
    #[serde(skip_serializing)]
    pub cohere_api_key: String,

    pub daemon: DaemonConfig,

    /// Maximum Search→Select→Update rounds an IR agent runs before being
    /// forced to its final summary (spec §4.5).
    pub max_ir_rounds: u32,
    /// Maximum Generate→Evaluate→Retrieve rounds the pipeline driver runs
    /// per topic before giving up and returning the best report seen
    /// (spec §4.9).
    pub max_pipeline_rounds: u32,

    /// Resolution of Open Question 1 (spec §9): whether the driver should
    /// stop early once the evaluator fails but emits no further IR
    /// questions. Default `false` preserves the source's always-run-to-
    /// exhaustion behavior.
    pub terminate_when_ir_questions_empty: bool,
}

impl RuntimeConfig {
    /// Build configuration from the process environment, matching the
    /// variable names `original_source/` reads directly via `os.getenv`.
    /// `.env` is loaded first (if present) via `dotenvy`, the same
    /// `load_dotenv()` the Python source calls at import time.
    pub fn from_env() -> PipelineResult<Self> {
        let _ = dotenvy::dotenv();

        let required = |name: &str| -> PipelineResult<String> {
            std::env::var(name)
                .map_err(|_| PipelineError::Config(format!("missing required env var {name}")))
        };

        Ok(Self {
            bm25_results_path: PathBuf::from(required("BM25_RESULTS_PATH")?),
            context_path: PathBuf::from(required("CONTEXT_PATH")?),
            report_path: PathBuf::from(required("REPORT_PATH")?),
            eval_path: PathBuf::from(required("EVAL_PATH")?),
            bucket_monitor_out: std::env::var("BUCKET_MONITOR_OUT").ok().map(PathBuf::from),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_api_key: required("OPENAI_API_KEY")?,
            cohere_base_url: std::env::var("COHERE_BASE_URL")
                .unwrap_or_else(|_| "https://api.cohere.com".to_string()),
            cohere_api_key: required("COHERE_API_KEY")?,
            daemon: DaemonConfig {
                jar_path: std::env::var("BM25_DAEMON_JAR")
                    .map(PathBuf::from)
                    .unwrap_or_default(),
                ..DaemonConfig::default()
            },
            max_ir_rounds: 3,
            max_pipeline_rounds: 3,
            terminate_when_ir_questions_empty: std::env::var("TERMINATE_WHEN_IR_QUESTIONS_EMPTY")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
