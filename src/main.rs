use std::path::PathBuf;

use clap::Parser;
use factcheck_runtime::types::{Topic, TopicResult};
use factcheck_runtime::{config::RuntimeConfig, Runtime};
use tracing_subscriber::EnvFilter;

/// Runs the closed-loop fact-checking pipeline over a JSONL file of topics
/// and writes each topic's best report/score back out as JSON.
#[derive(Parser, Debug)]
#[command(name = "factcheck", version, about)]
struct Cli {
    /// Input JSONL file, one topic per line: `{"docid": "...", "text": "..."}`.
    #[arg(long, value_name = "FILE")]
    topics: PathBuf,

    /// Output path for the `[{ id, report, score }]` result array.
    #[arg(long, value_name = "FILE", default_value = "results.json")]
    out: PathBuf,
}

/// One input line's shape; tolerant of either `text` or `article` as the
/// body field since retrieved corpora vary on this.
#[derive(serde::Deserialize)]
struct TopicLine {
    docid: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    article: String,
}

async fn load_topics(path: &std::path::Path) -> anyhow::Result<Vec<Topic>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut topics = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: TopicLine = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("{}:{}: {e}", path.display(), lineno + 1))?;
        let text = if parsed.text.is_empty() {
            parsed.article
        } else {
            parsed.text
        };
        topics.push(Topic::new(parsed.docid, text));
    }
    Ok(topics)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_env()?;
    let topics = load_topics(&cli.topics).await?;
    tracing::info!(count = topics.len(), "loaded topics");

    let runtime = Runtime::new(config);
    let monitor_handle = runtime.start_bucket_monitor().await;

    let outcomes = runtime.run_all(topics).await;

    let mut results: Vec<TopicResult> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("topic failed: {e}"),
        }
    }

    let json = serde_json::to_string_pretty(&results)?;
    tokio::fs::write(&cli.out, json).await?;
    tracing::info!(path = %cli.out.display(), "wrote results");

    runtime.shutdown().await;
    if let Some(handle) = monitor_handle {
        handle.abort();
    }

    Ok(())
}
