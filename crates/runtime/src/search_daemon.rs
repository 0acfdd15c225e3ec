//! Long-lived search daemon subprocess wrapper, ported from
//! `original_source/.../daemon_wrapper.py`'s `JVMDaemon`. A single instance
//! is held process-wide behind `Runtime` (no ad-hoc globals, spec §3); the
//! start sequence is idempotent under concurrent first callers via a
//! dedicated start lock, matching the source's `_start_lock`.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::daemon_protocol::{self, DaemonRequest, DaemonResponse};
use crate::error::{PipelineError, PipelineResult};

type Pending = DashMap<String, oneshot::Sender<DaemonResponse>>;

struct RunningProcess {
    child: Child,
    stdin: ChildStdin,
}

/// Process-wide handle to the BM25 search daemon. Holds at most one live
/// subprocess; `ensure_started` lazily spawns it on first use. Always
/// constructed behind an `Arc` (see `Runtime`) since the stdout reader task
/// needs a clonable handle back to `pending`.
pub struct SearchDaemon {
    config: DaemonConfig,
    process: Mutex<Option<RunningProcess>>,
    start_lock: Mutex<()>,
    write_lock: Mutex<()>,
    pending: Arc<Pending>,
}

impl SearchDaemon {
    pub fn new(config: DaemonConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            process: Mutex::new(None),
            start_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            pending: Arc::new(DashMap::new()),
        })
    }

    async fn ensure_started(self: &Arc<Self>) -> PipelineResult<()> {
        let _guard = self.start_lock.lock().await;

        {
            let proc = self.process.lock().await;
            if proc.is_some() {
                return Ok(());
            }
        }

        let mut child = Command::new("java")
            .arg("-cp")
            .arg(&self.config.jar_path)
            .arg("src.IR_Ensemble.QA_Assistant.Search.SearcherDaemon")
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::DaemonLost(format!("failed to spawn daemon: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::DaemonLost("daemon stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::DaemonLost("daemon stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::DaemonLost("daemon stderr not piped".to_string()))?;

        tokio::spawn(run_stdout_reader(stdout, Arc::clone(&self.pending)));
        tokio::spawn(run_stderr_drain(stderr));

        let mut proc = self.process.lock().await;
        *proc = Some(RunningProcess { child, stdin });
        Ok(())
    }

    async fn submit(self: &Arc<Self>, call: &str, params: Vec<String>) -> PipelineResult<DaemonResponse> {
        self.ensure_started().await?;

        let req_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id.clone(), tx);

        let request = DaemonRequest {
            id: req_id.clone(),
            call: call.to_string(),
            params,
        };
        let frame = daemon_protocol::encode_request(&request)?;

        {
            let _write_guard = self.write_lock.lock().await;
            let mut proc = self.process.lock().await;
            let running = proc
                .as_mut()
                .ok_or_else(|| PipelineError::DaemonLost("daemon not running".to_string()))?;
            running
                .stdin
                .write_all(&frame)
                .await
                .map_err(|e| PipelineError::DaemonLost(format!("write to daemon failed: {e}")))?;
            running
                .stdin
                .flush()
                .await
                .map_err(|e| PipelineError::DaemonLost(format!("flush to daemon failed: {e}")))?;
        }

        rx.await.map_err(|_| {
            self.pending.remove(&req_id);
            PipelineError::DaemonLost("daemon closed before responding".to_string())
        })
    }

    pub async fn run_bm25_search(
        self: &Arc<Self>,
        queries: &[String],
        out_path: &Path,
    ) -> PipelineResult<()> {
        let mut params: Vec<String> = queries.to_vec();
        params.push(out_path.to_string_lossy().into_owned());
        let resp = self.submit("search", params).await?;
        if resp.status != 0 {
            return Err(PipelineError::ToolFailure {
                tool: "search".to_string(),
                message: format!("daemon returned status {}", resp.status),
            });
        }
        Ok(())
    }

    pub async fn select_documents(
        self: &Arc<Self>,
        segment_ids: &[String],
        is_segment: bool,
    ) -> PipelineResult<Vec<serde_json::Value>> {
        let mut params = Vec::new();
        if is_segment {
            params.push("--asSegments".to_string());
        }
        params.extend(segment_ids.iter().cloned());

        let resp = self.submit("selectDocuments", params).await?;
        let raw = resp
            .result_json
            .or_else(|| resp.result.map(|v| v.to_string()))
            .unwrap_or_default();

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(items)) => Ok(items),
            Ok(other) => Ok(vec![other]),
            Err(_) => Ok(vec![serde_json::Value::String(raw)]),
        }
    }

    /// Graceful → SIGTERM → SIGKILL shutdown, ported from `JVMDaemon.stop`.
    pub async fn stop(&self, graceful: Duration, term: Duration) {
        let mut proc = self.process.lock().await;
        let running = match proc.as_mut() {
            Some(r) => r,
            None => return,
        };

        let _ = running.stdin.shutdown().await;

        if timeout(graceful, running.child.wait()).await.is_ok() {
            *proc = None;
            return;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = running.child.id() {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }
        }

        if timeout(term, running.child.wait()).await.is_err() {
            if let Err(e) = running.child.start_kill() {
                error!("failed to SIGKILL search daemon: {e}");
            }
            let _ = running.child.wait().await;
        }

        *proc = None;
    }
}

/// Background task that owns the daemon's stdout, splitting the byte stream
/// into frames and dispatching each decoded response to its waiter. Spawned
/// once per daemon start, mirroring the source's single `_start_reader` task.
async fn run_stdout_reader(mut stdout: tokio::process::ChildStdout, pending: Arc<Pending>) {
    let mut buf = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 4096];

    'outer: loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                warn!("search daemon closed stdout");
                break;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match daemon_protocol::try_decode_frame(&mut buf) {
                        Ok(Some(payload)) => match daemon_protocol::decode_response(&payload) {
                            Ok(resp) => {
                                if let Some((_, tx)) = pending.remove(&resp.id) {
                                    let _ = tx.send(resp);
                                }
                            }
                            Err(e) => warn!("malformed daemon frame: {e}"),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            // A framing error means the byte stream itself is
                            // no longer trustworthy, not just this one frame:
                            // stop reading entirely so every pending waiter
                            // fails terminally (spec §7 DaemonLost), the same
                            // path stdout EOF takes, matching the source's
                            // malformed-header exception propagating out of
                            // `_read_frame` into `_loop`'s own `except`.
                            warn!("framing error, terminating reader: {e}");
                            break 'outer;
                        }
                    }
                }
            }
            Err(e) => {
                error!("error reading search daemon stdout: {e}");
                break;
            }
        }
    }

    // Dropping the senders resolves every waiter's `rx.await` with an error.
    pending.clear();
}

/// Drains the daemon's stderr into the tracing log, one line per call,
/// matching the source's `_drain_stderr`.
async fn run_stderr_drain(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "search_daemon", "[jvm] {line}");
    }
}
