//! Caller-side handle to an engine worker.
//!
//! Requests are correlated by id; a reply-router thread hands each worker
//! reply to the task awaiting it. Replies nobody waits for any more are
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::ai::loader::{EngineRuntime, InterruptToken, ModuleSource};
use crate::ai::reference::ReferenceRuntime;
use crate::ai::wasm::WasmRuntime;
use crate::ai::worker::{ResponseKind, WorkerRequest, WorkerResponse, spawn_worker};
use crate::config::EngineConfig;
use crate::error::{ClientError, ClientResult};
use crate::types::{Board, MoveEvaluation, Player, Position};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<WorkerResponse>>>>;

struct WorkerLink {
    requests: Sender<WorkerRequest>,
    pending: PendingMap,
    interrupt: InterruptToken,
}

pub struct EngineClient<R: EngineRuntime = WasmRuntime> {
    runtime: Arc<R>,
    config: EngineConfig,
    source: Option<ModuleSource>,
    link: Mutex<Option<WorkerLink>>,
    next_id: AtomicU64,
}

impl EngineClient<WasmRuntime> {
    /// Client for the engine binary at `config.module_path`.
    pub fn new(config: EngineConfig) -> Self {
        let source = config.module_path.clone().map(ModuleSource::File);
        Self::with_runtime(WasmRuntime, source, config)
    }
}

impl EngineClient<ReferenceRuntime> {
    /// Client backed by the built-in reference engine.
    pub fn reference(config: EngineConfig) -> Self {
        Self::with_runtime(ReferenceRuntime, Some(ReferenceRuntime::source()), config)
    }
}

impl<R: EngineRuntime> EngineClient<R> {
    pub fn with_runtime(runtime: R, source: Option<ModuleSource>, config: EngineConfig) -> Self {
        Self {
            runtime: Arc::new(runtime),
            config,
            source,
            link: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts the worker. The module itself is loaded by the first request.
    /// Calling this on an active client is a no-op.
    pub fn initialize(&self) -> ClientResult<()> {
        let mut link = self.link.lock();
        if link.is_some() {
            return Ok(());
        }

        let source = self.source.clone().ok_or_else(|| ClientError::Initialization {
            message: "no engine module configured".to_string(),
        })?;
        let interrupt = InterruptToken::new();
        let runtime = self.runtime.clone();
        let worker = spawn_worker(runtime, source, &self.config, interrupt.clone()).map_err(
            |err| ClientError::Initialization {
                message: format!("failed to spawn engine worker: {err}"),
            },
        )?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let router_pending = pending.clone();
        thread::Builder::new()
            .name("othello-engine-replies".to_string())
            .spawn(move || route_replies(worker.replies, router_pending))
            .map_err(|err| ClientError::Initialization {
                message: format!("failed to spawn reply router: {err}"),
            })?;

        *link = Some(WorkerLink {
            requests: worker.requests,
            pending,
            interrupt,
        });
        info!("[CLIENT] engine worker started");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Asks the engine for a move. `timeout` defaults to the configured
    /// request timeout; when it fires the engine keeps computing and its
    /// eventual reply is discarded.
    pub async fn calculate_move(
        &self,
        board: &Board,
        player: Player,
        timeout: Option<Duration>,
    ) -> ClientResult<Position> {
        let response = self
            .request(timeout, |request_id, timeout_ms| WorkerRequest::Calculate {
                request_id,
                board: board.clone(),
                player,
                timeout_ms,
            })
            .await?;

        response.position.ok_or_else(|| ClientError::Wasm {
            message: "engine reply carried no move".to_string(),
        })
    }

    /// Scores every legal square for `player`.
    pub async fn evaluate_moves(
        &self,
        board: &Board,
        player: Player,
        timeout: Option<Duration>,
    ) -> ClientResult<Vec<MoveEvaluation>> {
        let response = self
            .request(timeout, |request_id, timeout_ms| WorkerRequest::Evaluate {
                request_id,
                board: board.clone(),
                player,
                timeout_ms,
            })
            .await?;

        response.evaluations.ok_or_else(|| ClientError::Wasm {
            message: "engine reply carried no evaluations".to_string(),
        })
    }

    /// Stops the worker and forgets pending calls. A search still running
    /// on the worker is interrupted. Safe to call repeatedly.
    pub fn dispose(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        self.runtime.interrupt(&link.interrupt);
        let abandoned = {
            let mut pending = link.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            warn!("[CLIENT] disposed with {abandoned} pending request(s)");
        }
        info!("[CLIENT] engine worker released");
    }

    async fn request(
        &self,
        timeout: Option<Duration>,
        build: impl FnOnce(u64, u64) -> WorkerRequest,
    ) -> ClientResult<WorkerResponse> {
        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        let timeout_ms = timeout.as_millis() as u64;
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        let pending = {
            let guard = self.link.lock();
            let link = guard.as_ref().ok_or(ClientError::NotInitialized)?;
            link.pending.lock().insert(request_id, reply_tx);
            if link.requests.send(build(request_id, timeout_ms)).is_err() {
                link.pending.lock().remove(&request_id);
                return Err(ClientError::Disconnected);
            }
            link.pending.clone()
        };

        let response = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Err(_) => {
                pending.lock().remove(&request_id);
                debug!("[CLIENT] request {request_id} timed out after {timeout_ms}ms");
                return Err(ClientError::Timeout { timeout_ms });
            }
        };

        match response.kind {
            ResponseKind::Success => Ok(response),
            ResponseKind::Error => Err(ClientError::Wasm {
                message: response
                    .error
                    .unwrap_or_else(|| "engine reported an error".to_string()),
            }),
        }
    }
}

impl<R: EngineRuntime> Drop for EngineClient<R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn route_replies(replies: Receiver<WorkerResponse>, pending: PendingMap) {
    for response in replies.iter() {
        let request_id = response.request_id;
        let waiter = pending.lock().remove(&request_id);
        match waiter {
            Some(waiter) => {
                if waiter.send(response).is_err() {
                    debug!("[CLIENT] caller stopped waiting for request {request_id}");
                }
            }
            None => debug!("[CLIENT] discarding late reply for request {request_id}"),
        }
    }
    // Worker gone: wake every remaining caller with a closed channel.
    pending.lock().clear();
    debug!("[CLIENT] reply router stopped");
}
