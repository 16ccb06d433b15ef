//! Worker side of the engine client.
//!
//! A worker thread owns exactly one module handle. Requests arrive over a
//! channel, each is answered with exactly one response carrying the same id.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::ai::bridge::{compute_move, evaluate_moves};
use crate::ai::loader::{EngineRuntime, InterruptToken, ModuleLoader, ModuleSource};
use crate::config::EngineConfig;
use crate::error::LoadError;
use crate::types::{Board, MoveEvaluation, Player, Position};

/// Proof that code runs on an engine worker thread.
///
/// Only the worker can mint one, so module loading cannot be started from
/// the caller's side.
#[derive(Debug)]
pub struct WorkerContext {
    _private: (),
}

impl WorkerContext {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    Calculate {
        request_id: u64,
        board: Board,
        player: Player,
        timeout_ms: u64,
    },
    Evaluate {
        request_id: u64,
        board: Board,
        player: Player,
        timeout_ms: u64,
    },
}

impl WorkerRequest {
    pub fn request_id(&self) -> u64 {
        match self {
            WorkerRequest::Calculate { request_id, .. }
            | WorkerRequest::Evaluate { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub kind: ResponseKind,
    pub request_id: u64,
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluations: Option<Vec<MoveEvaluation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    fn success(request_id: u64, elapsed_ms: u64) -> Self {
        Self {
            kind: ResponseKind::Success,
            request_id,
            position: None,
            value: None,
            evaluations: None,
            elapsed_ms: Some(elapsed_ms),
            error: None,
        }
    }

    pub fn error(request_id: u64, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            request_id,
            position: None,
            value: None,
            evaluations: None,
            elapsed_ms: None,
            error: Some(message.into()),
        }
    }
}

enum Answer {
    Move { position: Position, value: i32 },
    Evaluations(Vec<MoveEvaluation>),
}

/// Serves requests against a lazily loaded module.
///
/// The first request triggers the load. A failed load fails only that request;
/// the next one tries again.
pub struct Dispatcher<R: EngineRuntime> {
    loader: ModuleLoader<R>,
    module: Option<R::Module>,
    level: i32,
    ctx: WorkerContext,
}

impl<R: EngineRuntime> Dispatcher<R> {
    /// Raising `interrupt` stops whatever the loaded module is running.
    pub(crate) fn new(
        runtime: Arc<R>,
        source: ModuleSource,
        config: &EngineConfig,
        interrupt: InterruptToken,
    ) -> Self {
        Self {
            loader: ModuleLoader::new(runtime, source, config).with_interrupt(interrupt),
            module: None,
            level: config.level,
            ctx: WorkerContext::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        let request_id = request.request_id();
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&request)));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(answer)) => {
                debug!("[WORKER] request {request_id} answered in {elapsed_ms}ms");
                let mut response = WorkerResponse::success(request_id, elapsed_ms);
                match answer {
                    Answer::Move { position, value } => {
                        response.position = Some(position);
                        response.value = Some(value);
                    }
                    Answer::Evaluations(evaluations) => {
                        response.evaluations = Some(evaluations);
                    }
                }
                response
            }
            Ok(Err(message)) => {
                warn!("[WORKER] request {request_id} failed: {message}");
                WorkerResponse::error(request_id, message)
            }
            Err(payload) => {
                let message = format!("engine panicked: {}", panic_message(payload.as_ref()));
                warn!("[WORKER] request {request_id} failed: {message}");
                WorkerResponse::error(request_id, message)
            }
        }
    }

    fn execute(&mut self, request: &WorkerRequest) -> Result<Answer, String> {
        let level = self.level;
        let module = self.ensure_loaded().map_err(|err| err.to_string())?;

        match request {
            WorkerRequest::Calculate { board, player, .. } => {
                compute_move(module, board, *player, level)
                    .map(|mv| Answer::Move {
                        position: mv.position,
                        value: mv.value,
                    })
                    .map_err(|err| err.to_string())
            }
            WorkerRequest::Evaluate { board, player, .. } => {
                evaluate_moves(module, board, *player, level)
                    .map(Answer::Evaluations)
                    .map_err(|err| err.to_string())
            }
        }
    }

    fn ensure_loaded(&mut self) -> Result<&mut R::Module, LoadError> {
        let module = match self.module.take() {
            Some(module) => module,
            None => self.loader.load(&self.ctx)?,
        };
        Ok(self.module.insert(module))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Channel ends held by the client side of a worker.
pub struct WorkerHandle {
    pub requests: Sender<WorkerRequest>,
    pub replies: Receiver<WorkerResponse>,
}

/// Starts a worker thread. It runs until the request sender is dropped;
/// raising `interrupt` through the runtime cuts short a request in flight.
pub fn spawn_worker<R: EngineRuntime>(
    runtime: Arc<R>,
    source: ModuleSource,
    config: &EngineConfig,
    interrupt: InterruptToken,
) -> std::io::Result<WorkerHandle> {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
    let config = config.clone();

    thread::Builder::new()
        .name("othello-engine-worker".to_string())
        .spawn(move || {
            let dispatcher = Dispatcher::new(runtime, source, &config, interrupt);
            run(dispatcher, request_rx, reply_tx);
        })?;

    Ok(WorkerHandle {
        requests: request_tx,
        replies: reply_rx,
    })
}

fn run<R: EngineRuntime>(
    mut dispatcher: Dispatcher<R>,
    requests: Receiver<WorkerRequest>,
    replies: Sender<WorkerResponse>,
) {
    info!("[WORKER] started");
    for request in requests.iter() {
        let response = dispatcher.handle(request);
        if replies.send(response).is_err() {
            debug!("[WORKER] reply channel closed");
            break;
        }
    }
    info!("[WORKER] stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::ai::mock::{MockResponse, MockRuntime};

    fn inline_source() -> ModuleSource {
        ModuleSource::Inline {
            name: "mock".to_string(),
            bytes: b"\0asm".to_vec(),
        }
    }

    fn dispatcher(runtime: MockRuntime) -> (Arc<MockRuntime>, Dispatcher<MockRuntime>) {
        let runtime = Arc::new(runtime);
        let config = EngineConfig::default();
        let token = InterruptToken::new();
        let dispatcher = Dispatcher::new(runtime.clone(), inline_source(), &config, token);
        (runtime, dispatcher)
    }

    fn calculate(request_id: u64) -> WorkerRequest {
        WorkerRequest::Calculate {
            request_id,
            board: Board::initial(),
            player: Player::Dark,
            timeout_ms: 3000,
        }
    }

    #[test]
    fn first_request_loads_module_and_answers() {
        let (_, mut dispatcher) = dispatcher(MockRuntime::answering(19_100));
        assert!(!dispatcher.is_loaded());

        let response = dispatcher.handle(calculate(7));

        assert_eq!(response.kind, ResponseKind::Success);
        assert_eq!(response.request_id, 7);
        assert_eq!(response.position, Some(Position::new(2, 3)));
        assert_eq!(response.value, Some(0));
        assert!(response.elapsed_ms.is_some());
        assert!(dispatcher.is_loaded());
    }

    #[test]
    fn failed_load_is_retried_on_next_request() {
        let runtime = MockRuntime::answering(19_100).failing_first(1);
        let (runtime, mut dispatcher) = dispatcher(runtime);

        let first = dispatcher.handle(calculate(1));
        let second = dispatcher.handle(calculate(2));

        assert_eq!(first.kind, ResponseKind::Error);
        assert!(first.error.unwrap().contains("scripted instantiation failure"));
        assert_eq!(second.kind, ResponseKind::Success);
        assert_eq!(runtime.instantiations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn module_is_loaded_once_across_requests() {
        let (runtime, mut dispatcher) = dispatcher(MockRuntime::answering(19_100));

        for id in 0..3 {
            assert_eq!(dispatcher.handle(calculate(id)).kind, ResponseKind::Success);
        }

        assert_eq!(runtime.instantiations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_panic_becomes_error_reply() {
        let (_, mut dispatcher) = dispatcher(MockRuntime::with_response(MockResponse::Panic));

        let response = dispatcher.handle(calculate(3));

        assert_eq!(response.kind, ResponseKind::Error);
        assert_eq!(response.request_id, 3);
        assert!(response.error.unwrap().contains("engine aborted"));
    }

    #[test]
    fn malformed_board_is_reported_as_error() {
        let (_, mut dispatcher) = dispatcher(MockRuntime::answering(19_100));
        let request = WorkerRequest::Calculate {
            request_id: 4,
            board: Board::from_rows(vec![vec![0; 8]; 7]),
            player: Player::Light,
            timeout_ms: 3000,
        };

        let response = dispatcher.handle(request);

        assert_eq!(response.kind, ResponseKind::Error);
        assert!(response.error.unwrap().contains("8 rows"));
    }

    #[test]
    fn evaluate_request_returns_legal_squares() {
        let (_, mut dispatcher) = dispatcher(MockRuntime::answering(19_100));
        let request = WorkerRequest::Evaluate {
            request_id: 5,
            board: Board::initial(),
            player: Player::Dark,
            timeout_ms: 3000,
        };

        let response = dispatcher.handle(request);

        let evaluations = response.evaluations.unwrap();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].position, Position::new(2, 3));
        assert_eq!(evaluations[0].value, 2);
    }

    #[test]
    fn request_serializes_with_kind_tag() {
        let json = serde_json::to_value(calculate(9)).unwrap();

        assert_eq!(json["kind"], "calculate");
        assert_eq!(json["requestId"], 9);
        assert_eq!(json["player"], "dark");
        assert_eq!(json["timeoutMs"], 3000);
        assert_eq!(json["board"][3][3], 2);
    }

    #[test]
    fn error_response_omits_absent_fields() {
        let json = serde_json::to_value(WorkerResponse::error(2, "boom")).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"kind": "error", "requestId": 2, "error": "boom"})
        );
    }

    #[test]
    fn spawned_worker_answers_each_request_with_matching_id() {
        let handle = spawn_worker(
            Arc::new(MockRuntime::answering(19_100)),
            inline_source(),
            &EngineConfig::default(),
            InterruptToken::new(),
        )
        .unwrap();

        handle.requests.send(calculate(11)).unwrap();
        handle.requests.send(calculate(12)).unwrap();

        let first = handle.replies.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = handle.replies.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first.request_id, second.request_id), (11, 12));

        drop(handle.requests);
        assert!(handle.replies.recv_timeout(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn worker_token_reaches_the_loaded_module() {
        let runtime = Arc::new(MockRuntime::answering(19_100));
        let token = InterruptToken::new();
        let handle = spawn_worker(
            runtime.clone(),
            inline_source(),
            &EngineConfig::default(),
            token.clone(),
        )
        .unwrap();
        handle.requests.send(calculate(1)).unwrap();
        handle.replies.recv_timeout(Duration::from_secs(5)).unwrap();

        let module_token = runtime.last_interrupt.lock().clone().unwrap();
        assert!(!module_token.is_raised());
        runtime.interrupt(&token);
        assert!(module_token.is_raised());
    }
}
