//! Brings an engine module to the ready state inside a worker.
//!
//! Stages: read the companion manifest, fetch and checksum the binary,
//! instantiate, wait for the ready signal, adopt the memory view, verify the
//! required exports, run the optional one-time init.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ai::module::{EngineModule, Export, ExportNames, ExportOverrides};
use crate::ai::worker::WorkerContext;
use crate::config::EngineConfig;
use crate::error::LoadError;

const MANIFEST_EXTENSION: &str = "json";

/// Where the engine binary comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    File(PathBuf),
    Inline { name: String, bytes: Vec<u8> },
}

impl ModuleSource {
    /// Companion manifest path: the binary path with its extension replaced.
    pub fn manifest_path(&self) -> Option<PathBuf> {
        match self {
            ModuleSource::File(path) => Some(path.with_extension(MANIFEST_EXTENSION)),
            ModuleSource::Inline { .. } => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ModuleSource::File(path) => path.display().to_string(),
            ModuleSource::Inline { name, .. } => name.clone(),
        }
    }

    fn fetch(&self) -> Result<Vec<u8>, LoadError> {
        match self {
            ModuleSource::File(path) => std::fs::read(path).map_err(|err| LoadError::FetchFailed {
                message: format!("{}: {err}", path.display()),
            }),
            ModuleSource::Inline { bytes, .. } => Ok(bytes.clone()),
        }
    }
}

/// Optional JSON sidecar published next to the engine binary.
///
/// The binary is always read from the caller-supplied path; the manifest can
/// only rename exports and pin a checksum. Renames apply per export on top
/// of the configured names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    #[serde(default)]
    pub exports: ExportOverrides,
    #[serde(default)]
    pub crc32: Option<u32>,
}

/// Start-up routine that must finish before the module is usable.
pub type StartupRoutine<M> = Box<dyn FnOnce() -> Result<M, LoadError> + Send>;

/// Outcome of instantiation.
pub enum Boot<M> {
    /// Usable right away.
    Ready(M),
    /// Usable once the routine signals ready.
    Pending(StartupRoutine<M>),
}

/// Stop request for foreign code running on behalf of one module.
///
/// A child token reads as raised once it or any of its ancestors is raised,
/// so one client-wide token covers every module its worker loads.
#[derive(Debug, Clone)]
pub struct InterruptToken {
    flags: Vec<Arc<AtomicBool>>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    pub fn child(&self) -> Self {
        let mut flags = self.flags.clone();
        flags.push(Arc::new(AtomicBool::new(false)));
        Self { flags }
    }

    /// Raises this token and, through it, every child.
    pub fn raise(&self) {
        if let Some(own) = self.flags.last() {
            own.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_raised(&self) -> bool {
        self.flags.iter().any(|flag| flag.load(Ordering::SeqCst))
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns module bytes into a live module.
pub trait EngineRuntime: Send + Sync + 'static {
    type Module: EngineModule + Send + 'static;

    /// Instantiates a module. Foreign code the module runs later must stop
    /// once `interrupt` is raised through [`EngineRuntime::interrupt`].
    fn instantiate(
        &self,
        bytes: &[u8],
        exports: &ExportNames,
        interrupt: InterruptToken,
    ) -> Result<Boot<Self::Module>, LoadError>;

    /// Raises `token` and wakes any foreign code that must observe it.
    fn interrupt(&self, token: &InterruptToken) {
        token.raise();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotLoaded,
    Loading,
    Ready,
}

pub struct ModuleLoader<R: EngineRuntime> {
    runtime: Arc<R>,
    source: ModuleSource,
    exports: ExportNames,
    expected_crc32: Option<u32>,
    ready_timeout: Duration,
    state: ReadinessState,
    interrupt: InterruptToken,
    live_startups: Arc<AtomicUsize>,
}

/// Counts a start-up thread as live until the thread ends.
struct LiveStartup(Arc<AtomicUsize>);

impl LiveStartup {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveStartup {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<R: EngineRuntime> ModuleLoader<R> {
    pub fn new(runtime: Arc<R>, source: ModuleSource, config: &EngineConfig) -> Self {
        Self {
            runtime,
            source,
            exports: config.exports.clone(),
            expected_crc32: config.expected_crc32,
            ready_timeout: config.ready_timeout(),
            state: ReadinessState::NotLoaded,
            interrupt: InterruptToken::new(),
            live_startups: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ties every module this loader produces to `token`.
    pub fn with_interrupt(mut self, token: InterruptToken) -> Self {
        self.interrupt = token;
        self
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Start-up threads still running, including abandoned ones.
    pub fn live_startups(&self) -> usize {
        self.live_startups.load(Ordering::SeqCst)
    }

    /// Loads the module. A failed attempt leaves the loader `NotLoaded` so
    /// it can be retried; a loader that already produced a module refuses.
    pub fn load(&mut self, _ctx: &WorkerContext) -> Result<R::Module, LoadError> {
        if self.state == ReadinessState::Ready {
            return Err(LoadError::AlreadyLoaded);
        }

        self.state = ReadinessState::Loading;
        info!("[LOADER] loading engine module {}", self.source.name());
        match self.try_load() {
            Ok(module) => {
                self.state = ReadinessState::Ready;
                info!("[LOADER] engine module ready");
                Ok(module)
            }
            Err(err) => {
                self.state = ReadinessState::NotLoaded;
                warn!("[LOADER] {} ({})", err, err.kind());
                Err(err)
            }
        }
    }

    fn try_load(&self) -> Result<R::Module, LoadError> {
        let manifest = self.read_manifest()?;
        let exports = self.exports.with_overrides(&manifest.exports);
        let expected_crc32 = manifest.crc32.or(self.expected_crc32);

        let bytes = self.source.fetch()?;
        if let Some(expected) = expected_crc32 {
            let actual = crc32fast::hash(&bytes);
            if actual != expected {
                return Err(LoadError::FetchFailed {
                    message: format!(
                        "CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}"
                    ),
                });
            }
        }
        debug!("[LOADER] fetched {} bytes", bytes.len());

        let attempt = self.interrupt.child();
        let mut module = match self.runtime.instantiate(&bytes, &exports, attempt.clone())? {
            Boot::Ready(module) => module,
            Boot::Pending(startup) => self.await_ready(startup, &attempt)?,
        };

        if !module.adopt_memory() {
            warn!("[LOADER] module exposes no memory view");
        }

        for export in Export::REQUIRED {
            if !module.has_export(export) {
                return Err(LoadError::InstantiationFailed {
                    message: format!("missing required export `{}`", exports.name(export)),
                });
            }
        }

        if module.has_export(Export::Init) {
            module
                .init()
                .map_err(|err| LoadError::InstantiationFailed {
                    message: err.to_string(),
                })?;
        } else {
            debug!("[LOADER] no init export, skipping engine initialization");
        }

        Ok(module)
    }

    fn read_manifest(&self) -> Result<ModuleManifest, LoadError> {
        let Some(path) = self.source.manifest_path() else {
            return Ok(ModuleManifest::default());
        };
        if !path.exists() {
            return Ok(ModuleManifest::default());
        }

        let json = std::fs::read_to_string(&path).map_err(|err| LoadError::FetchFailed {
            message: format!("{}: {err}", path.display()),
        })?;
        debug!("[LOADER] using manifest {}", path.display());
        serde_json::from_str(&json).map_err(|err| LoadError::FetchFailed {
            message: format!("invalid manifest {}: {err}", path.display()),
        })
    }

    /// Runs the start-up routine off-thread and waits for its one-shot
    /// signal. On timeout the attempt is interrupted and the thread is left
    /// to unwind on its own, never joined.
    fn await_ready(
        &self,
        startup: StartupRoutine<R::Module>,
        attempt: &InterruptToken,
    ) -> Result<R::Module, LoadError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let live = LiveStartup::enter(&self.live_startups);
        thread::Builder::new()
            .name("othello-engine-startup".to_string())
            .spawn(move || {
                let _live = live;
                let _ = ready_tx.send(startup());
            })
            .map_err(|err| LoadError::InstantiationFailed {
                message: format!("failed to run module start-up: {err}"),
            })?;

        match ready_rx.recv_timeout(self.ready_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.runtime.interrupt(attempt);
                Err(LoadError::InitializationTimeout {
                    timeout_ms: self.ready_timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(LoadError::InstantiationFailed {
                message: "module start-up ended without signalling ready".to_string(),
            }),
        }
    }
}
