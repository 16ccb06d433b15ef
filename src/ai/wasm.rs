//! Engine modules hosted on wasmtime.
//!
//! One `Engine` is shared by the whole process; every worker gets its own
//! `Store`, `Instance` and linear memory, so nothing mutable is shared between
//! workers.
//!
//! Every store runs with an epoch deadline one tick ahead. Bumping the
//! engine epoch makes running code consult its interrupt token, trapping if
//! the token is raised and carrying on otherwise.

use once_cell::sync::OnceCell;
use tracing::debug;
use wasmtime::{
    Config, Engine, Instance, Linker, Memory, Module, Store, UpdateDeadline, Val, WasmParams,
    WasmResults,
};

use crate::ai::loader::{Boot, EngineRuntime, InterruptToken};
use crate::ai::module::{EngineModule, Export, ExportNames};
use crate::error::{ForeignCallError, LoadError};

/// Reactor-style start-up exports, in the order they are tried.
const STARTUP_EXPORTS: [&str; 2] = ["_initialize", "__wasm_call_ctors"];

static ENGINE: OnceCell<Engine> = OnceCell::new();

fn shared_engine() -> Result<&'static Engine, LoadError> {
    ENGINE.get_or_try_init(|| {
        let mut config = Config::new();
        config.epoch_interruption(true);
        Engine::new(&config).map_err(|err| LoadError::InstantiationFailed {
            message: format!("failed to create wasm engine: {err:#}"),
        })
    })
}

fn instantiation_failed(err: wasmtime::Error) -> LoadError {
    LoadError::InstantiationFailed {
        message: format!("{err:#}"),
    }
}

/// Runtime compiling engine binaries (or WAT text) with wasmtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmRuntime;

impl EngineRuntime for WasmRuntime {
    type Module = WasmModule;

    fn instantiate(
        &self,
        bytes: &[u8],
        exports: &ExportNames,
        interrupt: InterruptToken,
    ) -> Result<Boot<WasmModule>, LoadError> {
        let engine = shared_engine()?;
        let module = Module::new(engine, bytes).map_err(instantiation_failed)?;

        // Host imports the engine may declare (WASI, emscripten notifications)
        // are not provided; calling one traps.
        let mut linker: Linker<()> = Linker::new(engine);
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(instantiation_failed)?;

        let mut store = Store::new(engine, ());
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(move |_| {
            if interrupt.is_raised() {
                return Err(wasmtime::Error::msg("engine interrupted"));
            }
            Ok(UpdateDeadline::Continue(1))
        });
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(instantiation_failed)?;

        let startup = STARTUP_EXPORTS
            .into_iter()
            .find(|name| instance.get_func(&mut store, name).is_some());

        let handle = WasmModule {
            store,
            instance,
            memory: None,
            exports: exports.clone(),
        };

        Ok(match startup {
            Some(name) => {
                debug!("[WASM] module needs start-up via `{name}`");
                Boot::Pending(Box::new(move || handle.run_startup(name)))
            }
            None => Boot::Ready(handle),
        })
    }

    fn interrupt(&self, token: &InterruptToken) {
        token.raise();
        if let Some(engine) = ENGINE.get() {
            engine.increment_epoch();
        }
    }
}

#[derive(Debug)]
pub struct WasmModule {
    store: Store<()>,
    instance: Instance,
    memory: Option<Memory>,
    exports: ExportNames,
}

impl WasmModule {
    fn run_startup(mut self, name: &str) -> Result<Self, LoadError> {
        self.call_untyped(name).map_err(|err| LoadError::InstantiationFailed {
            message: err.to_string(),
        })?;
        Ok(self)
    }

    fn call<P, R>(&mut self, export: Export, params: P) -> Result<R, ForeignCallError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let name = self.exports.name(export);
        if self.instance.get_func(&mut self.store, name).is_none() {
            return Err(ForeignCallError::MissingExport {
                name: name.to_string(),
            });
        }
        let func = self
            .instance
            .get_typed_func::<P, R>(&mut self.store, name)
            .map_err(|err| ForeignCallError::Signature {
                name: name.to_string(),
                message: format!("{err:#}"),
            })?;
        func.call(&mut self.store, params)
            .map_err(|err| ForeignCallError::Trap {
                name: name.to_string(),
                message: format!("{err:#}"),
            })
    }

    /// Calls a parameterless export, discarding whatever it returns.
    fn call_untyped(&mut self, name: &str) -> Result<(), ForeignCallError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| ForeignCallError::MissingExport {
                name: name.to_string(),
            })?;
        let ty = func.ty(&self.store);
        if ty.params().len() != 0 {
            return Err(ForeignCallError::Signature {
                name: name.to_string(),
                message: format!("expected no parameters, found {}", ty.params().len()),
            });
        }
        let mut results: Vec<Val> = ty.results().map(|_| Val::I32(0)).collect();
        func.call(&mut self.store, &[], &mut results)
            .map_err(|err| ForeignCallError::Trap {
                name: name.to_string(),
                message: format!("{err:#}"),
            })
    }

    fn call_export_untyped(&mut self, export: Export) -> Result<(), ForeignCallError> {
        let name = self.exports.name(export).to_string();
        self.call_untyped(&name)
    }
}

impl EngineModule for WasmModule {
    fn has_export(&mut self, export: Export) -> bool {
        let name = self.exports.name(export);
        self.instance.get_func(&mut self.store, name).is_some()
    }

    fn adopt_memory(&mut self) -> bool {
        self.memory = self
            .instance
            .get_memory(&mut self.store, &self.exports.memory);
        self.memory.is_some()
    }

    fn memory(&mut self) -> Option<&mut [u8]> {
        let memory = self.memory?;
        Some(memory.data_mut(&mut self.store))
    }

    fn malloc(&mut self, size: u32) -> Result<u32, ForeignCallError> {
        self.call::<u32, u32>(Export::Malloc, size)
    }

    fn free(&mut self, ptr: u32) -> Result<(), ForeignCallError> {
        self.call::<u32, ()>(Export::Free, ptr)
    }

    fn init(&mut self) -> Result<(), ForeignCallError> {
        self.call_export_untyped(Export::Init)
    }

    fn compute_move(
        &mut self,
        board_ptr: u32,
        level: i32,
        player: i32,
    ) -> Result<i32, ForeignCallError> {
        self.call::<(u32, i32, i32), i32>(Export::ComputeMove, (board_ptr, level, player))
    }

    fn evaluate_all(
        &mut self,
        board_ptr: u32,
        result_ptr: u32,
        level: i32,
        player: i32,
    ) -> Result<(), ForeignCallError> {
        self.call::<(u32, u32, i32, i32), ()>(
            Export::EvaluateAll,
            (board_ptr, result_ptr, level, player),
        )
    }

    fn pause(&mut self) -> Result<(), ForeignCallError> {
        self.call_export_untyped(Export::Pause)
    }

    fn resume(&mut self) -> Result<(), ForeignCallError> {
        self.call_export_untyped(Export::Resume)
    }
}
