//! Engine side of the crate: wire codec, module loading, the compute bridge
//! and the worker/client pair that keeps the engine off the caller's thread.

pub mod bridge;
pub mod client;
pub mod loader;
pub mod module;
pub mod protocol;
pub mod reference;
pub mod wasm;
pub mod worker;

#[cfg(test)]
mod mock;

pub use client::EngineClient;
pub use loader::{EngineRuntime, ModuleSource};
pub use reference::ReferenceRuntime;
pub use wasm::WasmRuntime;
