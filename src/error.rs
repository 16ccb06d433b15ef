//! Error types for the engine bridge
//!
//! Each layer owns one enum. Every variant maps to a stable `kind()` string so
//! failures stay identifiable after they are flattened into worker replies.

use thiserror::Error;

/// Board validation failures. Always caller-data problems.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("board must have 8 rows, got {rows}")]
    RowCount { rows: usize },

    #[error("board row {row} must have 8 cells, got {cols}")]
    ColumnCount { row: usize, cols: usize },

    #[error("invalid cell value {value} at ({row}, {col})")]
    InvalidCell { row: usize, col: usize, value: u8 },
}

/// Engine responses that do not match the packed format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packed response {packed} implies bit position {bit_position} outside 0..=63")]
    BitPositionOutOfRange { packed: i32, bit_position: i64 },

    #[error("evaluation buffer must hold {expected} slots, got {len}")]
    EvaluationLength { expected: usize, len: usize },
}

/// A call into the foreign module that did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForeignCallError {
    #[error("module does not export `{name}`")]
    MissingExport { name: String },

    #[error("`{name}` has an unexpected signature: {message}")]
    Signature { name: String, message: String },

    #[error("`{name}` trapped: {message}")]
    Trap { name: String, message: String },
}

/// Failures while bringing a module to the ready state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to fetch engine module: {message}")]
    FetchFailed { message: String },

    #[error("failed to instantiate engine module: {message}")]
    InstantiationFailed { message: String },

    #[error("engine module did not become ready within {timeout_ms}ms")]
    InitializationTimeout { timeout_ms: u64 },

    #[error("engine module is already loaded in this worker")]
    AlreadyLoaded,
}

impl LoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::FetchFailed { .. } => "fetch_failed",
            LoadError::InstantiationFailed { .. } => "instantiation_failed",
            LoadError::InitializationTimeout { .. } => "initialization_timeout",
            LoadError::AlreadyLoaded => "already_loaded",
        }
    }
}

/// Failures of a single compute through the bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("engine allocator returned a null address for {size} bytes")]
    AllocationFailed { size: u32 },

    #[error("engine memory buffer is not accessible")]
    MemoryNotAccessible,

    #[error("engine buffer at {ptr:#x} (+{len} bytes) lies outside linear memory")]
    MemoryOutOfBounds { ptr: u32, len: usize },

    #[error("engine execution failed: {0}")]
    Execution(#[from] ForeignCallError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Encode(_) => "encode_error",
            BridgeError::AllocationFailed { .. } => "allocation_failed",
            BridgeError::MemoryNotAccessible => "memory_not_accessible",
            BridgeError::MemoryOutOfBounds { .. } => "memory_out_of_bounds",
            BridgeError::Execution(_) => "execution_error",
            BridgeError::Decode(_) => "decode_error",
        }
    }
}

/// Errors surfaced to the caller of [`crate::ai::client::EngineClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("engine client is not initialized")]
    NotInitialized,

    #[error("failed to start engine worker: {message}")]
    Initialization { message: String },

    #[error("engine error: {message}")]
    Wasm { message: String },

    #[error("engine did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("engine worker went away before answering")]
    Disconnected,
}

impl ClientError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::NotInitialized => "not_initialized",
            ClientError::Initialization { .. } => "initialization_failed",
            ClientError::Wasm { .. } => "wasm_error",
            ClientError::Timeout { .. } => "timeout",
            ClientError::Disconnected => "disconnected",
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
pub type ClientResult<T> = Result<T, ClientError>;
