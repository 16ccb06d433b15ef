use serde::{Deserialize, Serialize};

use crate::error::ForeignCallError;

/// Entry points the bridge can reach on a loaded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Export {
    Malloc,
    Free,
    ComputeMove,
    EvaluateAll,
    Init,
    Pause,
    Resume,
}

impl Export {
    /// Exports whose absence makes a module unusable.
    pub const REQUIRED: [Export; 4] = [
        Export::Malloc,
        Export::Free,
        Export::ComputeMove,
        Export::EvaluateAll,
    ];
}

/// Export names as they appear in the module. Defaults follow the
/// Emscripten standalone build of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportNames {
    pub malloc: String,
    pub free: String,
    pub compute_move: String,
    pub evaluate_all: String,
    pub init: String,
    pub pause: String,
    pub resume: String,
    pub memory: String,
}

impl ExportNames {
    pub fn name(&self, export: Export) -> &str {
        match export {
            Export::Malloc => &self.malloc,
            Export::Free => &self.free,
            Export::ComputeMove => &self.compute_move,
            Export::EvaluateAll => &self.evaluate_all,
            Export::Init => &self.init,
            Export::Pause => &self.pause,
            Export::Resume => &self.resume,
        }
    }

    /// Applies manifest renames on top of these names, field by field.
    pub fn with_overrides(&self, overrides: &ExportOverrides) -> Self {
        let pick = |renamed: &Option<String>, current: &String| {
            renamed.clone().unwrap_or_else(|| current.clone())
        };
        Self {
            malloc: pick(&overrides.malloc, &self.malloc),
            free: pick(&overrides.free, &self.free),
            compute_move: pick(&overrides.compute_move, &self.compute_move),
            evaluate_all: pick(&overrides.evaluate_all, &self.evaluate_all),
            init: pick(&overrides.init, &self.init),
            pause: pick(&overrides.pause, &self.pause),
            resume: pick(&overrides.resume, &self.resume),
            memory: pick(&overrides.memory, &self.memory),
        }
    }
}

/// Export renames published in a module manifest. Unset fields keep the
/// configured name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportOverrides {
    pub malloc: Option<String>,
    pub free: Option<String>,
    pub compute_move: Option<String>,
    pub evaluate_all: Option<String>,
    pub init: Option<String>,
    pub pause: Option<String>,
    pub resume: Option<String>,
    pub memory: Option<String>,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            malloc: "malloc".to_string(),
            free: "free".to_string(),
            compute_move: "ai_js".to_string(),
            evaluate_all: "calc_value".to_string(),
            init: "init_ai".to_string(),
            pause: "stop".to_string(),
            resume: "resume".to_string(),
            memory: "memory".to_string(),
        }
    }
}

/// Typed view over a loaded engine.
///
/// Addresses are offsets into the module's linear memory. A handle belongs to
/// exactly one worker; it is moved there once and never shared.
pub trait EngineModule {
    fn has_export(&mut self, export: Export) -> bool;

    /// Picks up the module's linear memory after the runtime reports ready.
    /// Returns whether a memory view is now attached.
    fn adopt_memory(&mut self) -> bool;

    /// Raw memory view, `None` while no memory has been adopted.
    fn memory(&mut self) -> Option<&mut [u8]>;

    fn malloc(&mut self, size: u32) -> Result<u32, ForeignCallError>;

    fn free(&mut self, ptr: u32) -> Result<(), ForeignCallError>;

    fn init(&mut self) -> Result<(), ForeignCallError>;

    /// Move search. Returns the packed response.
    fn compute_move(
        &mut self,
        board_ptr: u32,
        level: i32,
        player: i32,
    ) -> Result<i32, ForeignCallError>;

    /// Writes `EVALUATION_SLOTS` values to `result_ptr`.
    fn evaluate_all(
        &mut self,
        board_ptr: u32,
        result_ptr: u32,
        level: i32,
        player: i32,
    ) -> Result<(), ForeignCallError>;

    fn pause(&mut self) -> Result<(), ForeignCallError>;

    fn resume(&mut self) -> Result<(), ForeignCallError>;
}
