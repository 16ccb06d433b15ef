//! One end-to-end computation against a loaded engine:
//! allocate, encode, call, decode, free.

use tracing::{trace, warn};

use crate::ai::module::EngineModule;
use crate::ai::protocol::{
    BOARD_BUFFER_BYTES, EVALUATION_BUFFER_BYTES, decode_evaluations, decode_response,
    encode_board, read_i32_slots,
};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{Board, EngineMove, MoveEvaluation, Player};

/// A buffer in the module's linear memory, freed when dropped.
///
/// The guard keeps the module borrowed for its whole lifetime, so every
/// successful `malloc` gets exactly one `free`, including on early returns
/// and panics.
pub struct ForeignBuffer<'m, M: EngineModule> {
    module: &'m mut M,
    ptr: u32,
    size: u32,
}

impl<'m, M: EngineModule> ForeignBuffer<'m, M> {
    pub fn allocate(module: &'m mut M, size: u32) -> BridgeResult<Self> {
        let ptr = module.malloc(size)?;
        if ptr == 0 {
            return Err(BridgeError::AllocationFailed { size });
        }
        trace!("[BRIDGE] allocated {size} bytes at {ptr:#x}");
        Ok(Self { module, ptr, size })
    }

    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn module(&mut self) -> &mut M {
        &mut *self.module
    }

    pub fn write(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        let range = self.range(bytes.len())?;
        let memory = self.module.memory().ok_or(BridgeError::MemoryNotAccessible)?;
        let target = memory
            .get_mut(range)
            .ok_or(BridgeError::MemoryOutOfBounds {
                ptr: self.ptr,
                len: bytes.len(),
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&mut self, len: usize) -> BridgeResult<Vec<u8>> {
        let range = self.range(len)?;
        let memory = self.module.memory().ok_or(BridgeError::MemoryNotAccessible)?;
        memory
            .get(range)
            .map(<[u8]>::to_vec)
            .ok_or(BridgeError::MemoryOutOfBounds { ptr: self.ptr, len })
    }

    fn range(&self, len: usize) -> BridgeResult<std::ops::Range<usize>> {
        if len > self.size as usize {
            return Err(BridgeError::MemoryOutOfBounds { ptr: self.ptr, len });
        }
        let start = self.ptr as usize;
        Ok(start..start + len)
    }
}

impl<M: EngineModule> Drop for ForeignBuffer<'_, M> {
    fn drop(&mut self) {
        if let Err(err) = self.module.free(self.ptr) {
            warn!("[BRIDGE] failed to free engine buffer at {:#x}: {err}", self.ptr);
        }
    }
}

/// Asks the engine for its move.
///
/// `level` is handed to the engine untouched; level 0 may legitimately return
/// a different move for the same board on every call.
pub fn compute_move<M: EngineModule>(
    module: &mut M,
    board: &Board,
    player: Player,
    level: i32,
) -> BridgeResult<EngineMove> {
    let encoded = encode_board(board)?;

    let packed = {
        let mut buffer = ForeignBuffer::allocate(module, BOARD_BUFFER_BYTES)?;
        buffer.write(&encoded.to_bytes())?;
        let ptr = buffer.ptr();
        buffer
            .module()
            .compute_move(ptr, level, player.engine_index())?
    };

    Ok(decode_response(packed)?)
}

/// Asks the engine to score every square for `player`.
pub fn evaluate_moves<M: EngineModule>(
    module: &mut M,
    board: &Board,
    player: Player,
    level: i32,
) -> BridgeResult<Vec<MoveEvaluation>> {
    let encoded = encode_board(board)?;

    let slots = {
        let mut board_buffer = ForeignBuffer::allocate(module, BOARD_BUFFER_BYTES)?;
        board_buffer.write(&encoded.to_bytes())?;
        let board_ptr = board_buffer.ptr();

        let mut result_buffer =
            ForeignBuffer::allocate(board_buffer.module(), EVALUATION_BUFFER_BYTES)?;
        let result_ptr = result_buffer.ptr();
        result_buffer
            .module()
            .evaluate_all(board_ptr, result_ptr, level, player.engine_index())?;
        read_i32_slots(&result_buffer.read(EVALUATION_BUFFER_BYTES as usize)?)
    };

    Ok(decode_evaluations(&slots)?)
}

/// Suspends a running search through the engine's own entry point.
pub fn pause<M: EngineModule>(module: &mut M) -> BridgeResult<()> {
    Ok(module.pause()?)
}

pub fn resume<M: EngineModule>(module: &mut M) -> BridgeResult<()> {
    Ok(module.resume()?)
}
