//! In-process engine speaking the same ABI as the foreign module.
//!
//! Used where no engine binary is available. It plays the legal move that
//! flips the most stones; it does not search.

use std::collections::HashMap;

use crate::ai::loader::{Boot, EngineRuntime, InterruptToken, ModuleSource};
use crate::ai::module::{EngineModule, Export, ExportNames};
use crate::ai::protocol::{
    BOARD_BUFFER_BYTES, EVALUATION_OFFSET, EVALUATION_SLOTS, ILLEGAL_SENTINEL, pack_response,
    read_i32_slots,
};
use crate::board::Bitboard;
use crate::error::{ForeignCallError, LoadError};
use crate::types::{BOARD_LEN, Player, Position};

const HEAP_BYTES: usize = 64 * 1024;
/// First usable address; 0 stays the null pointer.
const HEAP_BASE: u32 = 16;
const ALIGN: u32 = 8;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceRuntime;

impl ReferenceRuntime {
    /// Placeholder source; the reference engine is built in and reads no bytes.
    pub fn source() -> ModuleSource {
        ModuleSource::Inline {
            name: "reference-engine".to_string(),
            bytes: Vec::new(),
        }
    }
}

impl EngineRuntime for ReferenceRuntime {
    type Module = ReferenceEngine;

    fn instantiate(
        &self,
        _bytes: &[u8],
        _exports: &ExportNames,
        _interrupt: InterruptToken,
    ) -> Result<Boot<ReferenceEngine>, LoadError> {
        Ok(Boot::Ready(ReferenceEngine::new()))
    }
}

/// First-fit heap over a flat byte buffer.
#[derive(Debug)]
struct Heap {
    bytes: Vec<u8>,
    next: u32,
    free_blocks: Vec<(u32, u32)>,
    live: HashMap<u32, u32>,
}

impl Heap {
    fn new() -> Self {
        Self {
            bytes: vec![0; HEAP_BYTES],
            next: HEAP_BASE,
            free_blocks: Vec::new(),
            live: HashMap::new(),
        }
    }

    /// Returns 0 when the heap is exhausted.
    fn malloc(&mut self, size: u32) -> u32 {
        let Some(size) = size.max(1).checked_next_multiple_of(ALIGN) else {
            return 0;
        };

        if let Some(slot) = self
            .free_blocks
            .iter()
            .position(|&(_, block_size)| block_size >= size)
        {
            let (ptr, block_size) = self.free_blocks.swap_remove(slot);
            self.live.insert(ptr, block_size);
            return ptr;
        }

        let end = self.next as usize + size as usize;
        if end > self.bytes.len() {
            return 0;
        }
        let ptr = self.next;
        self.next += size;
        self.live.insert(ptr, size);
        ptr
    }

    fn free(&mut self, ptr: u32) -> Result<(), ForeignCallError> {
        if ptr == 0 {
            return Ok(());
        }
        let size = self.live.remove(&ptr).ok_or_else(|| ForeignCallError::Trap {
            name: "free".to_string(),
            message: format!("free of unallocated pointer {ptr:#x}"),
        })?;
        self.free_blocks.push((ptr, size));
        Ok(())
    }

    fn slice(&self, name: &str, ptr: u32, len: usize) -> Result<&[u8], ForeignCallError> {
        let start = ptr as usize;
        self.bytes
            .get(start..start + len)
            .ok_or_else(|| out_of_bounds(name, ptr))
    }

    fn slice_mut(
        &mut self,
        name: &str,
        ptr: u32,
        len: usize,
    ) -> Result<&mut [u8], ForeignCallError> {
        let start = ptr as usize;
        self.bytes
            .get_mut(start..start + len)
            .ok_or_else(|| out_of_bounds(name, ptr))
    }
}

fn out_of_bounds(name: &str, ptr: u32) -> ForeignCallError {
    ForeignCallError::Trap {
        name: name.to_string(),
        message: format!("out of bounds memory access at {ptr:#x}"),
    }
}

#[derive(Debug)]
pub struct ReferenceEngine {
    heap: Heap,
    initialized: bool,
    paused: bool,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            heap: Heap::new(),
            initialized: false,
            paused: false,
        }
    }

    /// Number of buffers handed out and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.heap.live.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn read_board(&self, name: &str, board_ptr: u32) -> Result<Bitboard, ForeignCallError> {
        let bytes = self.heap.slice(name, board_ptr, BOARD_BUFFER_BYTES as usize)?;
        Bitboard::from_engine_cells(&read_i32_slots(bytes)).ok_or_else(|| ForeignCallError::Trap {
            name: name.to_string(),
            message: "board buffer holds an unknown cell value".to_string(),
        })
    }
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn player_from_index(name: &str, player: i32) -> Result<Player, ForeignCallError> {
    match player {
        0 => Ok(Player::Dark),
        1 => Ok(Player::Light),
        other => Err(ForeignCallError::Trap {
            name: name.to_string(),
            message: format!("unknown player index {other}"),
        }),
    }
}

/// Flip count per legal square, in square order.
fn scored_moves(board: &Bitboard, player: Player) -> impl Iterator<Item = (usize, i32)> + '_ {
    let legal = board.legal_moves(player);
    (0..BOARD_LEN)
        .filter(move |&pos| legal & (1u64 << pos) != 0)
        .map(move |pos| (pos, board.flips(pos, player).count_ones() as i32))
}

impl EngineModule for ReferenceEngine {
    fn has_export(&mut self, _export: Export) -> bool {
        true
    }

    fn adopt_memory(&mut self) -> bool {
        true
    }

    fn memory(&mut self) -> Option<&mut [u8]> {
        Some(self.heap.bytes.as_mut_slice())
    }

    fn malloc(&mut self, size: u32) -> Result<u32, ForeignCallError> {
        Ok(self.heap.malloc(size))
    }

    fn free(&mut self, ptr: u32) -> Result<(), ForeignCallError> {
        self.heap.free(ptr)
    }

    fn init(&mut self) -> Result<(), ForeignCallError> {
        self.initialized = true;
        Ok(())
    }

    fn compute_move(
        &mut self,
        board_ptr: u32,
        _level: i32,
        player: i32,
    ) -> Result<i32, ForeignCallError> {
        const NAME: &str = "ai_js";
        let player = player_from_index(NAME, player)?;
        let board = self.read_board(NAME, board_ptr)?;

        // Ties go to the lowest square index.
        let best = scored_moves(&board, player).fold(None, |best: Option<(usize, i32)>, candidate| {
            match best {
                Some((_, score)) if score >= candidate.1 => best,
                _ => Some(candidate),
            }
        });
        let (pos, flips) = best.ok_or_else(|| ForeignCallError::Trap {
            name: NAME.to_string(),
            message: "no legal move".to_string(),
        })?;
        let position = Position::from_index(pos).ok_or_else(|| out_of_bounds(NAME, board_ptr))?;

        Ok(pack_response(position, flips))
    }

    fn evaluate_all(
        &mut self,
        board_ptr: u32,
        result_ptr: u32,
        _level: i32,
        player: i32,
    ) -> Result<(), ForeignCallError> {
        const NAME: &str = "calc_value";
        let player = player_from_index(NAME, player)?;
        let board = self.read_board(NAME, board_ptr)?;

        let mut slots = [ILLEGAL_SENTINEL; EVALUATION_SLOTS];
        for (pos, flips) in scored_moves(&board, player) {
            slots[EVALUATION_OFFSET + pos] = flips;
        }

        let out = self.heap.slice_mut(NAME, result_ptr, EVALUATION_SLOTS * 4)?;
        for (chunk, value) in out.chunks_exact_mut(4).zip(slots) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), ForeignCallError> {
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ForeignCallError> {
        self.paused = false;
        Ok(())
    }
}
