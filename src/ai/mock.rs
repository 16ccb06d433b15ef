//! Scriptable engine module and runtime used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::ai::loader::{Boot, EngineRuntime, InterruptToken};
use crate::ai::module::{EngineModule, Export, ExportNames};
use crate::ai::protocol::{EVALUATION_OFFSET, EVALUATION_SLOTS, ILLEGAL_SENTINEL, read_i32_slots};
use crate::error::{ForeignCallError, LoadError};

const HEAP_BYTES: usize = 4096;
const HEAP_BASE: u32 = 64;

#[derive(Debug, Clone, Copy)]
pub(crate) enum MockResponse {
    Packed(i32),
    Trap,
    Panic,
}

#[derive(Debug)]
pub(crate) struct MockModule {
    pub memory: Option<Vec<u8>>,
    pub response: MockResponse,
    pub missing: Vec<Export>,
    pub null_malloc: bool,
    pub null_malloc_after: Option<usize>,
    pub next_ptr: u32,
    pub malloc_calls: usize,
    pub allocated: Vec<u32>,
    pub freed: Vec<u32>,
    pub compute_calls: Vec<(u32, i32, i32)>,
    pub evaluate_calls: usize,
    pub init_calls: usize,
    pub pause_calls: usize,
    pub resume_calls: usize,
    pub last_board: Option<Vec<i32>>,
}

impl MockModule {
    pub fn with_response(response: MockResponse) -> Self {
        Self {
            memory: Some(vec![0; HEAP_BYTES]),
            response,
            missing: Vec::new(),
            null_malloc: false,
            null_malloc_after: None,
            next_ptr: HEAP_BASE,
            malloc_calls: 0,
            allocated: Vec::new(),
            freed: Vec::new(),
            compute_calls: Vec::new(),
            evaluate_calls: 0,
            init_calls: 0,
            pause_calls: 0,
            resume_calls: 0,
            last_board: None,
        }
    }

    pub fn answering(packed: i32) -> Self {
        Self::with_response(MockResponse::Packed(packed))
    }

    fn trap(name: &str) -> ForeignCallError {
        ForeignCallError::Trap {
            name: name.to_string(),
            message: "unreachable executed".to_string(),
        }
    }
}

impl EngineModule for MockModule {
    fn has_export(&mut self, export: Export) -> bool {
        !self.missing.contains(&export)
    }

    fn adopt_memory(&mut self) -> bool {
        self.memory.is_some()
    }

    fn memory(&mut self) -> Option<&mut [u8]> {
        self.memory.as_deref_mut()
    }

    fn malloc(&mut self, size: u32) -> Result<u32, ForeignCallError> {
        self.malloc_calls += 1;
        let exhausted = self
            .null_malloc_after
            .is_some_and(|limit| self.allocated.len() >= limit);
        if self.null_malloc || exhausted {
            return Ok(0);
        }
        let ptr = self.next_ptr;
        self.next_ptr += size.next_multiple_of(8);
        self.allocated.push(ptr);
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32) -> Result<(), ForeignCallError> {
        self.freed.push(ptr);
        Ok(())
    }

    fn init(&mut self) -> Result<(), ForeignCallError> {
        self.init_calls += 1;
        Ok(())
    }

    fn compute_move(
        &mut self,
        board_ptr: u32,
        level: i32,
        player: i32,
    ) -> Result<i32, ForeignCallError> {
        self.compute_calls.push((board_ptr, level, player));
        if let Some(memory) = self.memory.as_deref() {
            let start = board_ptr as usize;
            self.last_board = memory.get(start..start + 256).map(read_i32_slots);
        }
        match self.response {
            MockResponse::Packed(packed) => Ok(packed),
            MockResponse::Trap => Err(Self::trap("ai_js")),
            MockResponse::Panic => panic!("engine aborted"),
        }
    }

    fn evaluate_all(
        &mut self,
        _board_ptr: u32,
        result_ptr: u32,
        _level: i32,
        _player: i32,
    ) -> Result<(), ForeignCallError> {
        self.evaluate_calls += 1;
        if matches!(self.response, MockResponse::Trap) {
            return Err(Self::trap("calc_value"));
        }
        let Some(memory) = self.memory.as_deref_mut() else {
            return Err(Self::trap("calc_value"));
        };
        let start = result_ptr as usize;
        for slot in 0..EVALUATION_SLOTS {
            let value = if slot == EVALUATION_OFFSET + 19 {
                2
            } else {
                ILLEGAL_SENTINEL
            };
            let at = start + slot * 4;
            memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), ForeignCallError> {
        self.pause_calls += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ForeignCallError> {
        self.resume_calls += 1;
        Ok(())
    }
}

/// Runtime handing out ready `MockModule`s, optionally failing the first
/// few instantiations.
#[derive(Debug)]
pub(crate) struct MockRuntime {
    pub response: MockResponse,
    pub failing_loads: AtomicUsize,
    pub instantiations: AtomicUsize,
    /// Interrupt token handed to the latest instantiation.
    pub last_interrupt: Mutex<Option<InterruptToken>>,
}

impl MockRuntime {
    pub fn answering(packed: i32) -> Self {
        Self::with_response(MockResponse::Packed(packed))
    }

    pub fn with_response(response: MockResponse) -> Self {
        Self {
            response,
            failing_loads: AtomicUsize::new(0),
            instantiations: AtomicUsize::new(0),
            last_interrupt: Mutex::new(None),
        }
    }

    pub fn failing_first(self, loads: usize) -> Self {
        self.failing_loads.store(loads, Ordering::SeqCst);
        self
    }
}

impl EngineRuntime for MockRuntime {
    type Module = MockModule;

    fn instantiate(
        &self,
        _bytes: &[u8],
        _exports: &ExportNames,
        interrupt: InterruptToken,
    ) -> Result<Boot<MockModule>, LoadError> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        *self.last_interrupt.lock() = Some(interrupt);
        let failed = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LoadError::InstantiationFailed {
                message: "scripted instantiation failure".to_string(),
            });
        }
        Ok(Boot::Ready(MockModule::with_response(self.response)))
    }
}
