//! Binary protocol spoken with the foreign engine.
//!
//! Board buffer: 64 little-endian `i32`, row-major, `-1=empty, 0=dark, 1=light`.
//! Move response: `1000 * (63 - bit_position) + 100 + value`.
//! Evaluation buffer: 74 `i32`; slot `10 + i` holds the evaluation for bit
//! position `63 - i` (square index `i`), `-1` marks an illegal square.

use crate::error::{DecodeError, EncodeError};
use crate::types::{BOARD_LEN, BOARD_WIDTH, Board, Cell, EngineMove, MoveEvaluation, Position};

pub const BOARD_BUFFER_BYTES: u32 = 256;
pub const EVALUATION_SLOTS: usize = 74;
pub const EVALUATION_OFFSET: usize = 10;
pub const EVALUATION_BUFFER_BYTES: u32 = (EVALUATION_SLOTS * 4) as u32;
pub const ILLEGAL_SENTINEL: i32 = -1;

const PACK_STRIDE: i64 = 1000;
const PACK_OFFSET: i64 = 100;
const MAX_BIT_POSITION: i64 = BOARD_LEN as i64 - 1;

const ENGINE_EMPTY: i32 = -1;
const ENGINE_DARK: i32 = 0;
const ENGINE_LIGHT: i32 = 1;

/// Board in the engine's cell layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedBoard([i32; BOARD_LEN]);

impl EncodedBoard {
    pub fn cells(&self) -> &[i32; BOARD_LEN] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; BOARD_BUFFER_BYTES as usize] {
        let mut out = [0u8; BOARD_BUFFER_BYTES as usize];
        for (chunk, cell) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&cell.to_le_bytes());
        }
        out
    }
}

pub fn encode_cell(cell: Cell) -> i32 {
    match cell {
        Cell::Empty => ENGINE_EMPTY,
        Cell::Dark => ENGINE_DARK,
        Cell::Light => ENGINE_LIGHT,
    }
}

pub fn encode_board(board: &Board) -> Result<EncodedBoard, EncodeError> {
    let rows = board.rows();
    if rows.len() != BOARD_WIDTH {
        return Err(EncodeError::RowCount { rows: rows.len() });
    }

    let mut cells = [ENGINE_EMPTY; BOARD_LEN];
    for (row, cols) in rows.iter().enumerate() {
        if cols.len() != BOARD_WIDTH {
            return Err(EncodeError::ColumnCount {
                row,
                cols: cols.len(),
            });
        }
        for (col, &code) in cols.iter().enumerate() {
            let cell =
                Cell::from_code(code).ok_or(EncodeError::InvalidCell { row, col, value: code })?;
            cells[row * BOARD_WIDTH + col] = encode_cell(cell);
        }
    }

    Ok(EncodedBoard(cells))
}

/// Splits a packed move response into square and evaluation.
///
/// The +100 offset keeps the low three digits non-negative for evaluations
/// down to -100, so the thousands part is the square index for values in
/// `-100..=899`.
pub fn decode_response(packed: i32) -> Result<EngineMove, DecodeError> {
    let packed_wide = i64::from(packed);
    let index = packed_wide.div_euclid(PACK_STRIDE);
    let bit_position = MAX_BIT_POSITION - index;
    if !(0..=MAX_BIT_POSITION).contains(&bit_position) {
        return Err(DecodeError::BitPositionOutOfRange {
            packed,
            bit_position,
        });
    }

    let value = packed_wide - index * PACK_STRIDE - PACK_OFFSET;
    let position = Position::from_index(index as usize).ok_or(
        DecodeError::BitPositionOutOfRange {
            packed,
            bit_position,
        },
    )?;

    Ok(EngineMove {
        position,
        value: value as i32,
    })
}

/// Inverse of [`decode_response`] for evaluations in `-100..=899`.
pub fn pack_response(position: Position, value: i32) -> i32 {
    (position.index() as i32) * PACK_STRIDE as i32 + PACK_OFFSET as i32 + value
}

/// Reads the all-moves buffer, keeping squares whose slot is not the
/// illegal sentinel. A genuine evaluation of -1 is indistinguishable from
/// "illegal" and is dropped as well.
pub fn decode_evaluations(slots: &[i32]) -> Result<Vec<MoveEvaluation>, DecodeError> {
    if slots.len() != EVALUATION_SLOTS {
        return Err(DecodeError::EvaluationLength {
            expected: EVALUATION_SLOTS,
            len: slots.len(),
        });
    }

    let evaluations = slots[EVALUATION_OFFSET..]
        .iter()
        .enumerate()
        .filter(|&(_, &value)| value != ILLEGAL_SENTINEL)
        .filter_map(|(index, &value)| {
            Position::from_index(index).map(|position| MoveEvaluation { position, value })
        })
        .collect();

    Ok(evaluations)
}

/// Converts raw little-endian memory into `i32` slots. Trailing bytes that
/// do not fill a whole slot are ignored.
pub fn read_i32_slots(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word.copy_from_slice(chunk);
            i32::from_le_bytes(word)
        })
        .collect()
}
