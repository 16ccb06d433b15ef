use serde::{Deserialize, Serialize};

pub const BOARD_WIDTH: usize = 8;
pub const BOARD_LEN: usize = BOARD_WIDTH * BOARD_WIDTH;

/// Raw cell codes used by the game model: 0=empty, 1=dark, 2=light.
pub const CELL_EMPTY: u8 = 0;
pub const CELL_DARK: u8 = 1;
pub const CELL_LIGHT: u8 = 2;

/// A board coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: u8,
    pub col: u8,
}

impl Position {
    pub fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    /// Builds a position from a row-major square index (0..=63).
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= BOARD_LEN {
            return None;
        }
        Some(Self {
            row: (index / BOARD_WIDTH) as u8,
            col: (index % BOARD_WIDTH) as u8,
        })
    }

    pub fn index(self) -> usize {
        self.row as usize * BOARD_WIDTH + self.col as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    Dark,
    Light,
}

impl Player {
    /// Player indicator passed to the engine: 0=dark, 1=light.
    pub fn engine_index(self) -> i32 {
        match self {
            Player::Dark => 0,
            Player::Light => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cell {
    Empty,
    Dark,
    Light,
}

impl Cell {
    pub fn code(self) -> u8 {
        match self {
            Cell::Empty => CELL_EMPTY,
            Cell::Dark => CELL_DARK,
            Cell::Light => CELL_LIGHT,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            CELL_EMPTY => Some(Cell::Empty),
            CELL_DARK => Some(Cell::Dark),
            CELL_LIGHT => Some(Cell::Light),
            _ => None,
        }
    }
}

/// Board snapshot handed over by the game model.
///
/// Rows hold raw cell codes. The shape is not enforced here: the board
/// arrives from outside the crate and is only validated when encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board(Vec<Vec<u8>>);

impl Board {
    pub fn empty() -> Self {
        Self(vec![vec![CELL_EMPTY; BOARD_WIDTH]; BOARD_WIDTH])
    }

    /// Standard opening: light on d4/e5, dark on e4/d5.
    pub fn initial() -> Self {
        let mut board = Self::empty();
        board.set(3, 3, Cell::Light);
        board.set(3, 4, Cell::Dark);
        board.set(4, 3, Cell::Dark);
        board.set(4, 4, Cell::Light);
        board
    }

    pub fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        Self(rows)
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
        self.0
            .get(row)
            .and_then(|cells| cells.get(col))
            .and_then(|&code| Cell::from_code(code))
    }

    /// Sets a cell. Out-of-shape coordinates are ignored.
    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if let Some(slot) = self.0.get_mut(row).and_then(|cells| cells.get_mut(col)) {
            *slot = cell.code();
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

/// Move chosen by the engine together with its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMove {
    pub position: Position,
    pub value: i32,
}

/// One square of an all-moves evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEvaluation {
    pub position: Position,
    pub value: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_board_has_four_stones_in_center() {
        let board = Board::initial();

        assert_eq!(board.get(3, 3), Some(Cell::Light));
        assert_eq!(board.get(3, 4), Some(Cell::Dark));
        assert_eq!(board.get(4, 3), Some(Cell::Dark));
        assert_eq!(board.get(4, 4), Some(Cell::Light));
        let stones = board
            .rows()
            .iter()
            .flatten()
            .filter(|&&code| code != CELL_EMPTY)
            .count();
        assert_eq!(stones, 4);
    }

    #[test]
    fn position_index_round_trips_row_major() {
        let pos = Position::from_index(19).unwrap();

        assert_eq!(pos, Position::new(2, 3));
        assert_eq!(pos.index(), 19);
        assert!(Position::from_index(64).is_none());
    }

    #[test]
    fn player_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Player::Light).unwrap(), "\"light\"");
        assert_eq!(Player::Dark.engine_index(), 0);
        assert_eq!(Player::Light.engine_index(), 1);
    }
}
