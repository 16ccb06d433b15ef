use crate::types::{BOARD_LEN, BOARD_WIDTH, Player};

const DIRECTIONS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Engine cell values as laid out in the board buffer.
const ENGINE_EMPTY: i32 = -1;
const ENGINE_DARK: i32 = 0;
const ENGINE_LIGHT: i32 = 1;

/// Two-bitboard position used by the in-process reference engine.
/// Bit `i` is the row-major square index `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitboard {
    dark: u64,
    light: u64,
}

impl Bitboard {
    /// Standard opening: light on d4/e5, dark on e4/d5.
    pub fn new() -> Self {
        Self {
            dark: bit(28) | bit(35),
            light: bit(27) | bit(36),
        }
    }

    /// Reads an engine board buffer (`-1` empty, `0` dark, `1` light).
    /// Returns `None` on a wrong length or an unknown cell value.
    pub fn from_engine_cells(cells: &[i32]) -> Option<Self> {
        if cells.len() != BOARD_LEN {
            return None;
        }

        let mut board = Self { dark: 0, light: 0 };
        for (pos, &cell) in cells.iter().enumerate() {
            match cell {
                ENGINE_EMPTY => {}
                ENGINE_DARK => board.dark |= bit(pos),
                ENGINE_LIGHT => board.light |= bit(pos),
                _ => return None,
            }
        }
        Some(board)
    }

    /// Returns legal move mask for the given side.
    pub fn legal_moves(&self, player: Player) -> u64 {
        let (me, opp) = self.sides(player);
        let occupied = me | opp;

        (0..BOARD_LEN)
            .filter(|&pos| (occupied & bit(pos)) == 0 && Self::collect_flips(pos, me, opp) != 0)
            .fold(0u64, |legal, pos| legal | bit(pos))
    }

    /// Stones `player` would flip by playing `pos`. Zero when illegal.
    pub fn flips(&self, pos: usize, player: Player) -> u64 {
        let (me, opp) = self.sides(player);
        Self::collect_flips(pos, me, opp)
    }

    fn sides(&self, player: Player) -> (u64, u64) {
        match player {
            Player::Dark => (self.dark, self.light),
            Player::Light => (self.light, self.dark),
        }
    }

    fn collect_flips(pos: usize, me: u64, opp: u64) -> u64 {
        if pos >= BOARD_LEN {
            return 0;
        }

        let move_bit = bit(pos);
        if ((me | opp) & move_bit) != 0 {
            return 0;
        }

        let (row, col) = pos_to_row_col(pos);
        let mut flips = 0u64;

        for (dr, dc) in DIRECTIONS {
            let mut r = row + dr;
            let mut c = col + dc;
            let mut line = 0u64;

            while in_bounds(r, c) {
                let square = bit((r as usize) * BOARD_WIDTH + c as usize);
                if (opp & square) != 0 {
                    line |= square;
                } else {
                    if (me & square) != 0 {
                        flips |= line;
                    }
                    break;
                }

                r += dr;
                c += dc;
            }
        }

        flips
    }
}

impl Default for Bitboard {
    fn default() -> Self {
        Self::new()
    }
}

fn bit(pos: usize) -> u64 {
    if pos < BOARD_LEN { 1u64 << pos } else { 0 }
}

fn pos_to_row_col(pos: usize) -> (i32, i32) {
    ((pos / BOARD_WIDTH) as i32, (pos % BOARD_WIDTH) as i32)
}

fn in_bounds(row: i32, col: i32) -> bool {
    (0..BOARD_WIDTH as i32).contains(&row) && (0..BOARD_WIDTH as i32).contains(&col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::protocol::encode_board;
    use crate::types::Board;

    fn idx(row: usize, col: usize) -> usize {
        row * BOARD_WIDTH + col
    }

    #[test]
    fn initial_dark_legal_moves_are_four_expected_squares() {
        let board = Bitboard::new();

        // d3, c4, f5, e6
        let expected = bit(idx(2, 3)) | bit(idx(3, 2)) | bit(idx(4, 5)) | bit(idx(5, 4));

        assert_eq!(board.legal_moves(Player::Dark), expected);
    }

    #[test]
    fn engine_cells_of_initial_board_match_opening() {
        let encoded = encode_board(&Board::initial()).unwrap();

        let board = Bitboard::from_engine_cells(encoded.cells()).unwrap();

        assert_eq!(board, Bitboard::new());
    }

    #[test]
    fn engine_cells_reject_unknown_values_and_lengths() {
        let mut cells = vec![-1; 64];
        cells[5] = 7;

        assert_eq!(Bitboard::from_engine_cells(&cells), None);
        assert_eq!(Bitboard::from_engine_cells(&[-1; 63]), None);
    }

    #[test]
    fn flips_cover_only_bracketed_stones() {
        let board = Bitboard::new();

        assert_eq!(board.flips(idx(2, 3), Player::Dark), bit(idx(3, 3))); // d3 flips d4
        assert_eq!(board.flips(idx(0, 0), Player::Dark), 0);
        assert_eq!(board.flips(idx(3, 3), Player::Dark), 0); // occupied
    }
}
