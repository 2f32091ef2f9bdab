//! The 3x3 game board payload
//!
//! Cells are addressed `(x, y)` with `x` the column and `y` the row, both in
//! `0..=2`; storage is row-major (`cells[y][x]`).
//!
//! Win detection relies on one invariant instead of a tie-break: every
//! transition changes exactly one cell and no transition is accepted once a
//! board is terminal, so at most one mark can ever own a completed line.

use crate::errors::ValidationError;
use crate::record::GameStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of the board
pub const BOARD_SIZE: usize = 3;

/// A player's mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    /// Mark of the first owner
    A,
    /// Mark of the second owner
    B,
}

impl Mark {
    /// The other player's mark
    pub fn opponent(self) -> Self {
        match self {
            Mark::A => Mark::B,
            Mark::B => Mark::A,
        }
    }

    fn symbol(self) -> char {
        match self {
            Mark::A => 'X',
            Mark::B => 'O',
        }
    }
}

/// One board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cell {
    /// Nobody has played here
    #[default]
    Empty,
    /// Claimed by a player
    Marked(Mark),
}

impl Cell {
    /// Whether the cell is unclaimed
    pub fn is_empty(self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// A line of three cells that wins the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Line {
    /// Row `y`
    Row(usize),
    /// Column `x`
    Column(usize),
    /// Top-left to bottom-right
    Diagonal,
    /// Top-right to bottom-left
    AntiDiagonal,
}

impl Line {
    /// All eight lines in scan order: rows, columns, diagonals
    pub const ALL: [Line; 8] = [
        Line::Row(0),
        Line::Row(1),
        Line::Row(2),
        Line::Column(0),
        Line::Column(1),
        Line::Column(2),
        Line::Diagonal,
        Line::AntiDiagonal,
    ];

    /// `(x, y)` coordinates covered by this line
    pub fn cells(self) -> [(usize, usize); 3] {
        match self {
            Line::Row(y) => [(0, y), (1, y), (2, y)],
            Line::Column(x) => [(x, 0), (x, 1), (x, 2)],
            Line::Diagonal => [(0, 0), (1, 1), (2, 2)],
            Line::AntiDiagonal => [(2, 0), (1, 1), (0, 2)],
        }
    }
}

/// Immutable 3x3 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    /// All cells empty
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from rows (`rows[y][x]`)
    pub fn from_rows(rows: [[Cell; BOARD_SIZE]; BOARD_SIZE]) -> Self {
        Self { cells: rows }
    }

    /// Borrow the rows
    pub fn rows(&self) -> &[[Cell; BOARD_SIZE]; BOARD_SIZE] {
        &self.cells
    }

    /// Cell at `(x, y)`
    pub fn get(&self, x: usize, y: usize) -> Result<Cell, ValidationError> {
        check_index(x, y)?;
        Ok(self.cells[y][x])
    }

    /// Copy of this board with `mark` placed at `(x, y)`.
    pub fn with_mark(&self, x: usize, y: usize, mark: Mark) -> Result<Self, ValidationError> {
        if !self.get(x, y)?.is_empty() {
            return Err(ValidationError::CellOccupied { x, y });
        }
        let mut next = *self;
        next.cells[y][x] = Cell::Marked(mark);
        Ok(next)
    }

    /// Coordinates whose value differs from `other`
    pub fn changed_cells(&self, other: &Board) -> Vec<(usize, usize)> {
        let mut changed = Vec::new();
        for y in 0..BOARD_SIZE {
            for x in 0..BOARD_SIZE {
                if self.cells[y][x] != other.cells[y][x] {
                    changed.push((x, y));
                }
            }
        }
        changed
    }

    /// First completed line and its owner, scanning rows, columns, diagonals.
    pub fn winning_line(&self) -> Option<(Mark, Line)> {
        Line::ALL.into_iter().find_map(|line| {
            let [a, b, c] = line.cells().map(|(x, y)| self.cells[y][x]);
            match a {
                Cell::Marked(mark) if a == b && b == c => Some((mark, line)),
                _ => None,
            }
        })
    }

    /// Every cell holds a mark
    pub fn is_full(&self) -> bool {
        self.cells.iter().flatten().all(|cell| !cell.is_empty())
    }

    /// No cell holds a mark
    pub fn is_empty(&self) -> bool {
        self.cells.iter().flatten().all(|cell| cell.is_empty())
    }

    /// Number of marks placed
    pub fn marks_placed(&self) -> usize {
        self.cells.iter().flatten().filter(|cell| !cell.is_empty()).count()
    }

    /// Completed line or full board
    pub fn is_terminal(&self) -> bool {
        self.winning_line().is_some() || self.is_full()
    }

    /// Status implied by this payload alone.
    pub fn derive_status(&self) -> GameStatus {
        if self.is_terminal() {
            GameStatus::Terminal
        } else {
            GameStatus::InProgress
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (y, row) in self.cells.iter().enumerate() {
            if y > 0 {
                writeln!(f)?;
            }
            for (x, cell) in row.iter().enumerate() {
                if x > 0 {
                    write!(f, "|")?;
                }
                let symbol = match cell {
                    Cell::Empty => '.',
                    Cell::Marked(mark) => mark.symbol(),
                };
                write!(f, "{symbol}")?;
            }
        }
        Ok(())
    }
}

fn check_index(x: usize, y: usize) -> Result<(), ValidationError> {
    if x >= BOARD_SIZE || y >= BOARD_SIZE {
        return Err(ValidationError::InvalidIndex { x, y });
    }
    Ok(())
}

/// Map a flat position `0..=8` (row-major) to `(x, y)`.
pub fn position_to_coords(position: usize) -> Result<(usize, usize), ValidationError> {
    if position >= BOARD_SIZE * BOARD_SIZE {
        return Err(ValidationError::InvalidIndex {
            x: position % BOARD_SIZE,
            y: position / BOARD_SIZE,
        });
    }
    Ok((position % BOARD_SIZE, position / BOARD_SIZE))
}
