use super::{Game, MoveError, Outcome};

pub const ROWS: usize = 6;
pub const COLS: usize = 7;

const DIRECTIONS: [(i32, i32); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// Connect Four position. Row 0 is the top, row 5 is the bottom; player 0 moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFour {
    cells: [[Option<u8>; COLS]; ROWS],
    heights: [u8; COLS],
    to_move: u8,
    plies: u8,
    outcome: Option<Outcome>,
}

impl ConnectFour {
    pub fn new() -> Self {
        ConnectFour {
            cells: [[None; COLS]; ROWS],
            heights: [0; COLS],
            to_move: 0,
            plies: 0,
            outcome: None,
        }
    }

    /// Owner of the piece at `(row, col)`, if any.
    pub fn get(&self, row: usize, col: usize) -> Option<usize> {
        self.cells[row][col].map(usize::from)
    }

    pub fn is_column_full(&self, col: usize) -> bool {
        col >= COLS || self.heights[col] as usize == ROWS
    }

    /// Row a piece dropped into `col` would land on.
    fn landing_row(&self, col: usize) -> Option<usize> {
        if self.is_column_full(col) {
            None
        } else {
            Some(ROWS - 1 - self.heights[col] as usize)
        }
    }

    /// Length of the line through `(row, col)` along `(dr, dc)` in both directions.
    fn run_length(&self, row: usize, col: usize, (dr, dc): (i32, i32)) -> usize {
        let owner = self.cells[row][col];
        let mut count = 1;
        for sign in [1, -1] {
            let (mut r, mut c) = (row as i32 + sign * dr, col as i32 + sign * dc);
            while (0..ROWS as i32).contains(&r)
                && (0..COLS as i32).contains(&c)
                && self.cells[r as usize][c as usize] == owner
            {
                count += 1;
                r += sign * dr;
                c += sign * dc;
            }
        }
        count
    }

    fn connects_four(&self, row: usize, col: usize) -> bool {
        self.cells[row][col].is_some()
            && DIRECTIONS
                .iter()
                .any(|&dir| self.run_length(row, col, dir) >= 4)
    }
}

impl Default for ConnectFour {
    fn default() -> Self {
        Self::new()
    }
}

impl Game for ConnectFour {
    const NUM_PLAYERS: usize = 2;
    const ACTION_SIZE: usize = COLS;
    const OBSERVATION_SHAPE: [usize; 3] = [3, ROWS, COLS];

    fn initial() -> Self {
        Self::new()
    }

    fn current_player(&self) -> usize {
        self.to_move as usize
    }

    fn ply(&self) -> usize {
        self.plies as usize
    }

    fn legal_actions(&self) -> Vec<usize> {
        if self.outcome.is_some() {
            return Vec::new();
        }
        (0..COLS).filter(|&col| !self.is_column_full(col)).collect()
    }

    fn play(&mut self, action: usize) -> Result<(), MoveError> {
        if self.outcome.is_some() {
            return Err(MoveError::GameOver);
        }
        let row = self
            .landing_row(action)
            .ok_or(MoveError::IllegalAction(action))?;

        self.cells[row][action] = Some(self.to_move);
        self.heights[action] += 1;
        self.plies += 1;

        if self.connects_four(row, action) {
            self.outcome = Some(Outcome::Winner(self.to_move as usize));
        } else if self.plies as usize == ROWS * COLS {
            self.outcome = Some(Outcome::Draw);
        }
        self.to_move = 1 - self.to_move;
        Ok(())
    }

    fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Player-relative planes: own pieces, opponent pieces, landing squares.
    fn encode(&self, out: &mut [f32]) {
        let plane = ROWS * COLS;
        out[..3 * plane].fill(0.0);
        for row in 0..ROWS {
            for col in 0..COLS {
                if let Some(owner) = self.cells[row][col] {
                    let channel = if owner == self.to_move { 0 } else { 1 };
                    out[channel * plane + row * COLS + col] = 1.0;
                }
            }
        }
        if self.outcome.is_none() {
            for col in 0..COLS {
                if let Some(row) = self.landing_row(col) {
                    out[2 * plane + row * COLS + col] = 1.0;
                }
            }
        }
    }

    /// Identity plus the left-right mirror.
    fn symmetries(&self, observation: &[f32], policy: &[f32]) -> Vec<(Vec<f32>, Vec<f32>)> {
        let mut mirrored = observation.to_vec();
        for (src, dst) in observation
            .chunks_exact(COLS)
            .zip(mirrored.chunks_exact_mut(COLS))
        {
            for col in 0..COLS {
                dst[col] = src[COLS - 1 - col];
            }
        }
        let flipped: Vec<f32> = policy.iter().rev().copied().collect();
        vec![(observation.to_vec(), policy.to_vec()), (mirrored, flipped)]
    }
}
