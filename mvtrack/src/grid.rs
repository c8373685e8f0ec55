//! # Block grid accumulation
//!
//! Folds the variable sized, variable position motion vectors of one frame onto a fixed grid of
//! `BLOCK_SIZE` square blocks.

use crate::decoder::MotionVector;
use log::*;

/// Side of a single output block, in pixels.
pub const BLOCK_SIZE: u32 = 16;

/// Side of the decoder's base motion vector cell, in pixels.
pub const BASE_CELL: u32 = 8;

/// Area of the base cell. Vectors covering larger regions get weighted by multiples of it.
pub const BASE_CELL_AREA: u32 = BASE_CELL * BASE_CELL;

/// Dimensions of the block grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridDims {
    pub blocks_x: u32,
    pub blocks_y: u32,
}

impl GridDims {
    pub fn new(blocks_x: u32, blocks_y: u32) -> Self {
        Self { blocks_x, blocks_y }
    }

    /// Grid covering a frame of given pixel size.
    ///
    /// Trailing pixels that do not fill a whole block are left out of the grid.
    pub fn for_frame(width: u32, height: u32) -> Self {
        Self::new(width / BLOCK_SIZE, height / BLOCK_SIZE)
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.blocks_x as usize * self.blocks_y as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of a block, if the coordinates are inside the grid.
    pub fn cell(&self, bx: u32, by: u32) -> Option<usize> {
        if bx < self.blocks_x && by < self.blocks_y {
            Some(by as usize * self.blocks_x as usize + bx as usize)
        } else {
            None
        }
    }

    /// Row-major index of the block containing the given pixel, if it is inside the grid.
    pub fn block_index(&self, x: i32, y: i32) -> Option<usize> {
        // Truncating division, so anything in (-BLOCK_SIZE, 0) still lands in the first block.
        let bx = x / BLOCK_SIZE as i32;
        let by = y / BLOCK_SIZE as i32;

        if bx < 0 || by < 0 {
            None
        } else {
            self.cell(bx as u32, by as u32)
        }
    }
}

/// Per-frame scratch accumulators.
///
/// Both buffers are allocated once for the lifetime of a track and reset on every frame.
pub struct BlockGrid {
    dims: GridDims,
    x: Vec<i16>,
    y: Vec<i16>,
}

impl BlockGrid {
    /// Create a new zeroed grid.
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            x: vec![0; dims.len()],
            y: vec![0; dims.len()],
        }
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Zero both accumulators.
    pub fn reset(&mut self) {
        self.x.fill(0);
        self.y.fill(0);
    }

    /// Add a single motion vector to its block.
    ///
    /// Returns `false` if the vector was discarded, either because it carries no motion, or
    /// because it lies outside the grid.
    pub fn add_vector(&mut self, mv: &MotionVector) -> bool {
        if !mv.has_motion() {
            return false;
        }

        let idx = match self.dims.block_index(mv.dst_x, mv.dst_y) {
            Some(idx) => idx,
            None => {
                trace!("Discarding vector outside the grid: {:?}", mv);
                return false;
            }
        };

        let multiplier = (mv.w * mv.h / BASE_CELL_AREA) as i32;

        let mut mx = mv.motion_x.wrapping_mul(multiplier);
        let mut my = mv.motion_y.wrapping_mul(multiplier);

        if mv.source < 0 {
            mx = mx.wrapping_neg();
            my = my.wrapping_neg();
        }

        // 16-bit accumulators, wrapping on overflow.
        self.x[idx] = (self.x[idx] as i32).wrapping_add(mx) as i16;
        self.y[idx] = (self.y[idx] as i32).wrapping_add(my) as i16;

        true
    }

    /// Reset the grid and fold all vectors of a frame into it.
    ///
    /// Returns the number of vectors that contributed.
    pub fn accumulate<'a>(&mut self, vectors: impl IntoIterator<Item = &'a MotionVector>) -> usize {
        self.reset();
        vectors
            .into_iter()
            .filter(|mv| self.add_vector(mv))
            .count()
    }

    /// Horizontal accumulators in row-major order.
    pub fn x(&self) -> &[i16] {
        &self.x
    }

    /// Vertical accumulators in row-major order.
    pub fn y(&self) -> &[i16] {
        &self.y
    }

    /// Accumulated motion at block coordinates, `None` outside the grid.
    pub fn get(&self, bx: u32, by: u32) -> Option<(i16, i16)> {
        self.dims.cell(bx, by).map(|idx| (self.x[idx], self.y[idx]))
    }
}
