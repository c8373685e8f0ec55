//! # Block motion quantization

use crate::grid::{BlockGrid, GridDims, BASE_CELL_AREA, BLOCK_SIZE};

/// Ratio between the area of an output block and the decoder's base cell.
pub const QUANT_DIVISOR: i16 = (BLOCK_SIZE * BLOCK_SIZE / BASE_CELL_AREA) as i16;

/// Largest magnitude a quantized value may have.
pub const QUANT_LIMIT: i16 = 127;

/// Quantize a single accumulated value.
pub fn quantize(value: i16) -> i8 {
    (value / QUANT_DIVISOR).clamp(-QUANT_LIMIT, QUANT_LIMIT) as i8
}

/// Signed byte motion of a single frame.
///
/// Buffers are sized once and overwritten on every `quantize_grid` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuantizedFrame {
    x: Vec<i8>,
    y: Vec<i8>,
    sum: i32,
}

impl QuantizedFrame {
    pub fn new(dims: GridDims) -> Self {
        Self {
            x: vec![0; dims.len()],
            y: vec![0; dims.len()],
            sum: 0,
        }
    }

    /// Quantize both accumulators of the grid.
    pub fn quantize_grid(&mut self, grid: &BlockGrid) {
        debug_assert_eq!(grid.x().len(), self.x.len());

        self.sum = 0;

        for (out, &v) in self.x.iter_mut().zip(grid.x()) {
            *out = quantize(v);
            self.sum += *out as i32;
        }

        for (out, &v) in self.y.iter_mut().zip(grid.y()) {
            *out = quantize(v);
            self.sum += *out as i32;
        }
    }

    pub fn x(&self) -> &[i8] {
        &self.x
    }

    pub fn y(&self) -> &[i8] {
        &self.y
    }

    /// Sum of all quantized values, both axes combined.
    ///
    /// Only used for progress reporting.
    pub fn sum(&self) -> i32 {
        self.sum
    }
}
