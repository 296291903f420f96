//! Conversion between chunk bytes and generation grids.
//!
//! Bit `i` of a chunk (most-significant bit first within each byte) is cell `i`
//! of the grid, row-major.

use crate::types::{DenisError, CHUNK_SIZE, GRID_CELLS};

/// One generation: `GRID_CELLS` cells, each 0 or 1.
pub type Grid = Vec<u32>;

/// A grid with every cell dead.
pub fn empty_grid() -> Grid {
    vec![0; GRID_CELLS]
}

/// Unpack up to `CHUNK_SIZE` bytes into a full grid, zero-filling the tail.
pub fn unpack_bits(bytes: &[u8]) -> Result<Grid, DenisError> {
    if bytes.len() > CHUNK_SIZE {
        return Err(DenisError::Invalid("chunk larger than one generation"));
    }
    let mut grid = empty_grid();
    for (byte, cells) in bytes.iter().zip(grid.chunks_exact_mut(8)) {
        for (bit, cell) in cells.iter_mut().enumerate() {
            *cell = u32::from((byte >> (7 - bit)) & 1);
        }
    }
    Ok(grid)
}

/// Pack cells back into bytes. Any non-zero cell is a set bit.
///
/// `cells.len()` must be a multiple of 8; pass a prefix of a grid to drop
/// trailing padding bits.
pub fn pack_bits(cells: &[u32]) -> Result<Vec<u8>, DenisError> {
    if cells.len() % 8 != 0 {
        return Err(DenisError::Invalid("cell count is not a whole number of bytes"));
    }
    Ok(cells
        .chunks_exact(8)
        .map(|byte| {
            byte.iter()
                .fold(0u8, |acc, &cell| (acc << 1) | u8::from(cell != 0))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first() {
        let grid = unpack_bits(&[0b1000_0001, 0x40]).unwrap();
        assert_eq!(&grid[..8], &[1, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&grid[8..16], &[0, 1, 0, 0, 0, 0, 0, 0]);
        assert!(grid[16..].iter().all(|&c| c == 0));
    }

    #[test]
    fn full_chunk_round_trip() {
        let bytes: Vec<u8> = (0..CHUNK_SIZE).map(|i| (i * 31 % 256) as u8).collect();
        let grid = unpack_bits(&bytes).unwrap();
        assert_eq!(grid.len(), GRID_CELLS);
        assert_eq!(pack_bits(&grid).unwrap(), bytes);
    }

    #[test]
    fn prefix_pack_drops_padding() {
        let grid = unpack_bits(&[0xAA, 0x55]).unwrap();
        assert_eq!(pack_bits(&grid[..8]).unwrap(), vec![0xAA]);
        assert_eq!(pack_bits(&grid[..0]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_oversized_and_ragged() {
        assert!(unpack_bits(&vec![0; CHUNK_SIZE + 1]).is_err());
        assert!(pack_bits(&[1, 0, 1]).is_err());
    }
}
