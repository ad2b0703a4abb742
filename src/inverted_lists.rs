//! Inverted lists (spec component D): per-coarse-cell, append-only storage
//! of `(id, residual-code, norm-code)` tuples.
//!
//! Population happens under concurrent inserts (spec §5: "each cell has a
//! mutex guarding append"), so each cell's backing vectors are wrapped in
//! their own [`parking_lot::Mutex`] rather than one global lock over the
//! whole structure.

use parking_lot::Mutex;

/// One coarse cell's accumulated postings. `codes` holds `(m+1)` bytes per
/// id: `m` residual-PQ bytes followed by one norm-PQ byte, so
/// `codes.len() == (m + 1) * ids.len()` always holds (spec §3 invariant).
struct Cell {
    ids: Vec<u32>,
    codes: Vec<u8>,
}

pub struct InvertedLists {
    code_size: usize,
    cells: Vec<Mutex<Cell>>,
}

impl InvertedLists {
    pub fn new(num_cells: usize, code_size: usize) -> Self {
        InvertedLists {
            code_size,
            cells: (0..num_cells)
                .map(|_| {
                    Mutex::new(Cell {
                        ids: Vec::new(),
                        codes: Vec::new(),
                    })
                })
                .collect(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Appends one posting to `cell`. `code` must hold exactly `code_size`
    /// bytes (`m` residual bytes + 1 norm byte).
    pub fn append(&self, cell: usize, id: u32, code: &[u8]) {
        debug_assert_eq!(code.len(), self.code_size);
        let mut c = self.cells[cell].lock();
        c.ids.push(id);
        c.codes.extend_from_slice(code);
    }

    pub fn cell_len(&self, cell: usize) -> usize {
        self.cells[cell].lock().ids.len()
    }

    pub fn total_len(&self) -> usize {
        self.cells.iter().map(|c| c.lock().ids.len()).sum()
    }

    /// Copies out a cell's `(ids, codes)` for scanning. Cells are read-only
    /// once the index is built (spec §5), so callers outside the build
    /// phase never race with `append`.
    pub fn scan(&self, cell: usize) -> (Vec<u32>, Vec<u8>) {
        let c = self.cells[cell].lock();
        (c.ids.clone(), c.codes.clone())
    }

    /// Snapshots every cell for persistence, in cell order.
    pub fn snapshot(&self) -> Vec<(Vec<u32>, Vec<u8>)> {
        (0..self.num_cells()).map(|c| self.scan(c)).collect()
    }

    pub fn from_snapshot(code_size: usize, cells: Vec<(Vec<u32>, Vec<u8>)>) -> Self {
        let lists = InvertedLists {
            code_size,
            cells: cells
                .into_iter()
                .map(|(ids, codes)| Mutex::new(Cell { ids, codes }))
                .collect(),
        };
        lists
    }
}
