//! Offline batch assignment of base vectors to coarse cells, cached on
//! disk (spec component G). Assigning billions of vectors with
//! `ef_search ≥ 220` is the dominant build-time cost, so the result is
//! written once and skipped on subsequent runs (spec §4.G).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{IvfHnswError, Result};
use crate::index::IndexCore;
use crate::io::vector_file;

fn io_err(path: &Path, source: std::io::Error) -> IvfHnswError {
    IvfHnswError::io(path.to_path_buf(), source)
}

fn io_err_at(path: &Path, position: u64, source: std::io::Error) -> IvfHnswError {
    IvfHnswError::io_at(path.to_path_buf(), position, source)
}

pub struct PrecomputedAssignment;

impl PrecomputedAssignment {
    /// Reads `base_path` in chunks of `batch_size` vectors, assigns each
    /// with `index.assign`, and appends `(int32 batch_size, uint32[batch_size]
    /// coarse_ids)` records to `target_path` (spec §6). No-ops if
    /// `target_path` already exists.
    pub fn build(index: &IndexCore, base_path: &Path, target_path: &Path, batch_size: usize) -> Result<()> {
        if target_path.exists() {
            return Ok(());
        }

        let d = index.config().d;
        let vectors = vector_file::read_f32_vectors(base_path, d)?;

        let file = File::create(target_path).map_err(|e| io_err(target_path, e))?;
        let mut w = BufWriter::new(file);

        for chunk in vectors.chunks(batch_size.max(1)) {
            let ids: Result<Vec<u32>> = chunk.iter().map(|v| index.assign(v)).collect();
            let ids = ids?;
            w.write_all(&(ids.len() as i32).to_le_bytes())
                .map_err(|e| io_err(target_path, e))?;
            for id in &ids {
                w.write_all(&id.to_le_bytes()).map_err(|e| io_err(target_path, e))?;
            }
        }
        w.flush().map_err(|e| io_err(target_path, e))?;
        Ok(())
    }

    /// Reads back every batch record written by [`Self::build`], in order,
    /// flattened into one assignment-per-vector sequence.
    pub fn read(target_path: &Path) -> Result<Vec<u32>> {
        let file = File::open(target_path).map_err(|e| io_err(target_path, e))?;
        let mut r = BufReader::new(file);
        let mut out = Vec::new();
        let mut pos: u64 = 0;

        loop {
            let mut len_buf = [0u8; 4];
            match r.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(io_err_at(target_path, pos, e)),
            }
            pos += 4;
            let batch_size = i32::from_le_bytes(len_buf);
            if batch_size < 0 {
                return Err(IvfHnswError::malformed(
                    "PrecomputedAssignment::read",
                    format!("negative batch_size {batch_size}"),
                ));
            }
            for _ in 0..batch_size {
                let mut id_buf = [0u8; 4];
                r.read_exact(&mut id_buf).map_err(|e| io_err_at(target_path, pos, e))?;
                pos += 4;
                out.push(u32::from_le_bytes(id_buf));
            }
        }

        Ok(out)
    }
}
