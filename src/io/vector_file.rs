//! The external vector file format (spec §6): a sequence of records, each
//! `int32 dim_repeat` followed by `dim_repeat` elements. Used for base /
//! query / training-sample vectors (`float32`), id vectors (`int32`), and
//! quantized base vectors (`uint8`).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{IvfHnswError, Result};

fn io_err(path: &Path, source: std::io::Error) -> IvfHnswError {
    IvfHnswError::io(path.to_path_buf(), source)
}

/// Like [`io_err`] but records the byte offset of the read that failed, so
/// a truncated or corrupt file points the caller at the exact position
/// (spec §7: `IoError` "carries path and position").
fn io_err_at(path: &Path, position: u64, source: std::io::Error) -> IvfHnswError {
    IvfHnswError::io_at(path.to_path_buf(), position, source)
}

/// Reads every record in `path` as an `f32` vector, verifying each
/// record's `dim_repeat == d` (spec §6: "Readers MUST verify dim_repeat ==
/// d and fail with MalformedInput otherwise").
pub fn read_f32_vectors(path: &Path, d: usize) -> Result<Vec<Vec<f32>>> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut pos: u64 = 0;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(io_err_at(path, pos, e)),
        }
        pos += 4;
        let dim_repeat = i32::from_le_bytes(len_buf);
        if dim_repeat < 0 || dim_repeat as usize != d {
            return Err(IvfHnswError::malformed(
                "vector_file::read_f32_vectors",
                format!("record dim_repeat {dim_repeat} does not match configured d={d}"),
            ));
        }

        let mut buf = vec![0u8; d * 4];
        reader.read_exact(&mut buf).map_err(|e| io_err_at(path, pos, e))?;
        pos += buf.len() as u64;
        let record: Vec<f32> = buf
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        out.push(record);
    }

    Ok(out)
}

/// Writes `vectors` in the same record format, for test fixtures and for
/// round-tripping external datasets.
pub fn write_f32_vectors(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut writer = BufWriter::new(file);
    for v in vectors {
        writer
            .write_all(&(v.len() as i32).to_le_bytes())
            .map_err(|e| io_err(path, e))?;
        for x in v {
            writer.write_all(&x.to_le_bytes()).map_err(|e| io_err(path, e))?;
        }
    }
    writer.flush().map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Reads a sequence of `int32` id records (each `dim_repeat` followed by
/// that many `int32` ids) — the groundtruth/id-vector element type in
/// spec §6.
pub fn read_i32_vectors(path: &Path) -> Result<Vec<Vec<i32>>> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut pos: u64 = 0;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(io_err_at(path, pos, e)),
        }
        pos += 4;
        let dim_repeat = i32::from_le_bytes(len_buf);
        if dim_repeat < 0 {
            return Err(IvfHnswError::malformed(
                "vector_file::read_i32_vectors",
                format!("negative dim_repeat {dim_repeat}"),
            ));
        }
        let mut buf = vec![0u8; dim_repeat as usize * 4];
        reader.read_exact(&mut buf).map_err(|e| io_err_at(path, pos, e))?;
        pos += buf.len() as u64;
        let record: Vec<i32> = buf
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        out.push(record);
    }

    Ok(out)
}

/// Reads a sequence of `uint8`-element records — the quantized-base-vector
/// element type in spec §6.
pub fn read_u8_vectors(path: &Path, d: usize) -> Result<Vec<Vec<u8>>> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut pos: u64 = 0;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(io_err_at(path, pos, e)),
        }
        pos += 4;
        let dim_repeat = i32::from_le_bytes(len_buf);
        if dim_repeat < 0 || dim_repeat as usize != d {
            return Err(IvfHnswError::malformed(
                "vector_file::read_u8_vectors",
                format!("record dim_repeat {dim_repeat} does not match configured d={d}"),
            ));
        }
        let mut buf = vec![0u8; d];
        reader.read_exact(&mut buf).map_err(|e| io_err_at(path, pos, e))?;
        pos += buf.len() as u64;
        out.push(buf);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn f32_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vecs.bin");
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        write_f32_vectors(&path, &vectors).unwrap();
        let read = read_f32_vectors(&path, 3).unwrap();
        assert_eq!(read, vectors);
    }

    #[test]
    fn dimension_mismatch_is_malformed_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vecs.bin");
        write_f32_vectors(&path, &[vec![1.0, 2.0, 3.0]]).unwrap();
        let err = read_f32_vectors(&path, 4).unwrap_err();
        assert!(matches!(err, IvfHnswError::MalformedInput { .. }));
    }

    #[test]
    fn truncated_record_reports_io_error_with_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vecs.bin");
        // A full record header (dim_repeat=3) followed by only one element
        // instead of three: the second read_exact fails mid-record, at
        // byte offset 4.
        let mut bytes = 3i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = read_f32_vectors(&path, 3).unwrap_err();
        match err {
            IvfHnswError::Io { position, .. } => assert_eq!(position, Some(4)),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
