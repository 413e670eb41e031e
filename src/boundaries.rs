//! Locates shard boundaries in a corpus file so shards can be pre-tokenized independently.
//!
//! Candidate offsets are spaced uniformly over the file and then snapped forward to the
//! start of the next delimiter occurrence (or to the end of the file). A shard therefore
//! never starts or ends inside a delimiter. Snapping may collapse neighbouring candidates;
//! the result is deduplicated, yielding fewer and larger shards.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use bstr::ByteSlice;
use log::trace;

use crate::error::{BpeError, Result};

/// Returns the sorted, deduplicated shard boundaries for `reader`.
///
/// The first boundary is always `0` and the last is always the stream length. Consecutive
/// read windows overlap by `delimiter.len() - 1` bytes so an occurrence straddling two
/// windows is still found.
pub fn find_chunk_boundaries<R: Read + Seek>(
    reader: &mut R,
    desired_chunks: usize,
    delimiter: &[u8],
    read_window: usize,
) -> Result<Vec<u64>> {
    let file_size = reader
        .seek(SeekFrom::End(0))
        .map_err(|err| BpeError::io(err, None))?;
    let desired_chunks = desired_chunks.max(1);
    let chunk_size = file_size / desired_chunks as u64;

    let mut boundaries: Vec<u64> = (0..=desired_chunks as u64)
        .map(|i| i * chunk_size)
        .collect();
    if let Some(last) = boundaries.last_mut() {
        *last = file_size;
    }

    let window = read_window.max(delimiter.len()).max(1);
    let overlap = delimiter.len().saturating_sub(1);
    let mut buffer = Vec::with_capacity(window);
    let last_index = boundaries.len() - 1;

    for boundary in &mut boundaries[1..last_index] {
        let candidate = *boundary;
        *boundary = snap_forward(
            reader,
            candidate,
            file_size,
            delimiter,
            window,
            overlap,
            &mut buffer,
        )?;
        trace!("boundary candidate {candidate} snapped to {}", *boundary);
    }

    boundaries.sort_unstable();
    boundaries.dedup();
    Ok(boundaries)
}

fn snap_forward<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    file_size: u64,
    delimiter: &[u8],
    window: usize,
    overlap: usize,
    buffer: &mut Vec<u8>,
) -> Result<u64> {
    let mut position = start;
    loop {
        reader
            .seek(SeekFrom::Start(position))
            .map_err(|err| BpeError::io(err, None))?;
        buffer.clear();
        let read = reader
            .by_ref()
            .take(window as u64)
            .read_to_end(buffer)
            .map_err(|err| BpeError::io(err, None))?;
        if read == 0 {
            return Ok(file_size);
        }
        if let Some(found) = buffer.find(delimiter) {
            return Ok(position + found as u64);
        }
        if read < window {
            return Ok(file_size);
        }
        position += (read - overlap).max(1) as u64;
    }
}

/// Opens `path` and splits it into at most `desired_chunks` delimiter-aligned byte ranges.
///
/// A file that cannot be opened or read yields [`BpeError::Io`] carrying the original error.
pub fn shard_ranges<P: AsRef<Path>>(
    path: P,
    desired_chunks: usize,
    delimiter: &[u8],
    read_window: usize,
) -> Result<Vec<Range<u64>>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|err| BpeError::io(err, Some(path.to_path_buf())))?;
    let boundaries = find_chunk_boundaries(&mut file, desired_chunks, delimiter, read_window)
        .map_err(|err| match err {
            BpeError::Io { source, .. } => BpeError::io(source, Some(path.to_path_buf())),
            other => other,
        })?;
    Ok(boundaries
        .windows(2)
        .map(|pair| pair[0]..pair[1])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const EOT: &[u8] = b"<|endoftext|>";

    #[test]
    fn single_chunk_spans_whole_input() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        let boundaries = find_chunk_boundaries(&mut cursor, 1, EOT, 4).unwrap();
        assert_eq!(boundaries, vec![0, 11]);
    }

    #[test]
    fn boundaries_snap_to_delimiter_start() {
        let data = b"aaaa<|endoftext|>bbbb<|endoftext|>cccc".to_vec();
        let len = data.len() as u64;
        let mut cursor = Cursor::new(data);
        let boundaries = find_chunk_boundaries(&mut cursor, 2, EOT, 4).unwrap();
        // Candidate 19 lies inside "bbbb"; the next delimiter starts at 21.
        assert_eq!(boundaries, vec![0, 21, len]);
    }

    #[test]
    fn missing_delimiter_snaps_to_end_and_collapses() {
        let data = vec![b'x'; 100];
        let mut cursor = Cursor::new(data);
        let boundaries = find_chunk_boundaries(&mut cursor, 4, EOT, 8).unwrap();
        assert_eq!(boundaries, vec![0, 100]);
    }

    #[test]
    fn delimiter_straddling_windows_is_found() {
        let mut data = vec![b'a'; 8];
        data.extend_from_slice(b"<s>tail");
        let mut cursor = Cursor::new(data);
        // The first window from candidate 5 ends inside "<s>".
        let boundaries = find_chunk_boundaries(&mut cursor, 3, b"<s>", 5).unwrap();
        assert_eq!(boundaries, vec![0, 8, 15]);
    }

    #[test]
    fn empty_input_has_a_single_boundary() {
        let mut cursor = Cursor::new(Vec::new());
        let boundaries = find_chunk_boundaries(&mut cursor, 3, EOT, 16).unwrap();
        assert_eq!(boundaries, vec![0]);
    }

    #[test]
    fn shard_ranges_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.txt");
        let err = shard_ranges(&missing, 2, EOT, 16).unwrap_err();
        assert_eq!(
            err.io_source().map(std::io::Error::kind),
            Some(std::io::ErrorKind::NotFound)
        );
    }

    #[test]
    fn shard_ranges_cover_the_file_contiguously() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        let body = "one doc<|endoftext|>two doc<|endoftext|>three doc".repeat(8);
        std::fs::write(&path, &body).unwrap();
        let ranges = shard_ranges(&path, 4, EOT, 16).unwrap();
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(body.len() as u64));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for range in &ranges[1..] {
            let start = range.start as usize;
            assert!(body.as_bytes()[start..].starts_with(EOT));
        }
    }
}
