//! `vocab.json` / `merges.txt` persistence.
//!
//! Byte strings are rendered with the GPT-2 byte-level alphabet so every entry is a
//! whitespace-free string. The vocabulary is a JSON object mapping rendered token to id,
//! written in id order. The merge list is one `left right` pair per line after a
//! `#version` header.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::bytes::{bytes_to_unicode, unicode_to_bytes};
use crate::error::{BpeError, Result};
use crate::model::{MergeRule, TokenId, Vocabulary};

const MERGES_HEADER: &str = "#version: 0.2";

struct VocabJson<'a>(&'a Vocabulary);

impl Serialize for VocabJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, token) in self.0.iter() {
            map.serialize_entry(&bytes_to_unicode(token), &id)?;
        }
        map.end()
    }
}

/// Writes `vocab` as a JSON object `{ token: id }`.
pub fn save_vocab<P: AsRef<Path>>(vocab: &Vocabulary, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|err| BpeError::io(err, Some(path.to_path_buf())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &VocabJson(vocab))?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .map_err(|err| BpeError::io(err, Some(path.to_path_buf())))
}

/// Reads a vocabulary written by [`save_vocab`].
///
/// Ids must be dense from zero; duplicate ids, duplicate byte strings and characters outside
/// the byte-level alphabet are rejected.
pub fn load_vocab<P: AsRef<Path>>(path: P) -> Result<Vocabulary> {
    let path = path.as_ref();
    let data =
        fs::read_to_string(path).map_err(|err| BpeError::io(err, Some(path.to_path_buf())))?;
    let raw: FxHashMap<String, TokenId> = serde_json::from_str(&data)?;

    let total = raw.len();
    let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
    for (rendered, id) in raw {
        let bytes = unicode_to_bytes(&rendered).ok_or_else(|| {
            BpeError::Serialization(format!(
                "vocabulary entry {rendered:?} uses characters outside the byte-level alphabet"
            ))
        })?;
        let slot = slots.get_mut(id as usize).ok_or_else(|| {
            BpeError::Serialization(format!(
                "vocabulary id {id} for {rendered:?} is out of range for {total} entries"
            ))
        })?;
        if slot.replace(bytes).is_some() {
            return Err(BpeError::Serialization(format!(
                "vocabulary id {id} is assigned more than once"
            )));
        }
    }

    let tokens = slots
        .into_iter()
        .enumerate()
        .map(|(id, slot)| {
            slot.ok_or_else(|| BpeError::Serialization(format!("vocabulary id {id} is missing")))
        })
        .collect::<Result<Vec<_>>>()?;
    Vocabulary::new(tokens).map_err(|err| BpeError::Serialization(err.to_string()))
}

/// Writes `merges` one pair per line, in priority order.
pub fn save_merges<P: AsRef<Path>>(merges: &[MergeRule], path: P) -> Result<()> {
    let path = path.as_ref();
    let io_err = |err: std::io::Error| BpeError::io(err, Some(path.to_path_buf()));
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{MERGES_HEADER}").map_err(io_err)?;
    for (left, right) in merges {
        writeln!(
            writer,
            "{} {}",
            bytes_to_unicode(left),
            bytes_to_unicode(right)
        )
        .map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}

/// Reads a merge list written by [`save_merges`]. Blank lines are ignored.
pub fn load_merges<P: AsRef<Path>>(path: P) -> Result<Vec<MergeRule>> {
    let path = path.as_ref();
    let data =
        fs::read_to_string(path).map_err(|err| BpeError::io(err, Some(path.to_path_buf())))?;
    parse_merges(&data)
}

fn parse_merges(data: &str) -> Result<Vec<MergeRule>> {
    let mut merges = Vec::new();
    for (line_no, line) in data.lines().enumerate() {
        if line_no == 0 && line.starts_with("#version") {
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(BpeError::Serialization(format!(
                "merges line {} must contain exactly two tokens: {line:?}",
                line_no + 1
            )));
        };
        let decode = |token: &str| {
            unicode_to_bytes(token).ok_or_else(|| {
                BpeError::Serialization(format!(
                    "merges line {} uses characters outside the byte-level alphabet",
                    line_no + 1
                ))
            })
        };
        merges.push((decode(left)?, decode(right)?));
    }
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vocab() -> Vocabulary {
        let mut tokens: Vec<Vec<u8>> = vec![b"<|endoftext|>".to_vec()];
        tokens.extend((0u8..=255).map(|b| vec![b]));
        tokens.push(b" \n".to_vec());
        tokens.push(vec![0xE2, 0x82]);
        Vocabulary::new(tokens).unwrap()
    }

    #[test]
    fn vocab_round_trip_preserves_every_byte_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        let vocab = sample_vocab();
        save_vocab(&vocab, &path).unwrap();
        assert_eq!(load_vocab(&path).unwrap(), vocab);
    }

    #[test]
    fn merges_round_trip_with_whitespace_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merges.txt");
        let merges = vec![
            (b" ".to_vec(), b"\n".to_vec()),
            (b"a".to_vec(), vec![0xFF, 0x00]),
        ];
        save_merges(&merges, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(MERGES_HEADER));
        assert_eq!(text.lines().count(), 3);
        assert_eq!(load_merges(&path).unwrap(), merges);
    }

    #[test]
    fn vocab_with_gaps_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, r#"{"a": 0, "b": 2}"#).unwrap();
        assert!(matches!(
            load_vocab(&path).unwrap_err(),
            BpeError::Serialization(_)
        ));
    }

    #[test]
    fn vocab_with_shared_ids_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, r#"{"a": 0, "b": 0}"#).unwrap();
        assert!(load_vocab(&path).is_err());
    }

    #[test]
    fn malformed_merge_lines_are_rejected() {
        assert!(parse_merges("#version: 0.2\na b c\n").is_err());
        assert!(parse_merges("lonely\n").is_err());
        assert!(parse_merges("\u{4e2d} a\n").is_err());
        assert_eq!(parse_merges("\n\na b\n").unwrap().len(), 1);
    }

    #[test]
    fn missing_files_surface_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_merges(dir.path().join("absent.txt")).unwrap_err();
        assert!(err.io_source().is_some());
    }
}
