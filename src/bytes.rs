//! Utilities for converting between raw bytes, text, and serialized token strings.

use std::sync::OnceLock;

use bstr::ByteSlice;
use rustc_hash::FxHashMap;

fn byte_level_tables() -> &'static ([char; 256], FxHashMap<char, u8>) {
    static TABLES: OnceLock<([char; 256], FxHashMap<char, u8>)> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut forward = ['\0'; 256];
        let mut reverse = FxHashMap::default();
        let mut bs: Vec<u8> = (b'!'..=b'~').collect();
        bs.extend(b'\xA1'..=b'\xAC');
        bs.extend(b'\xAE'..=b'\xFF');
        let mut cs: Vec<u32> = bs.iter().map(|&b| u32::from(b)).collect();
        let mut printable = [false; 256];
        for &b in &bs {
            printable[b as usize] = true;
        }
        let mut n = 0u32;
        for byte in 0u8..=255 {
            if printable[byte as usize] {
                continue;
            }
            bs.push(byte);
            cs.push(256 + n);
            n += 1;
        }
        for (byte, codepoint) in bs.into_iter().zip(cs) {
            // Every code point below 0x200 is a valid scalar value.
            let ch = char::from_u32(codepoint).unwrap_or(char::REPLACEMENT_CHARACTER);
            forward[byte as usize] = ch;
            reverse.insert(ch, byte);
        }
        (forward, reverse)
    })
}

/// Renders raw bytes in the GPT-2 byte-level alphabet.
///
/// Each byte maps to exactly one printable, non-whitespace code point, so the result can be
/// stored in JSON keys or whitespace separated text files without escaping.
#[must_use]
pub fn bytes_to_unicode(bytes: &[u8]) -> String {
    let (forward, _) = byte_level_tables();
    bytes.iter().map(|&b| forward[b as usize]).collect()
}

/// Inverse of [`bytes_to_unicode`]. Returns `None` when `text` contains a character outside
/// the byte-level alphabet.
#[must_use]
pub fn unicode_to_bytes(text: &str) -> Option<Vec<u8>> {
    let (_, reverse) = byte_level_tables();
    text.chars().map(|c| reverse.get(&c).copied()).collect()
}

/// Interprets `bytes` as UTF-8, silently dropping malformed sequences.
#[must_use]
pub fn decode_utf8_dropping_invalid(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in ByteSlice::utf8_chunks(bytes) {
        text.push_str(chunk.valid());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_level_round_trip() {
        let bytes: Vec<u8> = (0..=u8::MAX).collect();
        let rendered = bytes_to_unicode(&bytes);
        assert_eq!(rendered.chars().count(), 256);
        assert_eq!(unicode_to_bytes(&rendered), Some(bytes));
    }

    #[test]
    fn byte_level_alphabet_has_no_whitespace() {
        let bytes: Vec<u8> = (0..=u8::MAX).collect();
        assert!(!bytes_to_unicode(&bytes).chars().any(char::is_whitespace));
        assert_eq!(bytes_to_unicode(b" the"), "\u{120}the");
    }

    #[test]
    fn unknown_characters_are_rejected() {
        assert_eq!(unicode_to_bytes("\u{4e2d}"), None);
    }

    #[test]
    fn invalid_utf8_is_dropped() {
        assert_eq!(decode_utf8_dropping_invalid(b"ab\xFFcd"), "abcd");
        assert_eq!(decode_utf8_dropping_invalid("héllo".as_bytes()), "héllo");
        // Truncated multi-byte sequence at the end.
        assert_eq!(decode_utf8_dropping_invalid(b"ok\xE2\x82"), "ok");
    }
}
