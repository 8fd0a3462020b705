//! Key alphabets and key validation.
//!
//! Fixed-length keys are drawn from [`KEY_CHARSET`], an alphanumeric set with
//! the characters that are easy to confuse in some fonts (`0 O 1 l I`)
//! removed. Custom keys are chosen by users and validated against the wider
//! [`CUSTOM_KEY_CHARSET`].
//!
//! ## Key Enumeration
//!
//! A [`KeyGenerator`] walks every string of one length over an alphabet like
//! an odometer, least significant position last:
//!
//! ```text
//! alphabet "ab", length 2:   aa -> ab -> ba -> bb
//! ```
//!
//! It is used once per fixed-length bucket to seed the free pool.

use crate::error::KeyError;

/// Alphabet for system-assigned keys.
pub const KEY_CHARSET: &str = "abcdefghijkmnopqrstuvwxyz23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Alphabet for user-chosen keys.
pub const CUSTOM_KEY_CHARSET: &str =
    "abcdefghijklmnopqrstuvwxyzåäöABCDEFGHIJKLMNOPQRSTUVWXYZÅÄÖ0123456789-_";

/// Shortest accepted custom key, in characters.
pub const MIN_CUSTOM_KEY_LEN: usize = 4;

/// Custom keys must be strictly shorter than this, in characters.
pub const MAX_CUSTOM_KEY_LEN: usize = 64;

/// Suffix on a requested key asking for the entry's info page instead of its content.
pub const INFO_SUFFIX: char = '~';

/// Enumerates every key of a fixed length over an alphabet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl KeyGenerator {
    /// Creates a generator over `alphabet`.
    ///
    /// Duplicate characters are dropped so the output never repeats a key.
    pub fn new(alphabet: &str, length: usize) -> Self {
        let mut chars: Vec<char> = Vec::with_capacity(alphabet.len());
        for c in alphabet.chars() {
            if !chars.contains(&c) {
                chars.push(c);
            }
        }
        Self {
            alphabet: chars,
            length,
        }
    }

    /// Generator over [`KEY_CHARSET`].
    pub fn fixed(length: usize) -> Self {
        Self::new(KEY_CHARSET, length)
    }

    /// Number of keys this generator yields, `|alphabet|^length`.
    pub fn capacity(&self) -> usize {
        if self.length == 0 {
            return 0;
        }
        self.alphabet.len().pow(self.length as u32)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns true if `key` is one of the keys this generator yields.
    pub fn contains(&self, key: &str) -> bool {
        let mut count = 0;
        for c in key.chars() {
            if !self.alphabet.contains(&c) {
                return false;
            }
            count += 1;
        }
        count == self.length
    }

    /// Iterates over all keys.
    pub fn iter(&self) -> KeyIter<'_> {
        let exhausted = self.alphabet.is_empty() || self.length == 0;
        KeyIter {
            alphabet: &self.alphabet,
            positions: vec![0; self.length],
            exhausted,
        }
    }
}

/// Iterator returned by [`KeyGenerator::iter`].
#[derive(Debug)]
pub struct KeyIter<'a> {
    alphabet: &'a [char],
    positions: Vec<usize>,
    exhausted: bool,
}

impl Iterator for KeyIter<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }

        let key: String = self.positions.iter().map(|&i| self.alphabet[i]).collect();

        // Advance the odometer; wrapping the first position means we are done
        self.exhausted = true;
        for pos in self.positions.iter_mut().rev() {
            *pos += 1;
            if *pos < self.alphabet.len() {
                self.exhausted = false;
                break;
            }
            *pos = 0;
        }

        Some(key)
    }
}

/// Returns true if every character of `s` is in [`CUSTOM_KEY_CHARSET`].
pub fn is_custom_charset(s: &str) -> bool {
    s.chars().all(|c| CUSTOM_KEY_CHARSET.contains(c))
}

/// Checks length bounds and charset of a custom key.
pub fn validate_custom_key(key: &str) -> Result<(), KeyError> {
    let len = key.chars().count();
    if !(MIN_CUSTOM_KEY_LEN..MAX_CUSTOM_KEY_LEN).contains(&len) || !is_custom_charset(key) {
        return Err(KeyError::InvalidKey);
    }
    Ok(())
}

/// A key taken from a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKey<'a> {
    /// The key with any info suffix removed
    pub key: &'a str,
    /// True if the request asked for the info page (`key~`)
    pub show_info: bool,
}

/// Extracts the key from a request path such as `/abc~/anything`.
///
/// Only the first path segment is used. Returns `None` if the segment holds
/// characters outside [`CUSTOM_KEY_CHARSET`], which covers both alphabets.
pub fn parse_request_key(path: &str) -> Option<RequestKey<'_>> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let segment = path.split('/').next().unwrap_or("");

    let (key, show_info) = match segment.strip_suffix(INFO_SUFFIX) {
        Some(key) => (key, true),
        None => (segment, false),
    };

    if !is_custom_charset(key) {
        return None;
    }

    Some(RequestKey { key, show_info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fixed_charset_excludes_ambiguous_characters() {
        for c in ['0', 'O', '1', 'l', 'I'] {
            assert!(!KEY_CHARSET.contains(c), "{c} should not be a key character");
        }
        assert_eq!(KEY_CHARSET.chars().count(), 57);
    }

    #[test]
    fn test_fixed_keys_are_valid_custom_characters() {
        assert!(is_custom_charset(KEY_CHARSET));
    }

    #[test]
    fn test_generator_enumerates_every_key_once() {
        for length in 1..=2 {
            let generator = KeyGenerator::fixed(length);
            let keys: Vec<String> = generator.iter().collect();
            let unique: HashSet<&String> = keys.iter().collect();

            assert_eq!(keys.len(), generator.capacity());
            assert_eq!(unique.len(), keys.len());
            assert!(keys.iter().all(|k| generator.contains(k)));
        }
    }

    #[test]
    fn test_generator_order() {
        let keys: Vec<String> = KeyGenerator::new("ab", 2).iter().collect();
        assert_eq!(keys, vec!["aa", "ab", "ba", "bb"]);
    }

    #[test]
    fn test_generator_three_chars_capacity() {
        let generator = KeyGenerator::fixed(3);
        assert_eq!(generator.capacity(), 57 * 57 * 57);
        assert_eq!(generator.iter().count(), generator.capacity());
    }

    #[test]
    fn test_generator_dedups_alphabet() {
        let generator = KeyGenerator::new("aab", 1);
        assert_eq!(generator.capacity(), 2);
        assert_eq!(generator.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_generator_empty_cases() {
        assert_eq!(KeyGenerator::new("", 2).iter().count(), 0);
        assert_eq!(KeyGenerator::new("abc", 0).iter().count(), 0);
    }

    #[test]
    fn test_generator_contains() {
        let generator = KeyGenerator::fixed(2);
        assert!(generator.contains("ab"));
        assert!(!generator.contains("a"));
        assert!(!generator.contains("abc"));
        assert!(!generator.contains("a0"));
    }

    #[test]
    fn test_custom_key_length_bounds() {
        assert_eq!(validate_custom_key("abc"), Err(KeyError::InvalidKey));
        assert!(validate_custom_key("abcd").is_ok());
        assert!(validate_custom_key(&"x".repeat(63)).is_ok());
        assert_eq!(validate_custom_key(&"x".repeat(64)), Err(KeyError::InvalidKey));
    }

    #[test]
    fn test_custom_key_charset() {
        assert!(validate_custom_key("blåbär-paj_2").is_ok());
        assert_eq!(validate_custom_key("with space"), Err(KeyError::InvalidKey));
        assert_eq!(validate_custom_key("slash/key"), Err(KeyError::InvalidKey));
        assert_eq!(validate_custom_key("tilde~"), Err(KeyError::InvalidKey));
    }

    #[test]
    fn test_custom_key_length_counts_characters() {
        // four characters, eight bytes
        assert!(validate_custom_key("åäöÅ").is_ok());
    }

    #[test]
    fn test_parse_request_key() {
        assert_eq!(
            parse_request_key("/abc"),
            Some(RequestKey {
                key: "abc",
                show_info: false
            })
        );
        assert_eq!(
            parse_request_key("/abc~"),
            Some(RequestKey {
                key: "abc",
                show_info: true
            })
        );
        assert_eq!(
            parse_request_key("/my-link/trailing/parts"),
            Some(RequestKey {
                key: "my-link",
                show_info: false
            })
        );
        assert_eq!(
            parse_request_key("/"),
            Some(RequestKey {
                key: "",
                show_info: false
            })
        );
        assert_eq!(parse_request_key("/a%20b"), None);
    }
}
