//! Tokenizer adapter used for chunk sizing.
//!
//! The chunker only needs a way to turn text into a numeric token sequence
//! and back. Real deployments can plug a BPE tokenizer in behind the
//! [`Tokenizer`] trait; the default [`WordTokenizer`] interns whitespace
//! words, which keeps sizing deterministic without model files.

use lasso::{Key, Spur, ThreadedRodeo};

use crate::{Error, Result};

/// Text <-> token-id conversion boundary.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a token-id sequence.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode a token-id sequence back into text.
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Word-level tokenizer backed by a thread-safe interner.
///
/// Ids are stable for the lifetime of the tokenizer instance, so a window
/// sliced out of an encoded sequence always decodes back to its words.
#[derive(Debug, Default)]
pub struct WordTokenizer {
    interner: ThreadedRodeo,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.split_whitespace()
            .map(|word| self.interner.get_or_intern(word).into_usize() as u32)
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let mut words = Vec::with_capacity(tokens.len());
        for &id in tokens {
            let spur = Spur::try_from_usize(id as usize)
                .ok_or_else(|| Error::InvalidArgument(format!("invalid token id {id}")))?;
            let word = self
                .interner
                .try_resolve(&spur)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown token id {id}")))?;
            words.push(word);
        }
        Ok(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_counts_words() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("one two three");
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn encode_decode_round_trip() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("alpha beta gamma delta");
        let text = tokenizer.decode(&tokens).unwrap();
        assert_eq!(text, "alpha beta gamma delta");
    }

    #[test]
    fn decode_window_of_encoded_sequence() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("a b c d e f");
        let window = tokenizer.decode(&tokens[2..5]).unwrap();
        assert_eq!(window, "c d e");
    }

    #[test]
    fn repeated_words_get_same_id() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("rust rust rust");
        assert_eq!(tokens[0], tokens[1]);
        assert_eq!(tokens[1], tokens[2]);
    }

    #[test]
    fn empty_text_encodes_to_nothing() {
        let tokenizer = WordTokenizer::new();
        assert!(tokenizer.encode("").is_empty());
        assert!(tokenizer.encode("   \t\n").is_empty());
    }

    #[test]
    fn count_matches_encode_length() {
        let tokenizer = WordTokenizer::new();
        assert_eq!(tokenizer.count("one two three four"), 4);
        assert_eq!(tokenizer.count(""), 0);
    }

    #[test]
    fn decode_unknown_id_is_an_error() {
        let tokenizer = WordTokenizer::new();
        tokenizer.encode("just one token here");
        let result = tokenizer.decode(&[9999]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn unicode_words_round_trip() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("Привет 世界 hello");
        let text = tokenizer.decode(&tokens).unwrap();
        assert_eq!(text, "Привет 世界 hello");
    }

    #[test]
    fn whitespace_is_normalized_by_round_trip() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("  spaced \t out\ntext ");
        let text = tokenizer.decode(&tokens).unwrap();
        assert_eq!(text, "spaced out text");
    }
}
