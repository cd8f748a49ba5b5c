//! Target coders: mapping hypothesis label sequences back to text.

use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::Tokenizer;

pub trait TargetCoder {
    fn decode(&self, labels: &[u32]) -> Result<String>;
}

/// Fixed symbol-table coder for phone or character targets. Decoded symbols
/// are space separated.
pub struct AlphabetCoder {
    symbols: Vec<String>,
}

impl AlphabetCoder {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    /// Blank at index 0 followed by the lowercase letters.
    pub fn ascii_lowercase() -> Self {
        let mut symbols = vec!["<blank>".to_string()];
        symbols.extend((b'a'..=b'z').map(|c| (c as char).to_string()));
        Self { symbols }
    }
}

impl TargetCoder for AlphabetCoder {
    fn decode(&self, labels: &[u32]) -> Result<String> {
        let symbols = labels
            .iter()
            .map(|&id| {
                self.symbols
                    .get(id as usize)
                    .map(String::as_str)
                    .ok_or_else(|| {
                        anyhow!(
                            "label {} outside the target alphabet ({} symbols)",
                            id,
                            self.symbols.len()
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(symbols.join(" "))
    }
}

/// Coder backed by a `tokenizer.json` file.
pub struct TokenizerCoder {
    tokenizer: Tokenizer,
}

impl TokenizerCoder {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow!("failed to load tokenizer {:?}: {}", path.as_ref(), e))?;
        Ok(Self { tokenizer })
    }
}

impl TargetCoder for TokenizerCoder {
    fn decode(&self, labels: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(labels, true)
            .map_err(|e| anyhow!("failed to decode hypothesis: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_coder_decodes_in_order() {
        let coder = AlphabetCoder::ascii_lowercase();
        assert_eq!(coder.decode(&[3, 1, 2]).unwrap(), "c a b");
    }

    #[test]
    fn alphabet_coder_rejects_out_of_range_labels() {
        let coder = AlphabetCoder::new(vec!["x".to_string()]);
        assert!(coder.decode(&[4]).is_err());
    }
}
