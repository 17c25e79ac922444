// Location: src/model/tokenizer.rs

use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;

use super::TextCodec;
use crate::error::{BrelloError, Result};

/// End-of-sequence spellings used by the model families we load.
const EOS_CANDIDATES: &[&str] = &["</s>", "<|eot_id|>", "<|end_of_text|>", "<|endoftext|>", "<|im_end|>"];

pub struct BrelloTokenizer {
    tokenizer: HfTokenizer,
    eos_token_ids: Vec<u32>,
    pad_token_id: Option<u32>,
}

impl BrelloTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = HfTokenizer::from_file(path).map_err(|e| {
            BrelloError::load(path.display().to_string(), format!("Failed to load tokenizer: {}", e))
        })?;
        Ok(Self::new(tokenizer))
    }

    pub fn new(tokenizer: HfTokenizer) -> Self {
        let eos_token_ids: Vec<u32> = EOS_CANDIDATES
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .collect();

        // Fall back to EOS for padding when the vocabulary has no pad token.
        let pad_token_id = tokenizer
            .token_to_id("<pad>")
            .or_else(|| eos_token_ids.first().copied());

        Self {
            tokenizer,
            eos_token_ids,
            pad_token_id,
        }
    }

    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.tokenizer
            .save(path, false)
            .map_err(|e| BrelloError::Training(format!("Failed to save tokenizer: {}", e)))
    }
}

impl TextCodec for BrelloTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| BrelloError::Generation(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| BrelloError::Generation(format!("Decoding failed: {}", e)))
    }

    fn eos_token_ids(&self) -> Vec<u32> {
        self.eos_token_ids.clone()
    }
}
