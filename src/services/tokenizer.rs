//! 分词计数
//!
//! Budgets and size limits are measured in model tokens, never characters.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use crate::error::{AppError, Result};

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Longest prefix of `text` that is at most `max_tokens` tokens.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

static O200K: OnceCell<Arc<CoreBPE>> = OnceCell::new();

/// `o200k_base` encoding (gpt-4o family)
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self> {
        let bpe = O200K
            .get_or_try_init(|| tiktoken_rs::o200k_base().map(Arc::new))
            .map_err(|e| AppError::Internal(format!("failed to load tokenizer: {}", e)))?;
        Ok(Self { bpe: bpe.clone() })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        // a cut may split a multi-byte character; back off until it decodes
        let mut end = max_tokens;
        while end > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..end].to_vec()) {
                if self.count_tokens(&prefix) <= max_tokens {
                    return prefix;
                }
            }
            end -= 1;
        }
        String::new()
    }
}

pub fn create_token_counter() -> Result<Arc<dyn TokenCounter>> {
    Ok(Arc::new(TiktokenCounter::new()?))
}
