// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the base model's tokenizer.json and settles the two
// special ids the pipeline needs:
//
//   eos — appended after every response (from config.json)
//   pad — used by the batcher; Llama ships without a pad token,
//         so it falls back to eos like the usual HF recipe
//
// Padding and truncation baked into tokenizer.json are switched
// off: examples are truncated by the tokenization transform and
// padded per batch by the batcher.

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::ml::model::LlamaConfig;

pub struct LoadedTokenizer {
    pub tokenizer: Tokenizer,
    pub eos_id:    u32,
    pub pad_id:    u32,
}

pub fn load(path: &Path, config: &LlamaConfig) -> Result<LoadedTokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {e}", path.display()))?;

    tokenizer.with_padding(None);
    tokenizer
        .with_truncation(None)
        .map_err(|e| anyhow::anyhow!("Cannot disable truncation: {e}"))?;

    let eos_id = config.eos_token_id;
    let eos = tokenizer
        .id_to_token(eos_id)
        .with_context(|| format!("eos_token_id {eos_id} is not in the tokenizer vocabulary"))?;

    let pad_id = match config.pad_token_id {
        Some(id) => id,
        None => {
            tracing::info!("No pad token configured; padding with eos '{eos}' ({eos_id})");
            eos_id
        }
    };

    tracing::info!(
        "Tokenizer loaded: {} tokens, eos={eos_id}, pad={pad_id}",
        tokenizer.get_vocab_size(true)
    );
    Ok(LoadedTokenizer { tokenizer, eos_id, pad_id })
}
