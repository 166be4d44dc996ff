// ============================================================
// Layer 4 — Tokenization Transform
// ============================================================
// Turns InstructionRecords into TokenizedExamples.
//
// For a causal LM the prompt and the target share one sequence:
//
//   input_ids:  <s> instruction...  response...  </s>
//   labels:     -100 -100 ...       response...  </s>
//
// The instruction is encoded with the tokenizer's special tokens
// (Llama adds <|begin_of_text|>), the response without them, and
// EOS closes the example. Only response/EOS positions carry a
// label, so the loss is computed against the response text.
// The result is truncated to max_len from the right.
//
// Records are encoded in groups with Tokenizer::encode_batch,
// which spreads each group over the tokenizers thread pool.

use anyhow::Result;
use tokenizers::{Encoding, Tokenizer};

use crate::data::dataset::{TokenizedExample, IGNORE_INDEX};
use crate::domain::record::InstructionRecord;

pub struct InstructionTokenizer<'a> {
    tokenizer: &'a Tokenizer,
    eos_id:    u32,
    max_len:   usize,
}

impl<'a> InstructionTokenizer<'a> {
    pub fn new(tokenizer: &'a Tokenizer, eos_id: u32, max_len: usize) -> Self {
        Self { tokenizer, eos_id, max_len }
    }

    /// Tokenise every record, `group_size` records per encode call.
    /// Always returns exactly one example per record.
    pub fn tokenize_all(
        &self,
        records:    &[InstructionRecord],
        group_size: usize,
    ) -> Result<Vec<TokenizedExample>> {
        let mut examples = Vec::with_capacity(records.len());
        for group in records.chunks(group_size.max(1)) {
            examples.extend(self.tokenize_group(group)?);
        }

        let truncated = examples.iter().filter(|e| e.len() == self.max_len).count();
        if truncated > 0 {
            tracing::warn!("{truncated} examples reached max_seq_len={} and were truncated", self.max_len);
        }
        Ok(examples)
    }

    pub fn tokenize_group(&self, records: &[InstructionRecord]) -> Result<Vec<TokenizedExample>> {
        let prompts: Vec<&str> = records.iter().map(|r| r.instruction.as_str()).collect();
        let targets: Vec<&str> = records.iter().map(|r| r.response.as_str()).collect();

        let prompts = self.encode(prompts, true)?;
        let targets = self.encode(targets, false)?;

        Ok(prompts
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| self.assemble(p.get_ids(), t.get_ids()))
            .collect())
    }

    fn encode(&self, texts: Vec<&str>, add_special_tokens: bool) -> Result<Vec<Encoding>> {
        self.tokenizer
            .encode_batch(texts, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))
    }

    fn assemble(&self, prompt: &[u32], target: &[u32]) -> TokenizedExample {
        let mut input_ids = Vec::with_capacity(prompt.len() + target.len() + 1);
        input_ids.extend_from_slice(prompt);
        input_ids.extend_from_slice(target);
        input_ids.push(self.eos_id);

        let mut labels: Vec<i64> = std::iter::repeat(IGNORE_INDEX)
            .take(prompt.len())
            .chain(target.iter().map(|&id| id as i64))
            .chain(std::iter::once(self.eos_id as i64))
            .collect();

        input_ids.truncate(self.max_len);
        labels.truncate(self.max_len);
        let attention_mask = vec![1u32; input_ids.len()];

        TokenizedExample { input_ids, attention_mask, labels }
    }
}
