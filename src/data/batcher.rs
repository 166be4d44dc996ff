// ============================================================
// Layer 4 — Causal LM Batcher
// ============================================================
// Implements Burn's Batcher trait: stacks a Vec<TokenizedExample>
// into [batch, seq] tensors.
//
// Examples have different lengths, so each batch is right-padded
// to its own longest example:
//
//   input_ids       pad_id
//   attention_mask  0
//   labels          -100   (ignored by the loss)
//
// Right padding keeps every real token ahead of the padding, so
// the causal mask alone already stops real tokens attending pads.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::{TokenizedExample, IGNORE_INDEX};

#[derive(Debug, Clone)]
pub struct CausalLmBatch<B: Backend> {
    /// [batch, seq]
    pub input_ids:      Tensor<B, 2, Int>,
    /// [batch, seq] — 1 real token, 0 padding
    pub attention_mask: Tensor<B, 2, Int>,
    /// [batch, seq] — target ids, IGNORE_INDEX where no loss applies
    pub labels:         Tensor<B, 2, Int>,
}

#[derive(Clone, Debug)]
pub struct CausalLmBatcher {
    pad_id: u32,
}

impl CausalLmBatcher {
    pub fn new(pad_id: u32) -> Self {
        Self { pad_id }
    }
}

impl<B: Backend> Batcher<B, TokenizedExample, CausalLmBatch<B>> for CausalLmBatcher {
    fn batch(&self, items: Vec<TokenizedExample>, device: &B::Device) -> CausalLmBatch<B> {
        let batch_size = items.len();
        let seq_len    = items.iter().map(TokenizedExample::len).max().unwrap_or(1).max(1);

        let mut ids    = Vec::with_capacity(batch_size * seq_len);
        let mut mask   = Vec::with_capacity(batch_size * seq_len);
        let mut labels = Vec::with_capacity(batch_size * seq_len);

        for item in &items {
            let pad = seq_len - item.len();

            ids.extend(item.input_ids.iter().map(|&x| x as i64));
            ids.extend(std::iter::repeat(self.pad_id as i64).take(pad));

            mask.extend(item.attention_mask.iter().map(|&x| x as i64));
            mask.extend(std::iter::repeat(0i64).take(pad));

            labels.extend_from_slice(&item.labels);
            labels.extend(std::iter::repeat(IGNORE_INDEX).take(pad));
        }

        let shape = [batch_size, seq_len];
        CausalLmBatch {
            input_ids:      Tensor::from_data(TensorData::new(ids, shape), device),
            attention_mask: Tensor::from_data(TensorData::new(mask, shape), device),
            labels:         Tensor::from_data(TensorData::new(labels, shape), device),
        }
    }
}
