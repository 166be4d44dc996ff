use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// Label value the loss skips (prompt tokens and padding).
pub const IGNORE_INDEX: i64 = -100;

/// One tokenised training example, not yet padded.
/// Sequence: <bos> instruction response <eos>, truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// Same length as input_ids; IGNORE_INDEX on instruction positions
    pub labels:         Vec<i64>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Number of positions that contribute to the loss
    pub fn target_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }
}

pub struct InstructionDataset {
    examples: Vec<TokenizedExample>,
}

impl InstructionDataset {
    pub fn new(examples: Vec<TokenizedExample>) -> Self { Self { examples } }

    pub fn example_count(&self) -> usize { self.examples.len() }

    pub fn total_tokens(&self) -> usize {
        self.examples.iter().map(TokenizedExample::len).sum()
    }

    /// Positions across all examples that the loss is computed on
    pub fn total_targets(&self) -> usize {
        self.examples.iter().map(TokenizedExample::target_count).sum()
    }
}

impl Dataset<TokenizedExample> for InstructionDataset {
    fn get(&self, index: usize) -> Option<TokenizedExample> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}
