// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From the .jsonl file to tensor batches:
//
//   dataset.jsonl
//       │
//       ▼
//   JsonlLoader           → InstructionRecord per line
//       │
//       ▼
//   InstructionTokenizer  → TokenizedExample per record
//       │
//       ▼
//   InstructionDataset    → Burn's Dataset trait
//       │
//       ▼
//   CausalLmBatcher       → padded [batch, seq] tensors
//       │
//       ▼
//   DataLoader            → feeds the training loop

/// Reads instruction/response records from a JSON-lines file
pub mod loader;

/// Tokenises records into input ids + aligned labels
pub mod tokenize;

/// Implements Burn's Dataset trait for tokenised examples
pub mod dataset;

/// Implements Burn's Batcher trait with per-batch padding
pub mod batcher;
