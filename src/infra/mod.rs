// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the network or the file system:
//
//   hub.rs             — model files from the Hugging Face hub
//                        or a local directory
//   weights.rs         — config.json parsing and memory-mapped
//                        safetensors → LlamaModel
//   tokenizer_store.rs — tokenizer.json plus eos / pad ids
//   adapter_store.rs   — PEFT-format adapter save / load
//   checkpoint.rs      — checkpoint-{step} directories and the
//                        resolved run config
//   metrics.rs         — metrics.csv training curve

/// Hub and local model sources
pub mod hub;

/// Checkpoint weights and model config
pub mod weights;

/// Tokenizer loading
pub mod tokenizer_store;

/// PEFT adapter persistence
pub mod adapter_store;

/// Periodic training checkpoints
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
