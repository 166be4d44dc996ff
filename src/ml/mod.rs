// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds or runs tensors lives here:
//
//   model.rs   — the Llama decoder as burn modules
//                • RMSNorm, rotary embeddings (llama3 scaling)
//                • grouped-query attention with causal mask
//                • SwiGLU MLP
//                • masked next-token cross entropy
//                • WeightSource seam: random init or checkpoint
//
//   lora.rs    — low-rank adapters on the attention and MLP
//                projections; freezing, injection, merging
//
//   trainer.rs — the optimisation loop: DataLoader, AdamW,
//                logging and checkpoint cadence

/// Llama decoder architecture
pub mod model;

/// LoRA adapter modules and injection
pub mod lora;

/// Training loop with periodic logging and checkpoints
pub mod trainer;
