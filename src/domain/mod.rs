// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer:
//
//   record.rs — one instruction/response pair from the dataset
//   config.rs — the immutable run configuration (adapter +
//               training hyperparameters, paths, device)
//   error.rs  — the error kinds a run can fail with
//   traits.rs — seams for record and model sources
//
// Nothing in here touches burn, tokenizers or the network.

/// One instruction/response training example
pub mod record;

/// Adapter, training and run configuration
pub mod config;

/// Typed failure kinds
pub mod error;

/// Core abstractions other layers implement
pub mod traits;
