// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one of two goals:
// fine-tune the base model and leave an adapter on disk, or fold
// a saved adapter into the base weights.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No argument parsing or printing here (that's Layer 1)
//   - Only workflow coordination and configuration assembly

/// Defaults + TOML file + CLI overrides → one RunConfig
pub mod run_config;

/// The fine-tuning workflow
pub mod train_use_case;

/// Adapter + base model → one merged checkpoint
pub mod merge_use_case;
