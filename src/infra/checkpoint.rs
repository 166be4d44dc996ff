// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Periodic snapshots during training, written every
// `save_steps` optimizer steps:
//
//   {output_dir}/
//     run_config.toml               ← resolved configuration
//     metrics.csv                   ← see metrics.rs
//     checkpoint-500/
//       adapter_config.json         ← same files as the final
//       adapter_model.safetensors     adapter (adapter_store.rs)
//       optimizer.mpk               ← AdamW moments (CompactRecorder)
//       trainer_state.json          ← step, epoch, log history
//     checkpoint-1000/
//     ...
//
// Only adapter weights are stored: the frozen base model is
// re-downloaded (or read from the hub cache) when needed.

use anyhow::{Context, Result};
use burn::{
    optim::Optimizer,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::config::{AdapterConfig, RunConfig};
use crate::infra::{adapter_store, metrics::StepMetrics};
use crate::ml::model::LlamaModel;

pub const STATE_FILE:      &str = "trainer_state.json";
pub const OPTIMIZER_FILE:  &str = "optimizer";
pub const RUN_CONFIG_FILE: &str = "run_config.toml";

/// Progress counters saved next to every checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step:      usize,
    pub epoch:            f64,
    pub max_steps:        usize,
    pub num_train_epochs: usize,
    pub train_batch_size: usize,
    pub seed:             u64,
    pub log_history:      Vec<StepMetrics>,
}

pub struct CheckpointManager {
    dir:        PathBuf,
    adapter:    AdapterConfig,
    base_model: String,
}

impl CheckpointManager {
    /// Creates `dir` if it doesn't already exist.
    pub fn new(dir: &Path, adapter: AdapterConfig, base_model: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir: dir.to_path_buf(), adapter, base_model: base_model.into() })
    }

    pub fn checkpoint_dir(&self, step: usize) -> PathBuf {
        self.dir.join(format!("checkpoint-{step}"))
    }

    pub fn save<B, O>(&self, model: &LlamaModel<B>, optim: &O, state: &TrainerState) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        O: Optimizer<LlamaModel<B>, B>,
    {
        let dir = self.checkpoint_dir(state.global_step);

        adapter_store::save(&dir, model, &self.adapter, &self.base_model)
            .with_context(|| format!("Failed to save adapter to '{}'", dir.display()))?;

        let optim_path = dir.join(OPTIMIZER_FILE);
        CompactRecorder::new()
            .record(optim.to_record(), optim_path.clone())
            .with_context(|| format!("Failed to save optimizer state to '{}'", optim_path.display()))?;

        let json = serde_json::to_string_pretty(state)?;
        adapter_store::write_atomic(&dir.join(STATE_FILE), json.as_bytes())?;

        tracing::info!("Checkpoint saved: '{}'", dir.display());
        Ok(dir)
    }

    /// Written before training starts so every output directory
    /// records exactly how it was produced.
    pub fn save_run_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join(RUN_CONFIG_FILE);
        adapter_store::write_atomic(&path, cfg.to_toml_string()?.as_bytes())
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }
}
