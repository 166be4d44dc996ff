// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the fine-tuning pipeline in order:
//
//   Step 1: Fetch model files        (Layer 6 - infra/hub)
//   Step 2: Build the base model     (Layer 6 - infra/weights)
//   Step 3: Load the tokenizer       (Layer 6 - infra)
//   Step 4: Attach LoRA adapters     (Layer 5 - ml/lora)
//   Step 5: Load + tokenise records  (Layer 4 - data)
//   Step 6: Save run config          (Layer 6 - infra)
//   Step 7: Run training loop        (Layer 5 - ml)
//   Step 8: Save the adapter         (Layer 6 - infra)
//
// The backend is picked once from the config:
//
//   gpu          → Autodiff<Wgpu>      (f32)
//   cpu          → Autodiff<NdArray>   (f32)
//
// Parameters and optimizer state stay in f32. A half-precision
// backend would keep AdamW's moments in f16 too, where ε = 1e-8
// is zero and the first zero gradient of lora_A turns into NaN.
// `fp16` therefore only produces a warning.

use anyhow::{bail, Context, Result};
use rand::Rng;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use std::path::PathBuf;

use crate::data::{dataset::InstructionDataset, loader::JsonlLoader, tokenize::InstructionTokenizer};
use crate::domain::{
    config::{Device, RunConfig, TrainingConfig},
    traits::{ModelFiles, ModelSource, RecordSource},
};
use crate::infra::{
    adapter_store, checkpoint::CheckpointManager, hub, metrics::MetricsLogger, tokenizer_store, weights,
};
use crate::ml::{lora, trainer::Trainer};

type Gpu = Autodiff<Wgpu>;
type Cpu = Autodiff<NdArray>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    WgpuF32,
    NdArrayF32,
}

/// Map the configured device and precision onto a backend.
pub fn backend_for(device: Device, fp16: bool) -> BackendChoice {
    if fp16 {
        tracing::warn!("fp16 requested, but burn has no mixed precision with f32 master weights; training in f32");
    }
    match device {
        Device::Gpu => BackendChoice::WgpuF32,
        Device::Cpu => BackendChoice::NdArrayF32,
    }
}

/// What a finished run reports back to the CLI
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub examples:         usize,
    pub global_steps:     usize,
    pub train_loss:       f64,
    pub trainable_params: usize,
    pub total_params:     usize,
    pub seed:             u64,
    pub adapter_dir:      PathBuf,
}

pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg = &self.config;

        // ── Step 1: Fetch model files ─────────────────────────────────────────
        let source = hub::source_for(&cfg.model_name, &cfg.revision)?;
        let files  = source
            .fetch(&cfg.model_name)
            .with_context(|| format!("Cannot obtain model '{}'", cfg.model_name))?;

        match backend_for(cfg.device, cfg.training.fp16) {
            BackendChoice::WgpuF32 => {
                tracing::info!("Backend: wgpu, f32");
                run_pipeline::<Gpu>(cfg, &files, &WgpuDevice::default())
            }
            BackendChoice::NdArrayF32 => {
                tracing::info!("Backend: ndarray, f32");
                run_pipeline::<Cpu>(cfg, &files, &NdArrayDevice::Cpu)
            }
        }
    }
}

/// Use the configured seed, or draw one and log it so the run can
/// be repeated. Drawn seeds stay within what run_config.toml can hold.
pub fn resolve_seed(configured: Option<u64>) -> u64 {
    match configured {
        Some(seed) => seed,
        None => {
            let seed = rand::thread_rng().gen_range(0..=TrainingConfig::MAX_SEED);
            tracing::info!("No seed configured; using {seed}");
            seed
        }
    }
}

/// Steps 2-8 on one concrete backend.
pub fn run_pipeline<B: AutodiffBackend>(
    cfg:    &RunConfig,
    files:  &ModelFiles,
    device: &B::Device,
) -> Result<TrainSummary> {
    let seed = resolve_seed(cfg.training.seed);

    // ── Step 2: Base model ────────────────────────────────────────────────────
    let (llama, base) = weights::load_base_model::<B>(files, device)
        .with_context(|| format!("Cannot build model from '{}'", files.config.display()))?;

    // ── Step 3: Tokenizer ─────────────────────────────────────────────────────
    let tok = tokenizer_store::load(&files.tokenizer, &llama)?;

    // ── Step 4: LoRA ──────────────────────────────────────────────────────────
    let (model, report) = lora::inject(base, &cfg.lora, seed, device)?;

    // ── Step 5: Dataset ───────────────────────────────────────────────────────
    let loader  = JsonlLoader::new(&cfg.dataset_path);
    let records = loader
        .load_all()
        .with_context(|| format!("Cannot load dataset '{}'", cfg.dataset_path.display()))?;
    if records.is_empty() {
        bail!("dataset '{}' contains no records", cfg.dataset_path.display());
    }

    let max_len = cfg.training.max_seq_len.min(llama.max_position_embeddings);
    if max_len < cfg.training.max_seq_len {
        tracing::warn!("max_seq_len {} exceeds the model's context; using {max_len}", cfg.training.max_seq_len);
    }
    let examples = InstructionTokenizer::new(&tok.tokenizer, tok.eos_id, max_len)
        .tokenize_all(&records, cfg.tokenize_batch_size)?;
    let dataset = InstructionDataset::new(examples);
    tracing::info!(
        "Tokenised {} records into {} tokens ({} response targets)",
        dataset.example_count(),
        dataset.total_tokens(),
        dataset.total_targets(),
    );
    if dataset.total_targets() == 0 {
        bail!("every response was truncated away; raise max_seq_len above {max_len}");
    }

    // ── Step 6: Output directory + run config ─────────────────────────────────
    let output_dir  = &cfg.training.output_dir;
    let checkpoints = CheckpointManager::new(output_dir, cfg.lora.clone(), cfg.model_name.clone())?;
    let mut resolved = cfg.clone();
    resolved.training.seed = Some(seed);
    checkpoints.save_run_config(&resolved)?;
    let metrics = MetricsLogger::new(output_dir)?;

    // ── Step 7: Train ─────────────────────────────────────────────────────────
    let examples = dataset.example_count();
    let outcome  = Trainer::new(&cfg.training, seed, tok.pad_id, &checkpoints, &metrics)
        .fit(model, dataset)?;

    // ── Step 8: Save adapter ──────────────────────────────────────────────────
    adapter_store::save(&cfg.adapter_dir, &outcome.model, &cfg.lora, &cfg.model_name)
        .with_context(|| format!("Cannot save adapter to '{}'", cfg.adapter_dir.display()))?;

    Ok(TrainSummary {
        examples,
        global_steps:     outcome.global_steps,
        train_loss:       outcome.train_loss,
        trainable_params: report.trainable,
        total_params:     report.total,
        seed,
        adapter_dir:      cfg.adapter_dir.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::AdapterConfig;
    use crate::ml::model::LlamaModel;
    use crate::test_support::{self, TestAutodiffBackend};
    use std::{fs, path::Path};

    fn write_dataset(path: &Path, n: usize) {
        let lines: Vec<_> = test_support::records(n)
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();
        fs::write(path, lines.join("\n")).unwrap();
    }

    fn run_config(root: &Path, n_records: usize) -> (RunConfig, ModelFiles) {
        let model_dir = root.join("model");
        fs::create_dir_all(&model_dir).unwrap();
        test_support::write_model_dir(&model_dir);
        write_dataset(&root.join("dataset.jsonl"), n_records);

        let mut cfg = RunConfig::default();
        cfg.model_name   = model_dir.display().to_string();
        cfg.dataset_path = root.join("dataset.jsonl");
        cfg.adapter_dir  = root.join("adapter_model");
        cfg.device       = Device::Cpu;
        cfg.lora         = AdapterConfig { r: 2, lora_dropout: 0.0, ..AdapterConfig::default() };
        cfg.training.output_dir       = root.join("results");
        cfg.training.num_train_epochs = 1;
        cfg.training.logging_steps    = 1;
        cfg.training.save_steps       = 2;
        cfg.training.fp16             = false;

        let files = hub::LocalSource.fetch(&cfg.model_name).unwrap();
        (cfg, files)
    }

    #[test]
    fn test_pipeline_end_to_end_on_local_model() {
        let root = tempfile::tempdir().unwrap();
        let (cfg, files) = run_config(root.path(), 4);

        let summary = run_pipeline::<TestAutodiffBackend>(&cfg, &files, &Default::default()).unwrap();

        assert_eq!(summary.examples, 4);
        assert_eq!(summary.global_steps, 2);
        assert!(summary.trainable_params < summary.total_params);
        assert!(cfg.adapter_dir.join(adapter_store::CONFIG_FILE).is_file());
        assert!(cfg.adapter_dir.join(adapter_store::WEIGHTS_FILE).is_file());
        assert!(cfg.training.output_dir.join("checkpoint-2").is_dir());

        // the drawn seed is recorded for reproduction
        let saved = crate::application::run_config::load_file(&cfg.training.output_dir.join("run_config.toml")).unwrap();
        assert_eq!(saved.training.seed, Some(summary.seed));

        // the saved adapter attaches to a freshly loaded base model
        let (_, base) = weights::load_base_model::<TestAutodiffBackend>(&files, &Default::default()).unwrap();
        let (loaded, _): (LlamaModel<TestAutodiffBackend>, _) =
            adapter_store::load(&cfg.adapter_dir, base, &Default::default()).unwrap();
        assert_eq!(loaded.projections().filter(|(_, _, p)| p.lora.is_some()).count(), 4);
    }

    #[test]
    fn test_unknown_target_fails_before_training() {
        let root = tempfile::tempdir().unwrap();
        let (mut cfg, files) = run_config(root.path(), 2);
        cfg.lora.target_modules = vec!["attn_proj".into()];

        let err = run_pipeline::<TestAutodiffBackend>(&cfg, &files, &Default::default()).unwrap_err();
        assert!(err.to_string().contains("attn_proj"), "{err:#}");
        assert!(!cfg.training.output_dir.exists());
    }

    #[test]
    fn test_bad_dataset_line_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let (cfg, files) = run_config(root.path(), 2);
        fs::write(&cfg.dataset_path, "{\"instruction\": \"say hello\"}\n").unwrap();

        let err = run_pipeline::<TestAutodiffBackend>(&cfg, &files, &Default::default()).unwrap_err();
        assert!(format!("{err:#}").contains(":1"), "{err:#}");
    }

    #[test]
    fn test_responses_truncated_away_fail_early() {
        let root = tempfile::tempdir().unwrap();
        let (mut cfg, files) = run_config(root.path(), 2);
        cfg.training.max_seq_len = 2;

        let err = run_pipeline::<TestAutodiffBackend>(&cfg, &files, &Default::default()).unwrap_err();
        assert!(err.to_string().contains("max_seq_len"), "{err:#}");
        assert!(!cfg.training.output_dir.exists());
    }

    #[test]
    fn test_explicit_seed_is_kept() {
        assert_eq!(resolve_seed(Some(42)), 42);
    }

    #[test]
    fn test_drawn_seeds_fit_in_run_config() {
        for _ in 0..64 {
            let seed = resolve_seed(None);
            assert!(seed <= TrainingConfig::MAX_SEED);

            let mut cfg = RunConfig::default();
            cfg.training.seed = Some(seed);
            cfg.to_toml_string().unwrap();
        }
    }

    #[test]
    fn test_fp16_request_still_trains_in_f32() {
        assert_eq!(backend_for(Device::Gpu, true), BackendChoice::WgpuF32);
        assert_eq!(backend_for(Device::Gpu, false), BackendChoice::WgpuF32);
        assert_eq!(backend_for(Device::Cpu, true), BackendChoice::NdArrayF32);
    }
}
