// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Supervised fine-tuning of the adapter parameters with Burn's
// DataLoader and AdamW.
//
//   for epoch in 1..=num_train_epochs
//     for batch in loader (shuffled, right-padded)
//       loss  = masked next-token cross entropy
//       grads = loss.backward()        ← only adapters (and any
//       model = optim.step(lr, ...)      unfrozen biases) receive grads
//       lr    = scheduler.step()
//       every logging_steps → tracing + metrics.csv
//       every save_steps    → checkpoint-{step}/
//
// One optimizer step per mini-batch, so an epoch is
// ceil(examples / batch_size) steps. The learning rate decays
// linearly from learning_rate to 0 over all steps, no warmup.
// Each gradient tensor is clipped to max_grad_norm on its own
// (burn's GradientClippingConfig::Norm), not by the global norm.

use anyhow::{anyhow, bail, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    grad_clipping::GradientClippingConfig,
    lr_scheduler::{linear::LinearLrSchedulerConfig, LrScheduler},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::PathBuf;

use crate::data::{batcher::CausalLmBatcher, dataset::InstructionDataset};
use crate::domain::config::TrainingConfig;
use crate::infra::{
    checkpoint::{CheckpointManager, TrainerState},
    metrics::{MetricsLogger, StepMetrics},
};
use crate::ml::model::LlamaModel;

pub struct TrainOutcome<B: AutodiffBackend> {
    pub model:           LlamaModel<B>,
    pub global_steps:    usize,
    pub steps_per_epoch: usize,
    /// Mean loss over every step of the run
    pub train_loss:      f64,
    pub log_history:     Vec<StepMetrics>,
    pub checkpoints:     Vec<PathBuf>,
}

pub struct Trainer<'a> {
    cfg:         &'a TrainingConfig,
    seed:        u64,
    pad_id:      u32,
    checkpoints: &'a CheckpointManager,
    metrics:     &'a MetricsLogger,
}

impl<'a> Trainer<'a> {
    pub fn new(
        cfg:         &'a TrainingConfig,
        seed:        u64,
        pad_id:      u32,
        checkpoints: &'a CheckpointManager,
        metrics:     &'a MetricsLogger,
    ) -> Self {
        Self { cfg, seed, pad_id, checkpoints, metrics }
    }

    pub fn fit<B: AutodiffBackend>(
        &self,
        mut model: LlamaModel<B>,
        dataset:   InstructionDataset,
    ) -> Result<TrainOutcome<B>> {
        let cfg = self.cfg;
        let n   = dataset.len();
        if n == 0 {
            bail!("training dataset is empty");
        }
        let batch_size      = cfg.per_device_train_batch_size;
        let steps_per_epoch = n.div_ceil(batch_size);
        let max_steps       = steps_per_epoch * cfg.num_train_epochs;

        let mut optim = optimizer_config(cfg).init::<B, LlamaModel<B>>();

        // Step k (0-based) trains at learning_rate * (1 - k / max_steps).
        let mut scheduler = LinearLrSchedulerConfig::new(cfg.learning_rate, 0.0, max_steps)
            .init()
            .map_err(|e| anyhow!("invalid learning-rate schedule: {e}"))?;
        let mut lr        = cfg.learning_rate;

        // ── Data loader ───────────────────────────────────────────────────────
        let loader = DataLoaderBuilder::new(CausalLmBatcher::new(self.pad_id))
            .batch_size(batch_size)
            .shuffle(self.seed)
            .num_workers(1)
            .build(dataset);

        tracing::info!(
            "Training: {n} examples, {} epoch(s), batch {batch_size} → {steps_per_epoch} steps/epoch, {max_steps} total",
            cfg.num_train_epochs,
        );

        let mut global_step  = 0usize;
        let mut window_loss  = 0.0f64;
        let mut window_steps = 0usize;
        let mut total_loss   = 0.0f64;
        let mut log_history  = Vec::new();
        let mut checkpoints  = Vec::new();

        // ── Epoch loop ────────────────────────────────────────────────────────
        for epoch in 1..=cfg.num_train_epochs {
            for batch in loader.iter() {
                let loss = model.forward_loss(batch);

                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                window_loss  += loss_val;
                window_steps += 1;
                total_loss   += loss_val;

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(lr, model, grads);
                global_step += 1;
                let step_lr = lr;
                lr = scheduler.step();

                let progress = global_step as f64 / steps_per_epoch as f64;

                if global_step % cfg.logging_steps == 0 {
                    let m = StepMetrics::new(global_step, progress, window_loss / window_steps as f64, step_lr);
                    tracing::info!(
                        "step {:>6}/{max_steps} | epoch {:.2} | loss {:.4} | lr {:.2e}",
                        m.step, m.epoch, m.loss, m.learning_rate,
                    );
                    self.metrics.log(&m)?;
                    log_history.push(m);
                    window_loss  = 0.0;
                    window_steps = 0;
                }

                if global_step % cfg.save_steps == 0 {
                    let state = TrainerState {
                        global_step,
                        epoch:            progress,
                        max_steps,
                        num_train_epochs: cfg.num_train_epochs,
                        train_batch_size: batch_size,
                        seed:             self.seed,
                        log_history:      log_history.clone(),
                    };
                    checkpoints.push(self.checkpoints.save(&model, &optim, &state)?);
                }
            }
            tracing::debug!("Epoch {epoch}/{} finished at step {global_step}", cfg.num_train_epochs);
        }

        let train_loss = if global_step > 0 { total_loss / global_step as f64 } else { f64::NAN };
        tracing::info!("Training complete: {global_step} steps, mean loss {train_loss:.4}");

        Ok(TrainOutcome {
            model,
            global_steps: global_step,
            steps_per_epoch,
            train_loss,
            log_history,
            checkpoints,
        })
    }
}

// ── AdamW ─────────────────────────────────────────────────────────────────────
// m = β1*m + (1-β1)*g
// v = β2*v + (1-β2)*g²
// θ = θ - lr * (m / (√v + ε) + λθ)
fn optimizer_config(cfg: &TrainingConfig) -> AdamWConfig {
    AdamWConfig::new()
        .with_epsilon(1e-8)
        .with_weight_decay(cfg.weight_decay)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(cfg.max_grad_norm)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{TokenizedExample, IGNORE_INDEX};
    use crate::domain::config::AdapterConfig;
    use crate::ml::lora;
    use crate::test_support::{self, TestAutodiffBackend};

    fn example(len: usize) -> TokenizedExample {
        let input_ids: Vec<u32> = (0..len as u32).map(|i| 4 + i % 20).collect();
        let mut labels: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        labels[0] = IGNORE_INDEX;
        TokenizedExample { attention_mask: vec![1; len], input_ids, labels }
    }

    fn dataset(n: usize) -> InstructionDataset {
        InstructionDataset::new((0..n).map(|i| example(3 + i % 3)).collect())
    }

    fn lora_config() -> AdapterConfig {
        AdapterConfig { r: 2, lora_dropout: 0.0, ..AdapterConfig::default() }
    }

    fn adapted_model() -> LlamaModel<TestAutodiffBackend> {
        let device = Default::default();
        let base   = test_support::tiny_config().init(&device);
        lora::inject(base, &lora_config(), 5, &device).unwrap().0
    }

    fn run(n: usize, batch: usize, epochs: usize, save_steps: usize) -> (TrainOutcome<TestAutodiffBackend>, tempfile::TempDir) {
        run_model(adapted_model(), n, batch, epochs, save_steps)
    }

    fn run_model(
        model:      LlamaModel<TestAutodiffBackend>,
        n:          usize,
        batch:      usize,
        epochs:     usize,
        save_steps: usize,
    ) -> (TrainOutcome<TestAutodiffBackend>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainingConfig {
            output_dir:                  dir.path().to_path_buf(),
            per_device_train_batch_size: batch,
            num_train_epochs:            epochs,
            logging_steps:               1,
            save_steps,
            fp16:                        false,
            ..TrainingConfig::default()
        };
        let ckpt    = CheckpointManager::new(dir.path(), lora_config(), "tiny").unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();

        let outcome = Trainer::new(&cfg, 3, test_support::PAD_ID, &ckpt, &metrics)
            .fit(model, dataset(n))
            .unwrap();
        (outcome, dir)
    }

    #[test]
    fn test_four_records_batch_two_is_two_steps() {
        let (outcome, _dir) = run(4, 2, 1, 100);
        assert_eq!(outcome.steps_per_epoch, 2);
        assert_eq!(outcome.global_steps, 2);
        assert_eq!(outcome.log_history.len(), 2);
        assert!(outcome.train_loss.is_finite());
    }

    #[test]
    fn test_partial_last_batch_still_steps() {
        let (outcome, _dir) = run(4, 3, 1, 100);
        assert_eq!(outcome.global_steps, 2);
    }

    #[test]
    fn test_checkpoint_every_save_steps() {
        let (outcome, dir) = run(4, 1, 2, 3);
        // 8 steps → checkpoints at 3 and 6
        assert_eq!(outcome.global_steps, 8);
        assert_eq!(outcome.checkpoints, vec![dir.path().join("checkpoint-3"), dir.path().join("checkpoint-6")]);

        assert!(dir.path().join("checkpoint-3").join("optimizer.mpk").is_file());

        let csv = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1 + 8);
    }

    #[test]
    fn test_learning_rate_decays_linearly() {
        let (outcome, _dir) = run(4, 1, 1, 100);
        let rates: Vec<f64> = outcome.log_history.iter().map(|m| m.learning_rate).collect();
        let lr0 = TrainingConfig::default().learning_rate;

        assert_eq!(rates.len(), 4);
        assert!((rates[0] - lr0).abs() < 1e-12);
        assert!((rates[3] - lr0 * 0.25).abs() < 1e-12);
        assert!(rates.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_clipping_is_per_tensor_norm() {
        let cfg   = TrainingConfig { max_grad_norm: 0.5, ..TrainingConfig::default() };
        let adamw = serde_json::to_value(optimizer_config(&cfg)).unwrap();
        assert_eq!(adamw["grad_clipping"]["Norm"].as_f64(), Some(0.5));
        assert!((adamw["epsilon"].as_f64().unwrap() - 1e-8).abs() < 1e-12);
    }

    #[test]
    fn test_default_config_keeps_adapters_finite() {
        // fp16 = true by default; training must still run in f32
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainingConfig { output_dir: dir.path().to_path_buf(), num_train_epochs: 1, ..TrainingConfig::default() };
        assert!(cfg.fp16);
        let ckpt    = CheckpointManager::new(dir.path(), lora_config(), "tiny").unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();

        let outcome = Trainer::new(&cfg, 3, test_support::PAD_ID, &ckpt, &metrics)
            .fit(adapted_model(), dataset(4))
            .unwrap();

        assert!(outcome.train_loss.is_finite());
        for layer in &outcome.model.layers {
            let a = layer.self_attn.q_proj.lora.as_ref().unwrap().lora_a.val();
            let nan: f32 = a.is_nan().int().sum().into_scalar().elem();
            assert_eq!(nan, 0.0);
        }
    }

    #[test]
    fn test_only_adapters_change() {
        let before = adapted_model();
        let (outcome, _dir) = run_model(before.clone(), 4, 2, 1, 100);

        let (old, new) = (&before.layers[0], &outcome.model.layers[0]);
        assert_eq!(
            old.mlp.up_proj.linear.weight.val().into_data(),
            new.mlp.up_proj.linear.weight.val().into_data(),
        );
        assert_eq!(
            old.self_attn.q_proj.linear.weight.val().into_data(),
            new.self_attn.q_proj.linear.weight.val().into_data(),
        );

        // B starts at zero; any update moves it
        let b = new.self_attn.q_proj.lora.as_ref().unwrap().lora_b.val();
        let moved: f32 = b.abs().sum().into_scalar().elem();
        assert!(moved > 0.0);
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let dir     = tempfile::tempdir().unwrap();
        let cfg     = TrainingConfig::default();
        let ckpt    = CheckpointManager::new(dir.path(), lora_config(), "tiny").unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();
        let result  = Trainer::new(&cfg, 0, 0, &ckpt, &metrics).fit(adapted_model(), InstructionDataset::new(vec![]));
        assert!(result.is_err());
    }
}
