// ============================================================
// Layer 2 — MergeUseCase
// ============================================================
// Folds a saved adapter into its base model and writes a plain
// checkpoint that loads without any LoRA support:
//
//   Step 1: Read adapter_config.json      (Layer 6 - adapter_store)
//   Step 2: Fetch the base model files    (Layer 6 - infra/hub)
//   Step 3: Build base + attach adapter   (Layer 6)
//   Step 4: W' = W + A·B·(alpha / r)      (Layer 5 - ml/lora)
//   Step 5: Write the merged checkpoint   (Layer 6 - infra/weights)
//
//   {output_dir}/
//     config.json        ← copied from the base model
//     tokenizer.json     ← copied from the base model
//     model.safetensors  ← every weight, F32
//
// Merging is pure arithmetic on f32 weights, so it always runs
// on the ndarray backend.

use anyhow::{bail, Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, NdArray},
    prelude::*,
};
use std::path::{Path, PathBuf};

use crate::domain::traits::{ModelFiles, ModelSource};
use crate::infra::{adapter_store, hub, weights};

#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// None takes base_model_name_or_path from the adapter config
    pub model:       Option<String>,
    pub revision:    String,
    pub adapter_dir: PathBuf,
    pub output_dir:  PathBuf,
}

#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub base_model:         String,
    pub merged_projections: usize,
    pub tensors:            usize,
    pub output_dir:         PathBuf,
}

pub struct MergeUseCase {
    request: MergeRequest,
}

impl MergeUseCase {
    pub fn new(request: MergeRequest) -> Self {
        Self { request }
    }

    pub fn execute(&self) -> Result<MergeSummary> {
        let req = &self.request;

        // ── Step 1: Which base model ──────────────────────────────────────────
        let adapter    = adapter_store::read_config(&req.adapter_dir)?;
        let base_model = base_model_name(req.model.as_deref(), &adapter.base_model_name_or_path)?;

        // ── Step 2: Fetch ─────────────────────────────────────────────────────
        let source = hub::source_for(&base_model, &req.revision)?;
        let files  = source
            .fetch(&base_model)
            .with_context(|| format!("Cannot obtain model '{base_model}'"))?;

        // ── Steps 3-5 ─────────────────────────────────────────────────────────
        let (merged_projections, tensors) =
            merge_files::<NdArray>(&files, &req.adapter_dir, &req.output_dir, &NdArrayDevice::Cpu)?;

        Ok(MergeSummary {
            base_model,
            merged_projections,
            tensors,
            output_dir: req.output_dir.clone(),
        })
    }
}

fn base_model_name(explicit: Option<&str>, recorded: &str) -> Result<String> {
    match explicit {
        Some(name) => Ok(name.to_string()),
        None if !recorded.trim().is_empty() => Ok(recorded.to_string()),
        None => bail!("adapter config names no base model; pass --model"),
    }
}

/// Steps 3-5 on one backend. Returns (merged projections, tensors written).
pub fn merge_files<B: Backend>(
    files:       &ModelFiles,
    adapter_dir: &Path,
    output_dir:  &Path,
    device:      &B::Device,
) -> Result<(usize, usize)> {
    let (config, base) = weights::load_base_model::<B>(files, device)
        .with_context(|| format!("Cannot build model from '{}'", files.config.display()))?;
    let (adapted, _) = adapter_store::load(adapter_dir, base, device)
        .with_context(|| format!("Cannot load adapter from '{}'", adapter_dir.display()))?;

    let merged_projections = adapted.projections().filter(|(_, _, p)| p.lora.is_some()).count();
    let merged  = adapted.merge_adapters();
    let tensors = weights::model_tensors(&merged, &config)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Cannot create output directory '{}'", output_dir.display()))?;
    adapter_store::write_atomic(&output_dir.join(hub::WEIGHTS_FILE), &weights::encode_f32(&tensors)?)?;
    for (from, name) in [(&files.config, hub::CONFIG_FILE), (&files.tokenizer, hub::TOKENIZER_FILE)] {
        let bytes = std::fs::read(from).with_context(|| format!("Cannot read '{}'", from.display()))?;
        adapter_store::write_atomic(&output_dir.join(name), &bytes)?;
    }

    tracing::info!(
        "Merged {merged_projections} adapted projection(s); wrote {} tensors to '{}'",
        tensors.len(),
        output_dir.display(),
    );
    Ok((merged_projections, tensors.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::AdapterConfig;
    use crate::ml::{lora, model::LlamaModel};
    use crate::test_support::{self, TestBackend};
    use burn::{module::Param, tensor::Distribution};

    #[test]
    fn test_merged_checkpoint_reproduces_adapted_model() {
        let root      = tempfile::tempdir().unwrap();
        let model_dir = root.path().join("model");
        std::fs::create_dir_all(&model_dir).unwrap();
        test_support::write_model_dir(&model_dir);
        let files  = hub::LocalSource.fetch(model_dir.to_str().unwrap()).unwrap();
        let device = Default::default();

        // an adapter whose B is non-zero, as after training
        let lora_cfg = AdapterConfig {
            r: 2,
            lora_dropout: 0.0,
            target_modules: vec!["q_proj".into(), "up_proj".into()],
            ..AdapterConfig::default()
        };
        let (_, base) = weights::load_base_model::<TestBackend>(&files, &device).unwrap();
        let (mut adapted, _) = lora::inject(base, &lora_cfg, 11, &device).unwrap();
        for layer in adapted.layers.iter_mut() {
            for (_, proj) in layer.projections_mut() {
                if let Some(adapter) = proj.lora.as_mut() {
                    let dims = adapter.lora_b.dims();
                    adapter.lora_b = Param::from_tensor(Tensor::random(dims, Distribution::Normal(0.0, 0.5), &device));
                }
            }
        }
        let adapter_dir = root.path().join("adapter_model");
        adapter_store::save(&adapter_dir, &adapted, &lora_cfg, "tiny").unwrap();

        let out = root.path().join("merged");
        let (merged, tensors) = merge_files::<TestBackend>(&files, &adapter_dir, &out, &device).unwrap();
        assert_eq!(merged, 4);
        assert_eq!(tensors, test_support::tiny_config().weight_shapes().len());

        // the output directory is itself a loadable model
        let merged_files = hub::LocalSource.fetch(out.to_str().unwrap()).unwrap();
        let (_, reloaded): (_, LlamaModel<TestBackend>) = weights::load_base_model(&merged_files, &device).unwrap();
        assert!(reloaded.projections().all(|(_, _, p)| p.lora.is_none()));

        let ids  = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![1i64, 9, 10, 11, 2], [1, 5]), &device);
        let mask = Tensor::<TestBackend, 2, Int>::ones([1, 5], &device);
        let expected = adapted.forward(ids.clone(), mask.clone());
        let actual   = reloaded.forward(ids, mask);
        let diff: f32 = (expected - actual).abs().max().into_scalar().elem();
        assert!(diff < 1e-4, "max diff {diff}");
    }

    #[test]
    fn test_base_model_name_falls_back_to_adapter_config() {
        assert_eq!(base_model_name(Some("./local"), "meta-llama/Llama-3.2-3B").unwrap(), "./local");
        assert_eq!(base_model_name(None, "meta-llama/Llama-3.2-3B").unwrap(), "meta-llama/Llama-3.2-3B");
        assert!(base_model_name(None, "  ").is_err());
    }

    #[test]
    fn test_missing_adapter_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        let req  = MergeRequest {
            model:       Some("./nowhere".into()),
            revision:    "main".into(),
            adapter_dir: root.path().join("absent"),
            output_dir:  root.path().join("out"),
        };
        assert!(MergeUseCase::new(req).execute().is_err());
        assert!(!root.path().join("out").exists());
    }
}
