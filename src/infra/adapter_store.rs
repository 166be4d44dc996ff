// ============================================================
// Layer 6 — Adapter Store (PEFT format)
// ============================================================
// Persists only what training changed, in the layout Hugging
// Face PEFT reads and writes:
//
//   {dir}/adapter_config.json        r, lora_alpha, target_modules,
//                                    lora_dropout, bias, task_type,
//                                    peft_type, base model id
//   {dir}/adapter_model.safetensors  F32 tensors
//
// Tensor names and shapes (PyTorch layout):
//
//   base_model.model.model.layers.{i}.self_attn.q_proj.lora_A.weight  [r, in]
//   base_model.model.model.layers.{i}.self_attn.q_proj.lora_B.weight  [out, r]
//   base_model.model.model.layers.{i}.mlp.up_proj.bias                [out]
//                                        (only biases left trainable)
//
// Both files go through a temp file in the destination directory
// and an atomic rename, so a crash never leaves a truncated file.

use std::{collections::HashMap, io::Write, path::Path};

use burn::{module::Param, prelude::*};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::config::AdapterConfig;
use crate::domain::error::{FinetuneError, Result};
use crate::infra::weights::{encode_f32, tensor_to_f32, view_to_f32};
use crate::ml::lora::{self, bias_is_trainable, ProjectionKind};
use crate::ml::model::LlamaModel;

pub const CONFIG_FILE:  &str = "adapter_config.json";
pub const WEIGHTS_FILE: &str = "adapter_model.safetensors";

const PEFT_PREFIX: &str = "base_model.model";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfigFile {
    pub peft_type:               String,
    #[serde(default)]
    pub base_model_name_or_path: String,
    #[serde(default)]
    pub inference_mode:          bool,
    #[serde(flatten)]
    pub lora:                    AdapterConfig,
}

fn tensor_prefix(layer: usize, kind: ProjectionKind) -> String {
    format!("{PEFT_PREFIX}.model.layers.{layer}.{}.{}", kind.group(), kind.name())
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| FinetuneError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| FinetuneError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| FinetuneError::io(path, e))?;
    tmp.persist(path).map_err(|e| FinetuneError::io(path, e.error))?;
    Ok(())
}

// ─── Save ─────────────────────────────────────────────────────────────────────

/// Collect every adapter matrix and trainable bias under its PEFT name.
pub fn adapter_tensors<B: Backend>(
    model:  &LlamaModel<B>,
    config: &AdapterConfig,
) -> Result<Vec<(String, Vec<usize>, Vec<f32>)>> {
    let mut tensors = Vec::new();

    for (layer, kind, proj) in model.projections() {
        let prefix = tensor_prefix(layer, kind);

        if let Some(adapter) = &proj.lora {
            let (d_in, d_out) = proj.dims();
            let r = adapter.rank();

            // burn keeps A as [in, r] and B as [r, out]
            let name = format!("{prefix}.lora_A.weight");
            let a    = tensor_to_f32(&name, adapter.lora_a.val().transpose())?;
            tensors.push((name, vec![r, d_in], a));

            let name = format!("{prefix}.lora_B.weight");
            let b    = tensor_to_f32(&name, adapter.lora_b.val().transpose())?;
            tensors.push((name, vec![d_out, r], b));
        }

        if let Some(bias) = &proj.linear.bias {
            if bias_is_trainable(config.bias, proj.lora.is_some()) {
                let name = format!("{prefix}.bias");
                let dims = bias.dims().to_vec();
                tensors.push((name.clone(), dims, tensor_to_f32(&name, bias.val())?));
            }
        }
    }

    Ok(tensors)
}

pub fn save<B: Backend>(
    dir:        &Path,
    model:      &LlamaModel<B>,
    config:     &AdapterConfig,
    base_model: &str,
) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| FinetuneError::io(dir, e))?;

    let tensors = adapter_tensors(model, config)?;
    if tensors.is_empty() {
        return Err(FinetuneError::config("model carries no adapters to save"));
    }

    let file = AdapterConfigFile {
        peft_type:               "LORA".to_string(),
        base_model_name_or_path: base_model.to_string(),
        inference_mode:          true,
        lora:                    config.clone(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| FinetuneError::format(CONFIG_FILE, e.to_string()))?;

    write_atomic(&dir.join(WEIGHTS_FILE), &encode_f32(&tensors)?)?;
    write_atomic(&dir.join(CONFIG_FILE), json.as_bytes())?;

    tracing::info!("Saved {} adapter tensors to '{}'", tensors.len(), dir.display());
    Ok(())
}

// ─── Load ─────────────────────────────────────────────────────────────────────

pub fn read_config(dir: &Path) -> Result<AdapterConfigFile> {
    let path = dir.join(CONFIG_FILE);
    let text = std::fs::read_to_string(&path).map_err(|e| FinetuneError::io(&path, e))?;
    let file: AdapterConfigFile = serde_json::from_str(&text)
        .map_err(|e| FinetuneError::format(path.display().to_string(), e.to_string()))?;

    if file.peft_type != "LORA" {
        return Err(FinetuneError::config(format!(
            "'{}' holds a {} adapter, only LORA is supported", path.display(), file.peft_type
        )));
    }
    Ok(file)
}

fn restore<B: Backend, const D: usize>(
    values: &HashMap<String, (Vec<usize>, Vec<f32>)>,
    name:   &str,
    shape:  [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let (dims, data) = values
        .get(name)
        .ok_or_else(|| FinetuneError::format(name, "tensor missing from adapter file"))?;
    if dims.as_slice() != shape {
        return Err(FinetuneError::format(name, format!(
            "shape {dims:?} does not match expected {shape:?}"
        )));
    }
    Ok(Tensor::from_data(TensorData::new(data.clone(), shape), device))
}

/// Attach the adapter saved in `dir` to a freshly built base model.
pub fn load<B: Backend>(
    dir:    &Path,
    base:   LlamaModel<B>,
    device: &B::Device,
) -> Result<(LlamaModel<B>, AdapterConfigFile)> {
    let file = read_config(dir)?;
    // A is overwritten below, so the init seed is irrelevant
    let (mut model, _) = lora::inject(base, &file.lora, 0, device)?;

    let path  = dir.join(WEIGHTS_FILE);
    let bytes = std::fs::read(&path).map_err(|e| FinetuneError::io(&path, e))?;
    let st    = SafeTensors::deserialize(&bytes)
        .map_err(|e| FinetuneError::format(path.display().to_string(), format!("{e:?}")))?;

    let mut values = HashMap::new();
    for (name, view) in st.tensors() {
        let data = view_to_f32(&name, &view)?;
        values.insert(name, (view.shape().to_vec(), data));
    }

    for (layer_index, layer) in model.layers.iter_mut().enumerate() {
        for (kind, proj) in layer.projections_mut() {
            let prefix  = tensor_prefix(layer_index, kind);
            let adapted = proj.lora.is_some();
            let (d_in, d_out) = proj.dims();

            if let Some(adapter) = proj.lora.as_mut() {
                let r = adapter.rank();
                let a: Tensor<B, 2> = restore(&values, &format!("{prefix}.lora_A.weight"), [r, d_in], device)?;
                let b: Tensor<B, 2> = restore(&values, &format!("{prefix}.lora_B.weight"), [d_out, r], device)?;
                adapter.lora_a = Param::from_tensor(a.transpose());
                adapter.lora_b = Param::from_tensor(b.transpose());
            }

            if bias_is_trainable(file.lora.bias, adapted) && proj.linear.bias.is_some() {
                let bias: Tensor<B, 1> = restore(&values, &format!("{prefix}.bias"), [d_out], device)?;
                proj.linear.bias = Some(Param::from_tensor(bias));
            }
        }
    }

    tracing::info!("Loaded adapter from '{}' ({} tensors)", dir.display(), values.len());
    Ok((model, file))
}
