// ============================================================
// Layer 6 — Checkpoint Weights (safetensors)
// ============================================================
// Turns the files a ModelSource fetched into a LlamaModel:
//
//   config.json        → LlamaConfig   (parse_llama_config)
//   *.safetensors      → tensors       (SafetensorsSource)
//
// and back again: model_tensors lists a plain (adapter-free)
// model under its checkpoint names, for encode_f32 to write.
//
// Shards are memory-mapped and each tensor is decoded on demand,
// so peak memory is one tensor in f32 on top of the model itself.
// F32, F16 and BF16 are accepted; anything else is a Format error.

use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
};

use burn::prelude::*;
use memmap2::Mmap;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use serde::Deserialize;

use crate::domain::error::{FinetuneError, Result};
use crate::domain::traits::ModelFiles;
use crate::ml::model::{Init, LlamaConfig, LlamaModel, RopeScaling, WeightSource};

// ─── config.json ──────────────────────────────────────────────────────────────

const SUPPORTED_MODEL_TYPES: [&str; 1] = ["llama"];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenIds {
    One(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    fn first(&self) -> Option<u32> {
        match self {
            Self::One(id)   => Some(*id),
            Self::Many(ids) => ids.first().copied(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HfRopeScaling {
    #[serde(alias = "type")]
    rope_type:                        String,
    factor:                           f64,
    low_freq_factor:                  Option<f64>,
    high_freq_factor:                 Option<f64>,
    original_max_position_embeddings: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct HfLlamaConfig {
    model_type:              Option<String>,
    vocab_size:              usize,
    hidden_size:             usize,
    intermediate_size:       usize,
    num_hidden_layers:       usize,
    num_attention_heads:     usize,
    num_key_value_heads:     Option<usize>,
    head_dim:                Option<usize>,
    #[serde(default = "default_rms_norm_eps")]
    rms_norm_eps:            f64,
    #[serde(default = "default_rope_theta")]
    rope_theta:              f64,
    rope_scaling:            Option<HfRopeScaling>,
    #[serde(default = "default_max_positions")]
    max_position_embeddings: usize,
    #[serde(default)]
    tie_word_embeddings:     bool,
    #[serde(default)]
    attention_bias:          bool,
    eos_token_id:            Option<TokenIds>,
    pad_token_id:            Option<TokenIds>,
}

fn default_rms_norm_eps() -> f64 { 1e-6 }
fn default_rope_theta() -> f64 { 10000.0 }
fn default_max_positions() -> usize { 2048 }

/// Parse a Hugging Face config.json into a LlamaConfig.
pub fn parse_llama_config(text: &str, location: &str) -> Result<LlamaConfig> {
    let hf: HfLlamaConfig = serde_json::from_str(text)
        .map_err(|e| FinetuneError::format(location, e.to_string()))?;

    if let Some(kind) = hf.model_type.as_deref() {
        if !SUPPORTED_MODEL_TYPES.contains(&kind) {
            return Err(FinetuneError::config(format!(
                "model_type '{kind}' is not supported (supported: {})",
                SUPPORTED_MODEL_TYPES.join(", ")
            )));
        }
    }

    let num_key_value_heads = hf.num_key_value_heads.unwrap_or(hf.num_attention_heads);
    if hf.num_attention_heads == 0 || hf.num_attention_heads % num_key_value_heads != 0 {
        return Err(FinetuneError::format(location, format!(
            "num_attention_heads ({}) must be a multiple of num_key_value_heads ({num_key_value_heads})",
            hf.num_attention_heads
        )));
    }

    let rope_scaling = match hf.rope_scaling {
        None => None,
        Some(s) if s.rope_type == "llama3" => Some(RopeScaling {
            factor:                           s.factor,
            low_freq_factor:                  s.low_freq_factor.unwrap_or(1.0),
            high_freq_factor:                 s.high_freq_factor.unwrap_or(4.0),
            original_max_position_embeddings: s.original_max_position_embeddings.unwrap_or(8192),
        }),
        Some(s) => {
            return Err(FinetuneError::config(format!(
                "rope_scaling type '{}' is not supported", s.rope_type
            )))
        }
    };

    let eos_token_id = hf
        .eos_token_id
        .as_ref()
        .and_then(TokenIds::first)
        .ok_or_else(|| FinetuneError::format(location, "missing eos_token_id"))?;

    Ok(LlamaConfig::new(
        hf.vocab_size,
        hf.hidden_size,
        hf.intermediate_size,
        hf.num_hidden_layers,
        hf.num_attention_heads,
        num_key_value_heads,
    )
    .with_head_dim(hf.head_dim)
    .with_rms_norm_eps(hf.rms_norm_eps)
    .with_rope_theta(hf.rope_theta)
    .with_rope_scaling(rope_scaling)
    .with_max_position_embeddings(hf.max_position_embeddings)
    .with_tie_word_embeddings(hf.tie_word_embeddings)
    .with_attention_bias(hf.attention_bias)
    .with_eos_token_id(eos_token_id)
    .with_pad_token_id(hf.pad_token_id.as_ref().and_then(TokenIds::first)))
}

pub fn read_llama_config(path: &Path) -> Result<LlamaConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| FinetuneError::io(path, e))?;
    parse_llama_config(&text, &path.display().to_string())
}

// ─── Tensor decoding ──────────────────────────────────────────────────────────

/// Decode a tensor view into f32 values.
pub fn view_to_f32(name: &str, view: &TensorView<'_>) -> Result<Vec<f32>> {
    let bytes = view.data();
    let values = match view.dtype() {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        other => {
            return Err(FinetuneError::format(name, format!("unsupported dtype {other:?}")));
        }
    };
    Ok(values)
}

/// Serialize named f32 tensors into safetensors bytes.
pub fn encode_f32(tensors: &[(String, Vec<usize>, Vec<f32>)]) -> Result<Vec<u8>> {
    let buffers: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();

    let views = tensors
        .iter()
        .zip(&buffers)
        .map(|((name, shape, _), bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.clone(), view))
                .map_err(|e| FinetuneError::format(name.as_str(), format!("{e:?}")))
        })
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize(views, &None)
        .map_err(|e| FinetuneError::format("safetensors", format!("{e:?}")))
}

pub fn tensor_to_f32<B: Backend, const D: usize>(name: &str, tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| FinetuneError::format(name, format!("{e:?}")))
}

/// Every weight of `model` under its checkpoint name, in PyTorch
/// layout, in the order of `LlamaConfig::weight_shapes`.
pub fn model_tensors<B: Backend>(
    model:  &LlamaModel<B>,
    config: &LlamaConfig,
) -> Result<Vec<(String, Vec<usize>, Vec<f32>)>> {
    let mut tensors = Vec::new();
    let mut push = |name: String, values: Vec<f32>, shape: Vec<usize>| tensors.push((name, shape, values));

    let embed = model.embed_tokens.weight.val();
    let name  = "model.embed_tokens.weight".to_string();
    let dims  = embed.dims().to_vec();
    push(name.clone(), tensor_to_f32(&name, embed)?, dims);

    for (i, layer) in model.layers.iter().enumerate() {
        let prefix = format!("model.layers.{i}");
        for (norm, tensor) in [
            ("input_layernorm", layer.input_layernorm.weight.val()),
            ("post_attention_layernorm", layer.post_attention_layernorm.weight.val()),
        ] {
            let name = format!("{prefix}.{norm}.weight");
            let dims = tensor.dims().to_vec();
            push(name.clone(), tensor_to_f32(&name, tensor)?, dims);
        }

        for (kind, proj) in layer.projections() {
            let name = format!("{prefix}.{}.{}", kind.group(), kind.name());
            if proj.lora.is_some() {
                return Err(FinetuneError::config(format!("{name} still carries an adapter; merge it first")));
            }
            let weight = proj.linear.weight.val().transpose();
            let dims   = weight.dims().to_vec();
            push(format!("{name}.weight"), tensor_to_f32(&name, weight)?, dims);
            if let Some(bias) = &proj.linear.bias {
                let dims = bias.dims().to_vec();
                push(format!("{name}.bias"), tensor_to_f32(&name, bias.val())?, dims);
            }
        }
    }

    let norm = model.norm.weight.val();
    let dims = norm.dims().to_vec();
    push("model.norm.weight".to_string(), tensor_to_f32("model.norm.weight", norm)?, dims);

    if !config.tie_word_embeddings {
        let head = model.lm_head.weight.val().transpose();
        let dims = head.dims().to_vec();
        push("lm_head.weight".to_string(), tensor_to_f32("lm_head.weight", head)?, dims);
    }

    Ok(tensors)
}

// ─── SafetensorsSource ────────────────────────────────────────────────────────

struct Shard {
    path: PathBuf,
    mmap: Mmap,
}

/// Memory-mapped checkpoint shards with a name → shard index.
pub struct SafetensorsSource<B: Backend> {
    shards: Vec<Shard>,
    index:  HashMap<String, usize>,
    device: B::Device,
}

impl<B: Backend> SafetensorsSource<B> {
    pub fn open(paths: &[PathBuf], device: B::Device) -> Result<Self> {
        let mut shards = Vec::with_capacity(paths.len());
        let mut index  = HashMap::new();

        for (i, path) in paths.iter().enumerate() {
            let file = File::open(path).map_err(|e| FinetuneError::io(path, e))?;
            // SAFETY: the mapping is read-only and dropped with the source;
            // checkpoint files are not rewritten while a run is loading them.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| FinetuneError::io(path, e))?;

            let tensors = SafeTensors::deserialize(&mmap)
                .map_err(|e| FinetuneError::format(path.display().to_string(), format!("{e:?}")))?;
            for name in tensors.names() {
                index.insert(name.to_string(), i);
            }
            shards.push(Shard { path: path.clone(), mmap });
        }

        tracing::debug!("Indexed {} tensors across {} shard(s)", index.len(), shards.len());
        Ok(Self { shards, index, device })
    }

    fn read(&self, name: &str, expected: &[usize]) -> Result<Vec<f32>> {
        let shard = self
            .index
            .get(name)
            .map(|&i| &self.shards[i])
            .ok_or_else(|| FinetuneError::format(name, "tensor missing from checkpoint"))?;

        let location = format!("{} ({name})", shard.path.display());
        let tensors  = SafeTensors::deserialize(&shard.mmap)
            .map_err(|e| FinetuneError::format(location.as_str(), format!("{e:?}")))?;
        let view = tensors
            .tensor(name)
            .map_err(|e| FinetuneError::format(location.as_str(), format!("{e:?}")))?;

        if view.shape() != expected {
            return Err(FinetuneError::format(location, format!(
                "shape {:?} does not match expected {:?}", view.shape(), expected
            )));
        }
        view_to_f32(&location, &view)
    }
}

impl<B: Backend> WeightSource<B> for SafetensorsSource<B> {
    fn tensor<const D: usize>(&self, name: &str, shape: [usize; D], _init: Init) -> Result<Tensor<B, D>> {
        let values = self.read(name, &shape)?;
        Ok(Tensor::from_data(TensorData::new(values, shape), &self.device))
    }
}

/// Read config.json and every weight shard into a base model.
pub fn load_base_model<B: Backend>(files: &ModelFiles, device: &B::Device) -> Result<(LlamaConfig, LlamaModel<B>)> {
    let config = read_llama_config(&files.config)?;
    let source = SafetensorsSource::<B>::open(&files.weights, device.clone())?;
    tracing::info!(
        "Building Llama: {} layers, hidden {}, heads {}/{} (q/kv), vocab {}",
        config.num_hidden_layers,
        config.hidden_size,
        config.num_attention_heads,
        config.num_key_value_heads,
        config.vocab_size,
    );
    let model = LlamaModel::build(&config, &source)?;
    Ok((config, model))
}
