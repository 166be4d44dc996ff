// ============================================================
// Layer 5 — Llama Decoder (Burn)
// ============================================================
// The base causal LM as a burn module tree, laid out like the
// Hugging Face checkpoint so weights map one-to-one by name:
//
//   model.embed_tokens
//   model.layers.{i}
//     input_layernorm
//     self_attn.{q,k,v,o}_proj      ← LoRA-capable projections
//     post_attention_layernorm
//     mlp.{gate,up,down}_proj       ← LoRA-capable projections
//   model.norm
//   lm_head                         (tied to embed_tokens if asked)
//
// Attention is grouped-query (num_key_value_heads ≤ heads) with
// rotary position embeddings, including the "llama3" frequency
// rescaling used by Llama 3.1 / 3.2 checkpoints.

use burn::{
    module::{Ignored, Param},
    nn::{Embedding, Linear},
    prelude::*,
    tensor::{activation, Distribution},
};
use serde::{Deserialize, Serialize};

use crate::data::{batcher::CausalLmBatch, dataset::IGNORE_INDEX};
use crate::domain::error::Result as DomainResult;
use crate::ml::lora::{Projection, ProjectionKind};

// Large negative instead of -inf keeps softmax finite in f16.
const MASK_VALUE: f32 = -1.0e4;

// ─── Configuration ────────────────────────────────────────────────────────────

/// "llama3" rope_scaling block from config.json
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RopeScaling {
    pub factor:                           f64,
    pub low_freq_factor:                  f64,
    pub high_freq_factor:                 f64,
    pub original_max_position_embeddings: usize,
}

#[derive(Config, Debug)]
pub struct LlamaConfig {
    pub vocab_size:          usize,
    pub hidden_size:         usize,
    pub intermediate_size:   usize,
    pub num_hidden_layers:   usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    #[config(default = "None")]
    pub head_dim:                Option<usize>,
    #[config(default = 1e-5)]
    pub rms_norm_eps:            f64,
    #[config(default = 500000.0)]
    pub rope_theta:              f64,
    #[config(default = "None")]
    pub rope_scaling:            Option<RopeScaling>,
    #[config(default = 2048)]
    pub max_position_embeddings: usize,
    #[config(default = false)]
    pub tie_word_embeddings:     bool,
    #[config(default = false)]
    pub attention_bias:          bool,
    #[config(default = 2)]
    pub eos_token_id:            u32,
    #[config(default = "None")]
    pub pad_token_id:            Option<u32>,
}

impl LlamaConfig {
    pub fn head_dim(&self) -> usize {
        self.head_dim.unwrap_or(self.hidden_size / self.num_attention_heads)
    }

    /// Input/output width of one projection: (d_in, d_out).
    pub fn projection_dims(&self, kind: ProjectionKind) -> (usize, usize) {
        let h  = self.hidden_size;
        let q  = self.num_attention_heads * self.head_dim();
        let kv = self.num_key_value_heads * self.head_dim();
        let ff = self.intermediate_size;
        match kind {
            ProjectionKind::QProj                         => (h, q),
            ProjectionKind::KProj | ProjectionKind::VProj => (h, kv),
            ProjectionKind::OProj                         => (q, h),
            ProjectionKind::GateProj | ProjectionKind::UpProj => (h, ff),
            ProjectionKind::DownProj                      => (ff, h),
        }
    }

    /// Every tensor name the checkpoint must provide, with its
    /// PyTorch-layout shape.
    pub fn weight_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let h = self.hidden_size;
        let mut shapes = vec![("model.embed_tokens.weight".to_string(), vec![self.vocab_size, h])];

        for i in 0..self.num_hidden_layers {
            let prefix = format!("model.layers.{i}");
            shapes.push((format!("{prefix}.input_layernorm.weight"), vec![h]));
            shapes.push((format!("{prefix}.post_attention_layernorm.weight"), vec![h]));
            for kind in ProjectionKind::ALL {
                let (d_in, d_out) = self.projection_dims(kind);
                let name = format!("{prefix}.{}.{}", kind.group(), kind.name());
                shapes.push((format!("{name}.weight"), vec![d_out, d_in]));
                if self.has_bias(kind) {
                    shapes.push((format!("{name}.bias"), vec![d_out]));
                }
            }
        }

        shapes.push(("model.norm.weight".to_string(), vec![h]));
        if !self.tie_word_embeddings {
            shapes.push(("lm_head.weight".to_string(), vec![self.vocab_size, h]));
        }
        shapes
    }

    pub fn has_bias(&self, kind: ProjectionKind) -> bool {
        self.attention_bias && kind.group() == "self_attn"
    }

    /// Randomly initialised model; used for tests and smoke runs.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LlamaModel<B> {
        let source = RandomInit::<B>::new(device.clone(), 0.02);
        match LlamaModel::build(self, &source) {
            Ok(model) => model,
            Err(e) => unreachable!("random initialisation cannot fail: {e}"),
        }
    }
}

// ─── Weight sources ───────────────────────────────────────────────────────────

/// What a tensor defaults to when the source generates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    Normal,
    Ones,
    Zeros,
}

/// Where model construction gets its tensors from.
/// `shape` is the checkpoint (PyTorch) layout.
pub trait WeightSource<B: Backend> {
    fn tensor<const D: usize>(&self, name: &str, shape: [usize; D], init: Init) -> DomainResult<Tensor<B, D>>;
}

pub struct RandomInit<B: Backend> {
    device: B::Device,
    std:    f64,
}

impl<B: Backend> RandomInit<B> {
    pub fn new(device: B::Device, std: f64) -> Self {
        Self { device, std }
    }
}

impl<B: Backend> WeightSource<B> for RandomInit<B> {
    fn tensor<const D: usize>(&self, _name: &str, shape: [usize; D], init: Init) -> DomainResult<Tensor<B, D>> {
        Ok(match init {
            Init::Normal => Tensor::random(shape, Distribution::Normal(0.0, self.std), &self.device),
            Init::Ones   => Tensor::ones(shape, &self.device),
            Init::Zeros  => Tensor::zeros(shape, &self.device),
        })
    }
}

fn load_linear<B: Backend, S: WeightSource<B>>(
    source: &S,
    prefix: &str,
    d_in:   usize,
    d_out:  usize,
    bias:   bool,
) -> DomainResult<Linear<B>> {
    // Checkpoints store [out, in]; burn's Linear wants [in, out].
    let weight = source.tensor(&format!("{prefix}.weight"), [d_out, d_in], Init::Normal)?;
    let bias = if bias {
        Some(Param::from_tensor(source.tensor(&format!("{prefix}.bias"), [d_out], Init::Zeros)?))
    } else {
        None
    };
    Ok(Linear { weight: Param::from_tensor(weight.transpose()), bias })
}

// ─── Building blocks ──────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct RmsNorm<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
    pub eps:    f64,
}

impl<B: Backend> RmsNorm<B> {
    fn load<S: WeightSource<B>>(source: &S, name: &str, size: usize, eps: f64) -> DomainResult<Self> {
        let weight = source.tensor(name, [size], Init::Ones)?;
        Ok(Self { weight: Param::from_tensor(weight), eps })
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let rms = x.clone().powf_scalar(2.0).mean_dim(2).add_scalar(self.eps).sqrt();
        x.div(rms).mul(self.weight.val().unsqueeze::<3>())
    }
}

/// Inverse frequencies for rotary embeddings; not a parameter.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    inv_freq: Vec<f32>,
}

impl RotaryEmbedding {
    pub fn new(head_dim: usize, theta: f64, scaling: Option<RopeScaling>) -> Self {
        let inv_freq = (0..head_dim / 2)
            .map(|i| {
                let freq = 1.0 / theta.powf((2 * i) as f64 / head_dim as f64);
                match scaling {
                    Some(s) => scale_llama3(freq, &s),
                    None    => freq,
                }
            })
            .map(|f| f as f32)
            .collect();
        Self { inv_freq }
    }

    /// cos / sin tables of shape [seq_len, head_dim]
    pub fn tables<B: Backend>(&self, seq_len: usize, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let dim = self.inv_freq.len() * 2;
        let mut cos = Vec::with_capacity(seq_len * dim);
        let mut sin = Vec::with_capacity(seq_len * dim);
        for pos in 0..seq_len {
            // both halves share the same frequencies (rotate_half layout)
            for _ in 0..2 {
                for &f in &self.inv_freq {
                    let angle = pos as f32 * f;
                    cos.push(angle.cos());
                    sin.push(angle.sin());
                }
            }
        }
        (
            Tensor::from_data(TensorData::new(cos, [seq_len, dim]), device),
            Tensor::from_data(TensorData::new(sin, [seq_len, dim]), device),
        )
    }
}

fn scale_llama3(freq: f64, s: &RopeScaling) -> f64 {
    let original = s.original_max_position_embeddings as f64;
    let wavelen  = 2.0 * std::f64::consts::PI / freq;
    let low_freq_wavelen  = original / s.low_freq_factor;
    let high_freq_wavelen = original / s.high_freq_factor;

    if wavelen < high_freq_wavelen {
        freq
    } else if wavelen > low_freq_wavelen {
        freq / s.factor
    } else {
        let smooth = (original / wavelen - s.low_freq_factor) / (s.high_freq_factor - s.low_freq_factor);
        (1.0 - smooth) * freq / s.factor + smooth * freq
    }
}

fn apply_rotary<B: Backend>(x: Tensor<B, 4>, cos: Tensor<B, 2>, sin: Tensor<B, 2>) -> Tensor<B, 4> {
    let [b, h, s, d] = x.dims();
    let x1 = x.clone().slice([0..b, 0..h, 0..s, 0..d / 2]);
    let x2 = x.clone().slice([0..b, 0..h, 0..s, d / 2..d]);
    let rotated = Tensor::cat(vec![x2.neg(), x1], 3);
    x * cos.unsqueeze::<4>() + rotated * sin.unsqueeze::<4>()
}

fn repeat_kv<B: Backend>(x: Tensor<B, 4>, n_rep: usize) -> Tensor<B, 4> {
    if n_rep == 1 {
        return x;
    }
    let [b, kv, s, d] = x.dims();
    x.unsqueeze_dim::<5>(2)
        .expand([b, kv, n_rep, s, d])
        .reshape([b, kv * n_rep, s, d])
}

// ─── Attention ────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub q_proj:       Projection<B>,
    pub k_proj:       Projection<B>,
    pub v_proj:       Projection<B>,
    pub o_proj:       Projection<B>,
    pub num_heads:    usize,
    pub num_kv_heads: usize,
    pub head_dim:     usize,
}

impl<B: Backend> Attention<B> {
    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        cos:  Tensor<B, 2>,
        sin:  Tensor<B, 2>,
        mask: Tensor<B, 4, Bool>,
    ) -> Tensor<B, 3> {
        let [b, s, _] = x.dims();
        let (nh, nkv, hd) = (self.num_heads, self.num_kv_heads, self.head_dim);

        let q = self.q_proj.forward(x.clone()).reshape([b, s, nh, hd]).swap_dims(1, 2);
        let k = self.k_proj.forward(x.clone()).reshape([b, s, nkv, hd]).swap_dims(1, 2);
        let v = self.v_proj.forward(x).reshape([b, s, nkv, hd]).swap_dims(1, 2);

        let q = apply_rotary(q, cos.clone(), sin.clone());
        let k = apply_rotary(k, cos, sin);
        let k = repeat_kv(k, nh / nkv);
        let v = repeat_kv(v, nh / nkv);

        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar((hd as f64).sqrt());
        let scores = scores.mask_fill(mask.expand([b, nh, s, s]), MASK_VALUE);
        let probs  = activation::softmax(scores, 3);

        let context = probs.matmul(v).swap_dims(1, 2).reshape([b, s, nh * hd]);
        self.o_proj.forward(context)
    }
}

// ─── MLP ──────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub gate_proj: Projection<B>,
    pub up_proj:   Projection<B>,
    pub down_proj: Projection<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let gate = activation::silu(self.gate_proj.forward(x.clone()));
        self.down_proj.forward(gate * self.up_proj.forward(x))
    }
}

// ─── Decoder layer ────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct DecoderLayer<B: Backend> {
    pub input_layernorm:          RmsNorm<B>,
    pub self_attn:                Attention<B>,
    pub post_attention_layernorm: RmsNorm<B>,
    pub mlp:                      Mlp<B>,
}

impl<B: Backend> DecoderLayer<B> {
    fn load<S: WeightSource<B>>(cfg: &LlamaConfig, index: usize, source: &S) -> DomainResult<Self> {
        let prefix = format!("model.layers.{index}");
        let proj = |kind: ProjectionKind| -> DomainResult<Projection<B>> {
            let (d_in, d_out) = cfg.projection_dims(kind);
            let name = format!("{prefix}.{}.{}", kind.group(), kind.name());
            Ok(Projection::new(load_linear(source, &name, d_in, d_out, cfg.has_bias(kind))?))
        };

        Ok(Self {
            input_layernorm: RmsNorm::load(
                source, &format!("{prefix}.input_layernorm.weight"), cfg.hidden_size, cfg.rms_norm_eps,
            )?,
            self_attn: Attention {
                q_proj:       proj(ProjectionKind::QProj)?,
                k_proj:       proj(ProjectionKind::KProj)?,
                v_proj:       proj(ProjectionKind::VProj)?,
                o_proj:       proj(ProjectionKind::OProj)?,
                num_heads:    cfg.num_attention_heads,
                num_kv_heads: cfg.num_key_value_heads,
                head_dim:     cfg.head_dim(),
            },
            post_attention_layernorm: RmsNorm::load(
                source, &format!("{prefix}.post_attention_layernorm.weight"), cfg.hidden_size, cfg.rms_norm_eps,
            )?,
            mlp: Mlp {
                gate_proj: proj(ProjectionKind::GateProj)?,
                up_proj:   proj(ProjectionKind::UpProj)?,
                down_proj: proj(ProjectionKind::DownProj)?,
            },
        })
    }

    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        cos:  Tensor<B, 2>,
        sin:  Tensor<B, 2>,
        mask: Tensor<B, 4, Bool>,
    ) -> Tensor<B, 3> {
        let attn = self.self_attn.forward(self.input_layernorm.forward(x.clone()), cos, sin, mask);
        let x    = x + attn;
        let ff   = self.mlp.forward(self.post_attention_layernorm.forward(x.clone()));
        x + ff
    }

    pub fn projections(&self) -> [(ProjectionKind, &Projection<B>); 7] {
        [
            (ProjectionKind::QProj,    &self.self_attn.q_proj),
            (ProjectionKind::KProj,    &self.self_attn.k_proj),
            (ProjectionKind::VProj,    &self.self_attn.v_proj),
            (ProjectionKind::OProj,    &self.self_attn.o_proj),
            (ProjectionKind::GateProj, &self.mlp.gate_proj),
            (ProjectionKind::UpProj,   &self.mlp.up_proj),
            (ProjectionKind::DownProj, &self.mlp.down_proj),
        ]
    }

    pub fn projections_mut(&mut self) -> [(ProjectionKind, &mut Projection<B>); 7] {
        [
            (ProjectionKind::QProj,    &mut self.self_attn.q_proj),
            (ProjectionKind::KProj,    &mut self.self_attn.k_proj),
            (ProjectionKind::VProj,    &mut self.self_attn.v_proj),
            (ProjectionKind::OProj,    &mut self.self_attn.o_proj),
            (ProjectionKind::GateProj, &mut self.mlp.gate_proj),
            (ProjectionKind::UpProj,   &mut self.mlp.up_proj),
            (ProjectionKind::DownProj, &mut self.mlp.down_proj),
        ]
    }
}

// ─── Full model ───────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct LlamaModel<B: Backend> {
    pub embed_tokens: Embedding<B>,
    pub layers:       Vec<DecoderLayer<B>>,
    pub norm:         RmsNorm<B>,
    pub lm_head:      Linear<B>,
    pub rotary:       Ignored<RotaryEmbedding>,
}

impl<B: Backend> LlamaModel<B> {
    /// Assemble the module tree, pulling each tensor from `source`.
    pub fn build<S: WeightSource<B>>(cfg: &LlamaConfig, source: &S) -> DomainResult<Self> {
        let (v, h) = (cfg.vocab_size, cfg.hidden_size);
        let embed  = source.tensor("model.embed_tokens.weight", [v, h], Init::Normal)?;

        let layers = (0..cfg.num_hidden_layers)
            .map(|i| DecoderLayer::load(cfg, i, source))
            .collect::<DomainResult<Vec<_>>>()?;

        let norm = RmsNorm::load(source, "model.norm.weight", h, cfg.rms_norm_eps)?;

        let lm_head = if cfg.tie_word_embeddings {
            Linear { weight: Param::from_tensor(embed.clone().transpose()), bias: None }
        } else {
            load_linear(source, "lm_head", h, v, false)?
        };

        Ok(Self {
            embed_tokens: Embedding { weight: Param::from_tensor(embed) },
            layers,
            norm,
            lm_head,
            rotary: Ignored(RotaryEmbedding::new(cfg.head_dim(), cfg.rope_theta, cfg.rope_scaling)),
        })
    }

    /// input_ids, attention_mask: [batch, seq] → logits [batch, seq, vocab]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let device   = input_ids.device();
        let [_, seq] = input_ids.dims();

        let (cos, sin) = self.rotary.tables::<B>(seq, &device);
        let mask       = build_mask(attention_mask);

        let mut x = self.embed_tokens.forward(input_ids);
        for layer in &self.layers {
            x = layer.forward(x, cos.clone(), sin.clone(), mask.clone());
        }
        self.lm_head.forward(self.norm.forward(x))
    }

    pub fn forward_loss(&self, batch: CausalLmBatch<B>) -> Tensor<B, 1> {
        let logits = self.forward(batch.input_ids, batch.attention_mask);
        causal_lm_loss(logits, batch.labels)
    }

    /// (layer index, kind, projection) for every projection in the model
    pub fn projections(&self) -> impl Iterator<Item = (usize, ProjectionKind, &Projection<B>)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| layer.projections().into_iter().map(move |(k, p)| (i, k, p)))
    }

    /// Fold every adapter into its base weight and drop it.
    /// The result has no trainable low-rank parameters left.
    pub fn merge_adapters(mut self) -> Self {
        self.layers = self
            .layers
            .into_iter()
            .map(|mut layer| {
                for (_, proj) in layer.projections_mut() {
                    let merged = proj.clone().merge();
                    *proj = merged;
                }
                layer
            })
            .collect();
        self
    }
}

/// [batch, seq] padding mask → [batch, 1, seq, seq] "do not attend"
/// mask: true where the key is in the future or is padding.
fn build_mask<B: Backend>(attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 4, Bool> {
    let device = attention_mask.device();
    let [b, s] = attention_mask.dims();

    let pos    = Tensor::<B, 1, Int>::arange(0..s as i64, &device);
    let query  = pos.clone().reshape([s, 1]).expand([s, s]);
    let key    = pos.reshape([1, s]).expand([s, s]);
    let future = key.greater(query).int().reshape([1, 1, s, s]).expand([b, 1, s, s]);

    let padding = attention_mask.equal_elem(0).int().reshape([b, 1, 1, s]).expand([b, 1, s, s]);

    (future + padding).greater_elem(0)
}

/// Mean next-token cross entropy over positions whose label is not
/// IGNORE_INDEX. Position t predicts label t+1.
pub fn causal_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [b, s, v] = logits.dims();
    if s < 2 {
        // nothing to predict; keep the graph connected for backward()
        return logits.sum().mul_scalar(0.0);
    }

    let logits  = logits.slice([0..b, 0..s - 1, 0..v]);
    let targets = labels.slice([0..b, 1..s]);

    let ignored = targets.clone().equal_elem(IGNORE_INDEX);
    let keep    = ignored.clone().bool_not().float();
    let targets = targets.mask_fill(ignored, 0);

    let log_probs = activation::log_softmax(logits, 2);
    let picked    = log_probs.gather(2, targets.unsqueeze_dim::<3>(2)).reshape([b, s - 1]);

    let count = keep.clone().sum().clamp_min(1.0);
    picked.mul(keep).sum().neg().div(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, TestBackend};

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let cfg    = test_support::tiny_config();
        let model: LlamaModel<TestBackend> = cfg.init(&device);

        let ids  = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![1i64, 5, 6, 2, 1, 7, 0, 0], [2, 4]), &device);
        let mask = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![1i64, 1, 1, 1, 1, 1, 0, 0], [2, 4]), &device);

        let logits = model.forward(ids, mask);
        assert_eq!(logits.dims(), [2, 4, cfg.vocab_size]);
    }

    #[test]
    fn test_weight_shapes_cover_every_projection() {
        let cfg    = test_support::tiny_config();
        let shapes = cfg.weight_shapes();
        // embed + per layer (2 norms + 7 projections) + final norm + lm_head
        assert_eq!(shapes.len(), 1 + cfg.num_hidden_layers * 9 + 1 + 1);
        assert!(shapes.iter().any(|(n, s)| n == "model.layers.1.self_attn.k_proj.weight" && s == &vec![8, 16]));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let mut cfg = test_support::tiny_config();
        cfg.rope_scaling = Some(RopeScaling {
            factor:                           32.0,
            low_freq_factor:                  1.0,
            high_freq_factor:                 4.0,
            original_max_position_embeddings: 8192,
        });
        let json = serde_json::to_string(&cfg).unwrap();
        let back: LlamaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hidden_size, cfg.hidden_size);
        assert_eq!(back.num_key_value_heads, cfg.num_key_value_heads);
        assert_eq!(back.rope_scaling, cfg.rope_scaling);
    }

    #[test]
    fn test_tied_embeddings_drop_lm_head() {
        let cfg = test_support::tiny_config().with_tie_word_embeddings(true);
        assert!(!cfg.weight_shapes().iter().any(|(n, _)| n == "lm_head.weight"));
    }

    #[test]
    fn test_loss_ignores_masked_labels() {
        let device = Default::default();
        // uniform logits → loss is ln(vocab) for every counted position
        let logits = Tensor::<TestBackend, 3>::zeros([1, 4, 8], &device);
        let labels = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::new(vec![IGNORE_INDEX, IGNORE_INDEX, 3, 4], [1, 4]),
            &device,
        );
        let loss: f32 = causal_lm_loss(logits, labels).into_scalar().elem();
        assert!((loss - (8f32).ln()).abs() < 1e-5, "{loss}");
    }

    #[test]
    fn test_loss_with_no_targets_is_zero() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::ones([1, 3, 8], &device);
        let labels = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::new(vec![IGNORE_INDEX; 3], [1, 3]),
            &device,
        );
        let loss: f32 = causal_lm_loss(logits, labels).into_scalar().elem();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_llama3_scaling_leaves_high_frequencies_alone() {
        let scaling = RopeScaling {
            factor: 32.0, low_freq_factor: 1.0, high_freq_factor: 4.0,
            original_max_position_embeddings: 8192,
        };
        let plain  = RotaryEmbedding::new(64, 500000.0, None);
        let scaled = RotaryEmbedding::new(64, 500000.0, Some(scaling));
        assert_eq!(plain.inv_freq[0], scaled.inv_freq[0]);
        let last = plain.inv_freq.len() - 1;
        let ratio = plain.inv_freq[last] / scaled.inv_freq[last];
        assert!((ratio - 32.0).abs() < 1e-3, "{ratio}");
    }
}
