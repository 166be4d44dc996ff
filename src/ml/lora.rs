// ============================================================
// Layer 5 — LoRA Adapters
// ============================================================
// A frozen projection W gets a trainable low-rank update:
//
//   y = x·W + dropout(x)·A·B · (alpha / r)
//
//   A: [in, r]   ~ U(-1/√in, 1/√in)
//   B: [r, out]  = 0            → the adapted model starts out
//                                 identical to the base model
//
// Injection freezes every base parameter, then attaches adapters
// to the projections named in AdapterConfig::target_modules.

use std::{collections::BTreeSet, fmt, str::FromStr};

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::config::{AdapterConfig, BiasMode};
use crate::domain::error::{FinetuneError, Result as DomainResult};
use crate::ml::model::LlamaModel;

// ─── Projection names ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProjectionKind {
    QProj,
    KProj,
    VProj,
    OProj,
    GateProj,
    UpProj,
    DownProj,
}

impl ProjectionKind {
    pub const ALL: [ProjectionKind; 7] = [
        Self::QProj, Self::KProj, Self::VProj, Self::OProj,
        Self::GateProj, Self::UpProj, Self::DownProj,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::QProj    => "q_proj",
            Self::KProj    => "k_proj",
            Self::VProj    => "v_proj",
            Self::OProj    => "o_proj",
            Self::GateProj => "gate_proj",
            Self::UpProj   => "up_proj",
            Self::DownProj => "down_proj",
        }
    }

    /// Parent module in the checkpoint naming scheme.
    pub fn group(self) -> &'static str {
        match self {
            Self::QProj | Self::KProj | Self::VProj | Self::OProj => "self_attn",
            _ => "mlp",
        }
    }
}

impl fmt::Display for ProjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProjectionKind {
    type Err = FinetuneError;

    fn from_str(s: &str) -> DomainResult<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|k| k.name()).collect();
                FinetuneError::config(format!(
                    "unknown target module '{s}' (expected one of: {})",
                    valid.join(", ")
                ))
            })
    }
}

/// Resolve every target name up front so a bad name never leaves a
/// half-adapted model behind.
pub fn parse_targets(config: &AdapterConfig) -> DomainResult<BTreeSet<ProjectionKind>> {
    config.target_modules.iter().map(|name| name.parse()).collect()
}

// ─── Adapter module ───────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct LoraAdapter<B: Backend> {
    /// [in, r]
    pub lora_a:  Param<Tensor<B, 2>>,
    /// [r, out]
    pub lora_b:  Param<Tensor<B, 2>>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraAdapter<B> {
    pub fn init<R: Rng>(
        d_in:   usize,
        d_out:  usize,
        config: &AdapterConfig,
        rng:    &mut R,
        device: &B::Device,
    ) -> Self {
        let bound = 1.0 / (d_in as f32).sqrt();
        let a: Vec<f32> = (0..d_in * config.r).map(|_| rng.gen_range(-bound..bound)).collect();
        Self {
            lora_a:  Param::from_tensor(Tensor::from_data(TensorData::new(a, [d_in, config.r]), device)),
            lora_b:  Param::from_tensor(Tensor::zeros([config.r, d_out], device)),
            dropout: DropoutConfig::new(config.lora_dropout).init(),
            scaling: config.scaling(),
        }
    }

    pub fn rank(&self) -> usize {
        self.lora_a.dims()[1]
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.dropout
            .forward(x)
            .matmul(self.lora_a.val().unsqueeze())
            .matmul(self.lora_b.val().unsqueeze())
            .mul_scalar(self.scaling)
    }

    /// A·B·scale in burn's [in, out] layout.
    pub fn delta(&self) -> Tensor<B, 2> {
        self.lora_a.val().matmul(self.lora_b.val()).mul_scalar(self.scaling)
    }
}

/// A linear layer that may carry a LoRA adapter.
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    pub linear: Linear<B>,
    pub lora:   Option<LoraAdapter<B>>,
}

impl<B: Backend> Projection<B> {
    pub fn new(linear: Linear<B>) -> Self {
        Self { linear, lora: None }
    }

    /// (d_in, d_out)
    pub fn dims(&self) -> (usize, usize) {
        let [d_in, d_out] = self.linear.weight.dims();
        (d_in, d_out)
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match &self.lora {
            None => self.linear.forward(x),
            Some(adapter) => self.linear.forward(x.clone()) + adapter.forward(x),
        }
    }

    pub fn merge(self) -> Self {
        match self.lora {
            None => self,
            Some(adapter) => {
                let weight = self.linear.weight.val() + adapter.delta();
                Self {
                    linear: Linear { weight: Param::from_tensor(weight), bias: self.linear.bias },
                    lora:   None,
                }
            }
        }
    }
}

// ─── Injection ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamReport {
    pub trainable: usize,
    pub total:     usize,
}

impl ParamReport {
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.trainable as f64 / self.total as f64
    }
}

/// Whether a projection's bias stays trainable under `mode`.
pub fn bias_is_trainable(mode: BiasMode, adapted: bool) -> bool {
    match mode {
        BiasMode::None     => false,
        BiasMode::All      => true,
        BiasMode::LoraOnly => adapted,
    }
}

/// Freeze the base model and attach adapters to every targeted
/// projection of every layer. `seed` fixes the A initialisation.
pub fn inject<B: Backend>(
    model:  LlamaModel<B>,
    config: &AdapterConfig,
    seed:   u64,
    device: &B::Device,
) -> DomainResult<(LlamaModel<B>, ParamReport)> {
    config.validate()?;
    let targets = parse_targets(config)?;

    let mut rng   = StdRng::seed_from_u64(seed);
    let mut model = model.no_grad();

    for layer in model.layers.iter_mut() {
        for (kind, proj) in layer.projections_mut() {
            let adapted = targets.contains(&kind);
            if adapted {
                let (d_in, d_out) = proj.dims();
                proj.lora = Some(LoraAdapter::init(d_in, d_out, config, &mut rng, device));
            }
            if bias_is_trainable(config.bias, adapted) {
                if let Some(bias) = proj.linear.bias.take() {
                    proj.linear.bias = Some(Param::from_tensor(bias.val().require_grad()));
                }
            }
        }
    }

    let report = param_report(&model, config.bias);
    tracing::info!(
        "LoRA attached to {:?}: trainable params {} / {} ({:.4}%)",
        targets.iter().map(|k| k.name()).collect::<Vec<_>>(),
        report.trainable,
        report.total,
        report.trainable_percent(),
    );
    Ok((model, report))
}

pub fn param_report<B: Backend>(model: &LlamaModel<B>, bias: BiasMode) -> ParamReport {
    let trainable = model
        .projections()
        .map(|(_, _, proj)| {
            let adapter = proj.lora.as_ref().map_or(0, |a| a.num_params());
            let bias_params = match &proj.linear.bias {
                Some(b) if bias_is_trainable(bias, proj.lora.is_some()) => b.dims()[0],
                _ => 0,
            };
            adapter + bias_params
        })
        .sum();

    ParamReport { trainable, total: model.num_params() }
}
