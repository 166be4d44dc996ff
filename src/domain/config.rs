// ============================================================
// Layer 3 — Run Configuration
// ============================================================
// The fixed, reviewable set of parameters for one fine-tuning
// run. It is built once at startup (defaults, then an optional
// TOML file, then CLI flags) and handed to each stage by
// reference. Nothing mutates it afterwards.
//
//   RunConfig
//     ├── model / dataset / output paths, device
//     ├── lora:     AdapterConfig   (rank, alpha, targets, ...)
//     └── training: TrainingConfig  (batch, epochs, lr, cadence)
//
// AdapterConfig uses the PEFT field names so it can be written
// straight into adapter_config.json next to the weights.

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

use crate::domain::error::{FinetuneError, Result};

pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.2-3B";

// ─── Adapter ──────────────────────────────────────────────────────────────────

/// Which bias vectors are trained alongside the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    #[default]
    None,
    All,
    LoraOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskType {
    #[default]
    #[serde(rename = "CAUSAL_LM")]
    CausalLm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Rank of the A·B update
    pub r:              usize,
    /// Update is scaled by lora_alpha / r
    pub lora_alpha:     f64,
    /// Projection names that receive an adapter, e.g. "q_proj"
    pub target_modules: Vec<String>,
    pub lora_dropout:   f64,
    pub bias:           BiasMode,
    pub task_type:      TaskType,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            r:              16,
            lora_alpha:     32.0,
            target_modules: vec!["q_proj".to_string(), "v_proj".to_string()],
            lora_dropout:   0.05,
            bias:           BiasMode::None,
            task_type:      TaskType::CausalLm,
        }
    }
}

impl AdapterConfig {
    pub fn scaling(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }

    /// Checks that only need the config itself. Whether the target
    /// names exist is decided against the model at injection time.
    pub fn validate(&self) -> Result<()> {
        if self.r == 0 {
            return Err(FinetuneError::config("lora rank `r` must be at least 1"));
        }
        if !self.lora_alpha.is_finite() || self.lora_alpha <= 0.0 {
            return Err(FinetuneError::config(format!(
                "lora_alpha must be a positive number, got {}", self.lora_alpha
            )));
        }
        if !(0.0..1.0).contains(&self.lora_dropout) {
            return Err(FinetuneError::config(format!(
                "lora_dropout must be in [0, 1), got {}", self.lora_dropout
            )));
        }
        if self.target_modules.is_empty() {
            return Err(FinetuneError::config("target_modules must name at least one layer"));
        }
        Ok(())
    }
}

// ─── Training ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Checkpoints, metrics and the resolved config go here
    pub output_dir:                  PathBuf,
    pub per_device_train_batch_size: usize,
    pub num_train_epochs:            usize,
    pub learning_rate:               f64,
    /// Mixed precision as requested by the reference run. burn has
    /// no f32 master weights, so training stays in f32 either way.
    pub fp16:                        bool,
    pub logging_steps:               usize,
    pub save_steps:                  usize,
    /// None draws a fresh seed per run (and logs it).
    /// At most MAX_SEED: TOML integers are i64.
    pub seed:                        Option<u64>,
    /// Examples longer than this are truncated
    pub max_seq_len:                 usize,
    pub max_grad_norm:               f32,
    pub weight_decay:                f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir:                  PathBuf::from("./results"),
            per_device_train_batch_size: 2,
            num_train_epochs:            3,
            learning_rate:               2e-4,
            fp16:                        true,
            logging_steps:               10,
            save_steps:                  500,
            seed:                        None,
            max_seq_len:                 1024,
            max_grad_norm:               1.0,
            weight_decay:                0.0,
        }
    }
}

impl TrainingConfig {
    pub const MAX_SEED: u64 = i64::MAX as u64;

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("per_device_train_batch_size", self.per_device_train_batch_size),
            ("num_train_epochs",            self.num_train_epochs),
            ("logging_steps",               self.logging_steps),
            ("save_steps",                  self.save_steps),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FinetuneError::config(format!("{name} must be at least 1")));
            }
        }
        if self.max_seq_len < 2 {
            return Err(FinetuneError::config("max_seq_len must be at least 2"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 || self.learning_rate > 1.0 {
            return Err(FinetuneError::config(format!(
                "learning_rate must be in (0, 1], got {}", self.learning_rate
            )));
        }
        if let Some(seed) = self.seed.filter(|&s| s > Self::MAX_SEED) {
            return Err(FinetuneError::config(format!(
                "seed {seed} is too large; the maximum is {}", Self::MAX_SEED
            )));
        }
        if self.max_grad_norm <= 0.0 || self.weight_decay < 0.0 {
            return Err(FinetuneError::config(
                "max_grad_norm must be positive and weight_decay non-negative",
            ));
        }
        Ok(())
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// WGPU (Vulkan / Metal / DX12)
    #[default]
    Gpu,
    /// ndarray on the host CPU
    Cpu,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" | "wgpu" => Ok(Self::Gpu),
            "cpu" | "ndarray" => Ok(Self::Cpu),
            other => Err(format!("unknown device '{other}' (expected gpu or cpu)")),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

// ─── Run ──────────────────────────────────────────────────────────────────────

// Scalar fields must stay above the two tables: TOML emits
// plain values before sub-tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hub repository id, or a local directory with the same files
    pub model_name:          String,
    pub revision:            String,
    pub dataset_path:        PathBuf,
    /// Final adapter destination
    pub adapter_dir:         PathBuf,
    pub device:              Device,
    /// Records per tokenizer encode_batch call
    pub tokenize_batch_size: usize,
    pub lora:                AdapterConfig,
    pub training:            TrainingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_name:          DEFAULT_MODEL.to_string(),
            revision:            "main".to_string(),
            dataset_path:        PathBuf::from("dataset.jsonl"),
            adapter_dir:         PathBuf::from("./adapter_model"),
            device:              Device::Gpu,
            tokenize_batch_size: 1000,
            lora:                AdapterConfig::default(),
            training:            TrainingConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parse a (possibly partial) TOML document on top of the defaults.
    pub fn from_toml_str(text: &str, location: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| FinetuneError::format(location, e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FinetuneError::config(format!("cannot render config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(FinetuneError::config("model_name is empty"));
        }
        if self.tokenize_batch_size == 0 {
            return Err(FinetuneError::config("tokenize_batch_size must be at least 1"));
        }
        self.lora.validate()?;
        self.training.validate()
    }
}
