// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Three subcommands: `train`, `merge` and `show-config`.
//
// Every training flag is optional. An absent flag keeps the
// value from the TOML file (--config) or the built-in default,
// so the flags map onto ConfigOverrides rather than a config.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::{merge_use_case::MergeRequest, run_config::ConfigOverrides};
use crate::domain::config::Device;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune the base model with LoRA on an instruction dataset
    Train(TrainArgs),

    /// Fold a saved adapter into its base model and write the result
    Merge(MergeArgs),

    /// Print the resolved run configuration as TOML and exit
    ShowConfig(ShowConfigArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// TOML file with run settings; flags below override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Hub model id, or a local directory with config.json,
    /// tokenizer.json and safetensors weights
    #[arg(long, value_name = "NAME|DIR")]
    pub model: Option<String>,

    /// Hub revision (branch, tag or commit)
    #[arg(long)]
    pub revision: Option<String>,

    /// JSON-lines file of {"instruction", "response"} records
    #[arg(long, value_name = "PATH")]
    pub dataset: Option<PathBuf>,

    /// Where the final adapter is written
    #[arg(long, value_name = "DIR")]
    pub adapter_dir: Option<PathBuf>,

    /// Checkpoints, metrics.csv and run_config.toml go here
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub lr: Option<f64>,

    /// Adapter rank
    #[arg(long)]
    pub lora_r: Option<usize>,

    /// Adapter scale numerator (update is scaled by alpha / r)
    #[arg(long)]
    pub lora_alpha: Option<f64>,

    #[arg(long)]
    pub lora_dropout: Option<f64>,

    /// Comma-separated projection names, e.g. q_proj,k_proj,v_proj
    #[arg(long, value_delimiter = ',')]
    pub target_modules: Option<Vec<String>>,

    /// Half-precision training (gpu only)
    #[arg(long, overrides_with = "no_fp16")]
    pub fp16: bool,

    #[arg(long, overrides_with = "fp16")]
    pub no_fp16: bool,

    #[arg(long)]
    pub logging_steps: Option<usize>,

    #[arg(long)]
    pub save_steps: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Longer examples are truncated
    #[arg(long)]
    pub max_seq_len: Option<usize>,

    /// gpu (wgpu) or cpu (ndarray)
    #[arg(long)]
    pub device: Option<Device>,
}

impl TrainArgs {
    fn fp16(&self) -> Option<bool> {
        match (self.fp16, self.no_fp16) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// The boundary between Layer 1 and Layer 2: the application
/// layer never sees clap types.
impl From<&TrainArgs> for ConfigOverrides {
    fn from(a: &TrainArgs) -> Self {
        ConfigOverrides {
            model_name:     a.model.clone(),
            revision:       a.revision.clone(),
            dataset_path:   a.dataset.clone(),
            adapter_dir:    a.adapter_dir.clone(),
            output_dir:     a.output_dir.clone(),
            device:         a.device,
            batch_size:     a.batch_size,
            epochs:         a.epochs,
            learning_rate:  a.lr,
            lora_r:         a.lora_r,
            lora_alpha:     a.lora_alpha,
            lora_dropout:   a.lora_dropout,
            target_modules: a.target_modules.clone(),
            fp16:           a.fp16(),
            logging_steps:  a.logging_steps,
            save_steps:     a.save_steps,
            seed:           a.seed,
            max_seq_len:    a.max_seq_len,
        }
    }
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Adapter written by `train`
    #[arg(long, value_name = "DIR", default_value = "./adapter_model")]
    pub adapter_dir: PathBuf,

    /// Base model; defaults to the one recorded in adapter_config.json
    #[arg(long, value_name = "NAME|DIR")]
    pub model: Option<String>,

    #[arg(long, default_value = "main")]
    pub revision: String,

    /// Receives config.json, tokenizer.json and model.safetensors
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,
}

impl From<MergeArgs> for MergeRequest {
    fn from(a: MergeArgs) -> Self {
        MergeRequest {
            model:       a.model,
            revision:    a.revision,
            adapter_dir: a.adapter_dir,
            output_dir:  a.output_dir,
        }
    }
}

#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    /// TOML file to merge over the defaults
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
