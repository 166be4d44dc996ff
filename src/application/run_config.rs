// ============================================================
// Layer 2 — Run Configuration Resolution
// ============================================================
// Builds the one RunConfig a run uses, lowest precedence first:
//
//   1. built-in defaults       (RunConfig::default)
//   2. optional TOML file      (--config run.toml)
//   3. command-line overrides  (ConfigOverrides, None = keep)
//
// The result is validated once here; stages receive it by
// reference and never change it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::config::{Device, RunConfig};

/// Every setting the command line may override.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model_name:     Option<String>,
    pub revision:       Option<String>,
    pub dataset_path:   Option<PathBuf>,
    pub adapter_dir:    Option<PathBuf>,
    pub output_dir:     Option<PathBuf>,
    pub device:         Option<Device>,
    pub batch_size:     Option<usize>,
    pub epochs:         Option<usize>,
    pub learning_rate:  Option<f64>,
    pub lora_r:         Option<usize>,
    pub lora_alpha:     Option<f64>,
    pub lora_dropout:   Option<f64>,
    pub target_modules: Option<Vec<String>>,
    pub fp16:           Option<bool>,
    pub logging_steps:  Option<usize>,
    pub save_steps:     Option<usize>,
    pub seed:           Option<u64>,
    pub max_seq_len:    Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(self, cfg: &mut RunConfig) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }

        set(&mut cfg.model_name,   self.model_name);
        set(&mut cfg.revision,     self.revision);
        set(&mut cfg.dataset_path, self.dataset_path);
        set(&mut cfg.adapter_dir,  self.adapter_dir);
        set(&mut cfg.device,       self.device);

        let lora = &mut cfg.lora;
        set(&mut lora.r,              self.lora_r);
        set(&mut lora.lora_alpha,     self.lora_alpha);
        set(&mut lora.lora_dropout,   self.lora_dropout);
        set(&mut lora.target_modules, self.target_modules);

        let t = &mut cfg.training;
        set(&mut t.output_dir,                  self.output_dir);
        set(&mut t.per_device_train_batch_size, self.batch_size);
        set(&mut t.num_train_epochs,            self.epochs);
        set(&mut t.learning_rate,               self.learning_rate);
        set(&mut t.fp16,                        self.fp16);
        set(&mut t.logging_steps,               self.logging_steps);
        set(&mut t.save_steps,                  self.save_steps);
        set(&mut t.max_seq_len,                 self.max_seq_len);
        if self.seed.is_some() {
            t.seed = self.seed;
        }
    }
}

pub fn load_file(path: &Path) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
    Ok(RunConfig::from_toml_str(&text, &path.display().to_string())?)
}

pub fn resolve(file: Option<&Path>, overrides: ConfigOverrides) -> Result<RunConfig> {
    let mut cfg = match file {
        Some(path) => {
            tracing::info!("Reading run configuration from '{}'", path.display());
            load_file(path)?
        }
        None => RunConfig::default(),
    };
    overrides.apply(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::FinetuneError;

    #[test]
    fn test_flags_beat_file_beats_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"
            dataset_path = "file.jsonl"

            [lora]
            r = 8

            [training]
            num_train_epochs = 5
            learning_rate = 1e-4
        "#).unwrap();

        let overrides = ConfigOverrides {
            epochs: Some(1),
            device: Some(Device::Cpu),
            ..ConfigOverrides::default()
        };
        let cfg = resolve(Some(file.path()), overrides).unwrap();

        assert_eq!(cfg.training.num_train_epochs, 1);        // flag
        assert_eq!(cfg.device, Device::Cpu);                 // flag
        assert_eq!(cfg.lora.r, 8);                           // file
        assert_eq!(cfg.training.learning_rate, 1e-4);        // file
        assert_eq!(cfg.dataset_path, PathBuf::from("file.jsonl"));
        assert_eq!(cfg.training.per_device_train_batch_size, 2); // default
    }

    #[test]
    fn test_no_file_no_flags_is_default() {
        assert_eq!(resolve(None, ConfigOverrides::default()).unwrap(), RunConfig::default());
    }

    #[test]
    fn test_resolved_config_is_validated() {
        let overrides = ConfigOverrides { lora_r: Some(0), ..ConfigOverrides::default() };
        let err = resolve(None, overrides).unwrap_err();
        assert!(matches!(err.downcast_ref::<FinetuneError>(), Some(FinetuneError::Configuration(_))));
    }

    #[test]
    fn test_seed_flag_beyond_toml_range_is_rejected() {
        let overrides = ConfigOverrides { seed: Some(u64::MAX), ..ConfigOverrides::default() };
        let err = resolve(None, overrides).unwrap_err();
        assert!(matches!(err.downcast_ref::<FinetuneError>(), Some(FinetuneError::Configuration(_))));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(resolve(Some(Path::new("/nonexistent/run.toml")), ConfigOverrides::default()).is_err());
    }
}
