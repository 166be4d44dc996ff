// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands off to Layer 2.
//
//   `train`       — fine-tune and save the adapter
//   `merge`       — fold an adapter into the base weights
//   `show-config` — print the configuration a run would use

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, MergeArgs, ShowConfigArgs, TrainArgs};

use crate::application::run_config::{self, ConfigOverrides};

#[derive(Parser, Debug)]
#[command(
    name = "llama-lora-tune",
    version,
    about = "Fine-tune a Llama model with LoRA adapters on instruction/response pairs."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Routes only; never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)      => run_train(args),
            Commands::Merge(args)      => run_merge(args),
            Commands::ShowConfig(args) => run_show_config(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let config = run_config::resolve(args.config.as_deref(), ConfigOverrides::from(&args))?;
    tracing::info!(
        "Fine-tuning '{}' on '{}' (device {})",
        config.model_name,
        config.dataset_path.display(),
        config.device,
    );

    let summary = TrainUseCase::new(config).execute()?;

    println!(
        "Training complete: {} examples, {} steps, mean loss {:.4}",
        summary.examples, summary.global_steps, summary.train_loss,
    );
    println!(
        "Trainable params: {} of {} ({:.4}%), seed {}",
        summary.trainable_params,
        summary.total_params,
        100.0 * summary.trainable_params as f64 / summary.total_params.max(1) as f64,
        summary.seed,
    );
    println!("Adapter saved to '{}'", summary.adapter_dir.display());
    Ok(())
}

fn run_merge(args: MergeArgs) -> Result<()> {
    use crate::application::merge_use_case::MergeUseCase;

    let summary = MergeUseCase::new(args.into()).execute()?;
    println!(
        "Merged {} projection(s) into '{}'; {} tensors written to '{}'",
        summary.merged_projections,
        summary.base_model,
        summary.tensors,
        summary.output_dir.display(),
    );
    Ok(())
}

fn run_show_config(args: ShowConfigArgs) -> Result<()> {
    let config = run_config::resolve(args.config.as_deref(), ConfigOverrides::default())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::Device;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_train_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "llama-lora-tune", "train",
            "--model", "./tiny",
            "--epochs", "1",
            "--target-modules", "q_proj,k_proj,v_proj",
            "--no-fp16",
            "--device", "cpu",
        ])
        .unwrap();

        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let o = ConfigOverrides::from(&args);
        assert_eq!(o.model_name.as_deref(), Some("./tiny"));
        assert_eq!(o.epochs, Some(1));
        assert_eq!(o.target_modules, Some(vec!["q_proj".into(), "k_proj".into(), "v_proj".into()]));
        assert_eq!(o.fp16, Some(false));
        assert_eq!(o.device, Some(Device::Cpu));
        assert_eq!(o.batch_size, None);
    }

    #[test]
    fn test_merge_requires_output_dir() {
        assert!(Cli::try_parse_from(["llama-lora-tune", "merge"]).is_err());

        let cli = Cli::try_parse_from(["llama-lora-tune", "merge", "--output-dir", "./merged"]).unwrap();
        let Commands::Merge(args) = cli.command else { panic!("expected merge") };
        let req = crate::application::merge_use_case::MergeRequest::from(args);
        assert_eq!(req.adapter_dir, std::path::PathBuf::from("./adapter_model"));
        assert_eq!(req.model, None);
        assert_eq!(req.revision, "main");
    }

    #[test]
    fn test_fp16_flag_absent_keeps_config_value() {
        let cli = Cli::try_parse_from(["llama-lora-tune", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(ConfigOverrides::from(&args).fp16, None);
    }
}
