use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use imagetrain::backend::{self, TrainingBackend};
use imagetrain::config::RunConfig;
use imagetrain::dataset::loader;
use imagetrain::startup::RuntimeEnv;
use imagetrain::training;
use imagetrain::utils::{init_logging, LogConfig, LogLevel};

#[derive(Parser)]
#[command(name = "imagetrain", about = "Image classification training driver", version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only
    #[arg(long, global = true)]
    quiet: bool,

    /// Explicit log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn log_config(cli: &Cli) -> LogConfig {
    if cli.quiet {
        LogConfig::quiet()
    } else if cli.verbose {
        LogConfig::verbose()
    } else if let Some(level) = &cli.log_level {
        LogConfig {
            level: LogLevel::parse(level),
            ..LogConfig::default()
        }
    } else {
        LogConfig::default()
    }
}

#[derive(Subcommand)]
enum Command {
    /// Train a classifier from a YAML run configuration
    Train {
        /// Path to the run configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Root directory collecting per-run artifact directories
        #[arg(long, default_value = "checkpoints")]
        checkpoint_root: PathBuf,

        /// Override the configuration's GPU visibility, e.g. "0" or "1,2"
        #[arg(long)]
        cuda_visible_devices: Option<String>,
    },

    /// Print per-class sample counts for a class-per-directory tree
    Stats {
        /// Dataset root containing one subdirectory per class
        #[arg(short, long)]
        data: PathBuf,

        /// Comma-separated class list fixing label order
        #[arg(long, value_delimiter = ',')]
        classes: Vec<String>,
    },

    /// Print a default run configuration as YAML
    InitConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&log_config(&cli)).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Train {
            config,
            checkpoint_root,
            cuda_visible_devices,
        } => {
            let mut run_config = RunConfig::from_yaml_file(&config)
                .with_context(|| format!("loading run configuration from {:?}", config))?;
            if cuda_visible_devices.is_some() {
                run_config.cuda_visible_devices = cuda_visible_devices;
            }

            // must happen before any backend object exists
            RuntimeEnv::new(run_config.cuda_visible_devices.clone()).configure();
            let device = backend::default_device();
            println!("{} {}", "backend:".bold(), backend::backend_name());

            let outcome =
                training::train::<TrainingBackend>(&run_config, &checkpoint_root, &device)?;
            println!(
                "{} {} epochs, artifacts in {:?}",
                "done:".green().bold(),
                outcome.epochs_run,
                outcome.run_dir,
            );
        }

        Command::Stats { data, classes } => {
            let items = loader::scan_class_directories(&data, &classes)?;
            let counts = loader::class_counts(&items, classes.len());
            println!("{} {:?}", "dataset:".bold(), data);
            for (class, count) in classes.iter().zip(&counts) {
                println!("  {:<20} {}", class.cyan(), count);
            }
            println!("  {:<20} {}", "total".bold(), items.len());
        }

        Command::InitConfig => {
            print!("{}", serde_yaml::to_string(&RunConfig::default())?);
        }
    }

    Ok(())
}
