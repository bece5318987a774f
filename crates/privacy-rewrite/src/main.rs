//! privacy-rewrite command-line interface

use anyhow::Result;
use clap::{Parser, Subcommand};
use privacy_rewrite_core::{Config, OllamaBackend, OllamaConfig, PrivacyLevel, PrivacyPipeline};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rewrite text so that no detected personal data survives
    Rewrite {
        #[arg(long, default_value = "professional", help = "Writing style for the rewritten text")]
        style: String,

        #[arg(long, default_value = "strict", help = "Privacy level (strict, moderate, minimal)")]
        privacy_level: PrivacyLevel,

        #[arg(long, help = "Read input from this file instead of stdin")]
        input: Option<PathBuf>,
    },
    /// Report privacy risks in text as JSON
    Scan {
        #[arg(long, help = "Read input from this file instead of stdin")]
        input: Option<PathBuf>,
    },
    /// Check that the configured LLM backend is reachable
    CheckBackend,
}

impl Command {
    pub fn input(&self) -> Option<&Path> {
        match self {
            Command::Rewrite { input, .. } | Command::Scan { input } => input.as_deref(),
            Command::CheckBackend => None,
        }
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            info!("Reading input from: {}", path.display());
            Ok(std::fs::read_to_string(path)?)
        }
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from: {}", config_path.display());
            Config::from_file(config_path)
        }
        None => match Config::get_default_config_path() {
            Ok(default_path) if default_path.exists() => {
                info!("Loading configuration from default location: {}", default_path.display());
                Config::from_file(&default_path)
            }
            Ok(default_path) => {
                info!("Creating default configuration at: {}", default_path.display());
                let config = Config::default();
                config.to_file(&default_path)?;
                Ok(config)
            }
            Err(_) => {
                info!("Using default configuration (could not determine config directory)");
                Ok(Config::default())
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<tracing::Level>()
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', defaulting to 'info'", args.log_level);
            tracing::Level::INFO
        });

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    info!("Configuration validated successfully");

    let backend = Arc::new(OllamaBackend::new(OllamaConfig::from(&config.llm))?);

    match &args.command {
        Command::CheckBackend => {
            let endpoint = &backend.config().endpoint;
            if backend.health_check().await? {
                println!("Backend at {} is reachable (model {})", endpoint, backend.config().model);
            } else {
                anyhow::bail!("Backend at {} is disabled or not healthy", endpoint);
            }
        }
        Command::Rewrite { style, privacy_level, .. } => {
            let content = read_input(args.command.input())?;
            let pipeline = PrivacyPipeline::new(&config, backend)?;
            let rewritten = pipeline.secure_rewrite(&content, style, *privacy_level).await?;
            println!("{}", rewritten);
        }
        Command::Scan { .. } => {
            let content = read_input(args.command.input())?;
            let pipeline = PrivacyPipeline::new(&config, backend)?;
            let report = pipeline.scan_for_privacy_issues(&content).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
