//! Verba - lazy-loading translation and speech synthesis
//!
//! Command-line entry point. Every request goes through the library's
//! `Workflow`, and outcomes are printed as JSON.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use verba::cli::{Args, AudioAction, Commands};
use verba::config::{Config, StrategyKind};
use verba::error::VerbaError;
use verba::tts::SynthesisEngine;
use verba::workflow::{self, TranslationRequest, Workflow};

const DEFAULT_CONFIG_FILE: &str = "verba.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Translate { text, source, target, speak, strategy } => {
            apply_strategy(&mut config, strategy.as_deref())?;
            let workflow = Workflow::new(&config)?;

            let request = TranslationRequest {
                text,
                source_lang: source,
                target_lang: target,
                speak,
            };
            print_json(&workflow.process(&request).await)?;
        }
        Commands::Speak { text, language } => {
            let synthesizer = SynthesisEngine::from_config(&config.tts)?;
            print_json(&synthesizer.synthesize(&text, &language).await)?;
        }
        Commands::Languages { strategy } => {
            apply_strategy(&mut config, strategy.as_deref())?;
            let workflow = Workflow::new(&config)?;
            print_json(&workflow.languages())?;
        }
        Commands::Health => {
            let workflow = Workflow::new(&config)?;
            print_json(&workflow.health().await)?;
        }
        Commands::Batch { input, strategy } => {
            apply_strategy(&mut config, strategy.as_deref())?;
            info!("Reading requests from {}", input.display());
            let requests = workflow::read_requests(&input).await?;

            let workflow = Arc::new(Workflow::new(&config)?);
            for outcome in workflow.process_batch(requests).await {
                println!("{}", serde_json::to_string(&outcome)?);
            }
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(VerbaError::Config(format!(
                    "{} already exists; use --force to overwrite",
                    output.display()
                ))
                .into());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Audio { action } => {
            let synthesizer = SynthesisEngine::from_config(&config.tts)?;

            match action {
                AudioAction::List => {
                    let files = synthesizer.list_audio()?;
                    if files.is_empty() {
                        println!("No audio files in {}", synthesizer.audio_dir().display());
                    } else {
                        println!("\nAudio Files ({}):", synthesizer.audio_dir().display());
                        println!("{:<40} {:<12} {:<20}", "File", "Size", "Modified");
                        println!("{}", "-".repeat(72));

                        for file in &files {
                            let modified = file
                                .modified
                                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                                .unwrap_or_else(|| "-".to_string());
                            println!("{:<40} {:<12} {:<20}", file.file_name, format_size(file.size), modified);
                        }

                        let total: u64 = files.iter().map(|f| f.size).sum();
                        println!("\n{} file(s), {}", files.len(), format_size(total));
                    }
                }
                AudioAction::Clear => {
                    let removed = synthesizer.clear_audio()?;
                    println!("Removed {} audio file(s)", removed);
                }
            }
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".verba").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "verba.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so stdout stays valid JSON
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("verba.log").display());

    Ok(())
}

/// Override the configured strategy from the command line
fn apply_strategy(config: &mut Config, strategy: Option<&str>) -> Result<()> {
    if let Some(strategy) = strategy {
        config.translate.strategy = parse_strategy(strategy)?;
    }
    Ok(())
}

/// Parse translation strategy from string
fn parse_strategy(strategy: &str) -> Result<StrategyKind> {
    Ok(strategy.parse::<StrategyKind>()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format a byte count as a human readable string
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
    }
}
