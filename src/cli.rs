use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate text, optionally speaking the result
    Translate {
        /// Text to translate
        text: String,

        /// Source language code
        #[arg(short, long, default_value = "en")]
        source: String,

        /// Target language code
        #[arg(short, long, default_value = "ko")]
        target: String,

        /// Also synthesize speech for the translation
        #[arg(long)]
        speak: bool,

        /// Translation strategy (pair, shared); overrides the configuration
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Synthesize speech for text
    Speak {
        /// Text to speak
        text: String,

        /// Language code (empty uses the configured default)
        #[arg(short, long, default_value = "")]
        language: String,
    },

    /// List supported languages and pairs
    Languages {
        /// Translation strategy (pair, shared); overrides the configuration
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Report backend availability and resident models
    Health,

    /// Run JSON-lines requests concurrently
    Batch {
        /// Input file, one JSON request per line
        #[arg(short, long)]
        input: PathBuf,

        /// Translation strategy (pair, shared); overrides the configuration
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Write the default configuration
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "verba.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Manage synthesized audio files
    Audio {
        #[command(subcommand)]
        action: AudioAction,
    },
}

#[derive(Subcommand)]
pub enum AudioAction {
    /// List synthesized audio files
    List,

    /// Delete all synthesized audio files
    Clear,
}
