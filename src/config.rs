use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use crate::error::{Result, VerbaError};

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_startup_timeout_secs() -> u64 {
    300
}

fn default_file_extension() -> String {
    "wav".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub translate: TranslateConfig,
    pub tts: TtsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Which model layout serves translation requests
    pub strategy: StrategyKind,
    /// Model server endpoint URL
    pub endpoint: String,
    /// Timeout for a single model server call (seconds); model loads can be slow
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum accepted input length, in characters
    pub max_text_length: usize,
    /// Tokenizer truncation length
    pub max_input_tokens: usize,
    /// Upper bound on generated sequence length
    pub max_length: usize,
    /// Beam width for beam search
    pub num_beams: usize,
    /// Stop once every beam has finished
    pub early_stopping: bool,
    /// Block repeated n-grams of this size in the output
    pub no_repeat_ngram_size: usize,
    /// Multilingual model used by the shared strategy
    pub shared_model: String,
    /// Pair strategy: "src-tgt" -> direction-specific model
    #[serde(default)]
    pub pairs: BTreeMap<String, String>,
    /// Shared strategy: language code -> script-qualified model tag
    #[serde(default)]
    pub language_tags: BTreeMap<String, String>,
    /// Human-readable language names for listings
    #[serde(default)]
    pub language_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Pair: one model artifact per ordered language pair
    Pair,
    /// Shared: one multilingual model, target selected by a forced first token
    Shared,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pair => write!(f, "pair"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = VerbaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pair" => Ok(Self::Pair),
            "shared" => Ok(Self::Shared),
            _ => Err(VerbaError::Config(format!(
                "Invalid translation strategy '{}'. Valid strategies: pair, shared",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Master switch for speech synthesis
    pub enabled: bool,
    /// Path to the Coqui speech server binary
    pub binary_path: String,
    /// Host the speech servers bind to
    pub host: String,
    /// First port handed out to a speech server; each language gets the next one
    pub base_port: u16,
    /// How long to wait for a freshly spawned speech server (seconds)
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Directory generated audio is written to
    pub audio_dir: String,
    /// Caller-facing prefix for generated audio references
    pub url_prefix: String,
    /// Language used when a request names none, and whose model is the fallback
    pub default_language: String,
    /// Extension of generated audio files
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    /// Language code -> speech model name
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            translate: TranslateConfig {
                strategy: StrategyKind::Shared,
                endpoint: "http://localhost:8765".to_string(),
                request_timeout_secs: 600,
                max_text_length: 5000,
                max_input_tokens: 512,
                max_length: 512,
                num_beams: 5,
                early_stopping: true,
                no_repeat_ngram_size: 3,
                shared_model: "facebook/nllb-200-distilled-600M".to_string(),
                pairs: table(&[
                    ("en-ko", "Helsinki-NLP/opus-mt-tc-big-en-ko"),
                    ("ko-en", "Helsinki-NLP/opus-mt-ko-en"),
                    ("en-ja", "Helsinki-NLP/opus-mt-en-jap"),
                    ("ja-en", "Helsinki-NLP/opus-mt-ja-en"),
                    ("en-zh", "Helsinki-NLP/opus-mt-en-zh"),
                    ("zh-en", "Helsinki-NLP/opus-mt-zh-en"),
                    ("en-es", "Helsinki-NLP/opus-mt-en-es"),
                    ("es-en", "Helsinki-NLP/opus-mt-es-en"),
                    ("en-fr", "Helsinki-NLP/opus-mt-en-fr"),
                    ("fr-en", "Helsinki-NLP/opus-mt-fr-en"),
                    ("en-de", "Helsinki-NLP/opus-mt-en-de"),
                    ("de-en", "Helsinki-NLP/opus-mt-de-en"),
                ]),
                language_tags: table(&[
                    ("en", "eng_Latn"),
                    ("ko", "kor_Hang"),
                    ("ja", "jpn_Jpan"),
                    ("zh", "zho_Hans"),
                    ("es", "spa_Latn"),
                    ("fr", "fra_Latn"),
                    ("de", "deu_Latn"),
                ]),
                language_names: table(&[
                    ("en", "English"),
                    ("ko", "Korean"),
                    ("ja", "Japanese"),
                    ("zh", "Chinese"),
                    ("es", "Spanish"),
                    ("fr", "French"),
                    ("de", "German"),
                ]),
            },
            tts: TtsConfig {
                enabled: true,
                binary_path: "tts-server".to_string(),
                host: "127.0.0.1".to_string(),
                base_port: 5002,
                startup_timeout_secs: 300,
                audio_dir: "static/audio".to_string(),
                url_prefix: "/static/audio".to_string(),
                default_language: "en".to_string(),
                file_extension: "wav".to_string(),
                models: table(&[
                    ("en", "tts_models/en/ljspeech/tacotron2-DDC"),
                    ("es", "tts_models/es/css10/vits"),
                    ("fr", "tts_models/fr/css10/vits"),
                    ("de", "tts_models/de/thorsten/tacotron2-DDC"),
                ]),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VerbaError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| VerbaError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VerbaError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| VerbaError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
