use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerbaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Text is empty")]
    EmptyText,

    #[error("Text is too long: {len} characters (maximum {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("Source and target language are the same: {0}")]
    SameLanguage(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Unsupported language pair: {source_lang} -> {target_lang}")]
    UnsupportedPair {
        source_lang: String,
        target_lang: String,
    },

    #[error("Invalid language code: '{0}'")]
    InvalidLanguageCode(String),

    #[error("Failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Translation failed: {0}")]
    Inference(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Speech synthesis is disabled in configuration (tts.enabled = false)")]
    SynthesisDisabled,

    #[error("Speech synthesis backend is unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("No speech model configured for language '{0}'")]
    NoVoiceModel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VerbaError>;

/// Coarse classification of a failed request, used by callers to pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected before any model was touched
    InputRejected,
    /// A model or backend could not be constructed or reached
    ResourceUnavailable,
    /// The model was available but inference itself failed
    InferenceFailure,
}

impl VerbaError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::EmptyText
            | Self::TextTooLong { .. }
            | Self::SameLanguage(_)
            | Self::UnsupportedLanguage(_)
            | Self::UnsupportedPair { .. }
            | Self::InvalidLanguageCode(_)
            | Self::NoVoiceModel(_) => FailureKind::InputRejected,
            Self::ModelLoad { .. }
            | Self::SynthesisDisabled
            | Self::SynthesisUnavailable(_)
            | Self::Http(_)
            | Self::Config(_) => FailureKind::ResourceUnavailable,
            Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_)
            | Self::Inference(_)
            | Self::Synthesis(_) => FailureKind::InferenceFailure,
        }
    }
}

/// Failure reason carried by request outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&VerbaError> for FailureReason {
    fn from(err: &VerbaError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<VerbaError> for FailureReason {
    fn from(err: VerbaError) -> Self {
        Self::from(&err)
    }
}
