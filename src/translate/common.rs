use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::TranslateConfig;
use crate::error::Result;
use crate::language::{BackendLanguageTag, LanguagePair};

/// Cache key for a resident translation model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelKey {
    /// Direction-bound model for one ordered pair
    Pair(LanguagePair),
    /// The single multilingual model serving every direction
    Shared,
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair(pair) => write!(f, "{}", pair),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// Deterministic beam-search settings sent with every generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_length: usize,
    pub num_beams: usize,
    pub early_stopping: bool,
    pub no_repeat_ngram_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_bos_token_id: Option<u32>,
}

impl GenerationParams {
    pub fn from_config(config: &TranslateConfig) -> Self {
        Self {
            max_length: config.max_length,
            num_beams: config.num_beams,
            early_stopping: config.early_stopping,
            no_repeat_ngram_size: config.no_repeat_ngram_size,
            forced_bos_token_id: None,
        }
    }

    pub fn with_constraint(&self, constraint: DecoderConstraint) -> Self {
        let mut params = self.clone();
        params.forced_bos_token_id = match constraint {
            DecoderConstraint::ForcedBos(id) => Some(id),
            DecoderConstraint::Unconstrained => None,
        };
        params
    }
}

/// Target-language steering applied at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderConstraint {
    /// First generated token is pinned to this id
    ForcedBos(u32),
    /// Model picks its own first token
    Unconstrained,
}

/// Tokenizer half of a loaded model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Seq2SeqTokenizer: Send + Sync {
    /// Encode `text`, tagging it with the source language where the model needs one.
    async fn encode(&self, text: &str, source_tag: Option<String>, max_length: usize) -> Result<Vec<u32>>;

    /// Decode generated ids, dropping special and control tokens.
    async fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Language id table lookup. Only some model generations expose one.
    fn lang_id(&self, tag: &str) -> Option<u32>;

    /// Raw vocabulary lookup of a token string.
    async fn token_to_id(&self, token: &str) -> Result<Option<u32>>;
}

/// Generator half of a loaded model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Seq2SeqModel: Send + Sync {
    async fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>>;
}

/// A resident model and its tokenizer.
pub struct ModelHandle {
    pub name: String,
    pub tokenizer: Box<dyn Seq2SeqTokenizer>,
    pub model: Box<dyn Seq2SeqModel>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("name", &self.name).finish()
    }
}

/// Builds model handles. Called by the model cache at most once per key.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, model: &str) -> Result<ModelHandle>;
}

/// Find the forced first token for `tag`.
///
/// Tries the language id table, then a raw token lookup. When neither knows the
/// tag, decoding runs unconstrained; that is logged, not returned as an error.
pub async fn resolve_decoder_constraint(
    tokenizer: &dyn Seq2SeqTokenizer,
    tag: &BackendLanguageTag,
    model: &str,
) -> DecoderConstraint {
    if let Some(id) = tokenizer.lang_id(tag.as_str()) {
        debug!("Forced BOS for {} via language id table: {}", tag, id);
        return DecoderConstraint::ForcedBos(id);
    }

    match tokenizer.token_to_id(tag.as_str()).await {
        Ok(Some(id)) => {
            debug!("Forced BOS for {} via token lookup: {}", tag, id);
            return DecoderConstraint::ForcedBos(id);
        }
        Ok(None) => {}
        Err(e) => debug!("Token lookup for {} failed: {}", tag, e),
    }

    warn!(
        "No forced BOS token for target tag {} on model {}; generating unconstrained",
        tag, model
    );
    DecoderConstraint::Unconstrained
}
