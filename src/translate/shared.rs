use tracing::debug;

use crate::config::{StrategyKind, TranslateConfig};
use crate::error::{Result, VerbaError};
use crate::language::{LanguagePair, LanguageRegistry, TagTable};
use super::{TranslationPlan, TranslationStrategy, common::ModelKey};

/// Shared strategy: one multilingual model serves every direction.
///
/// The direction is expressed only at runtime: the source tag configures the
/// tokenizer and the target tag becomes a forced first output token.
pub struct SharedStrategy {
    model: String,
    table: TagTable,
}

impl SharedStrategy {
    pub fn new<S: Into<String>>(model: S, table: TagTable) -> Self {
        Self {
            model: model.into(),
            table,
        }
    }

    pub fn from_config(config: &TranslateConfig) -> Result<Self> {
        if config.shared_model.trim().is_empty() {
            return Err(VerbaError::Config("translate.shared_model is empty".to_string()));
        }
        Ok(Self::new(
            config.shared_model.clone(),
            TagTable::from_config(&config.language_tags)?,
        ))
    }
}

impl TranslationStrategy for SharedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Shared
    }

    fn registry(&self) -> &dyn LanguageRegistry {
        &self.table
    }

    fn plan(&self, pair: &LanguagePair) -> Result<TranslationPlan> {
        // A same-language request would only round-trip through the model
        if pair.source == pair.target {
            return Err(VerbaError::SameLanguage(pair.source.to_string()));
        }

        let source_tag = self
            .table
            .resolve(&pair.source)
            .ok_or_else(|| VerbaError::UnsupportedLanguage(pair.source.to_string()))?;
        let target_tag = self
            .table
            .resolve(&pair.target)
            .ok_or_else(|| VerbaError::UnsupportedLanguage(pair.target.to_string()))?;

        debug!("Pair {} mapped to {} -> {} on {}", pair, source_tag, target_tag, self.model);

        Ok(TranslationPlan {
            key: ModelKey::Shared,
            model: self.model.clone(),
            source_tag: Some(source_tag),
            forced_target: Some(target_tag),
        })
    }
}
