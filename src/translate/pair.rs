use tracing::debug;

use crate::config::{StrategyKind, TranslateConfig};
use crate::error::{Result, VerbaError};
use crate::language::{LanguagePair, LanguageRegistry, PairRegistry};
use super::{TranslationPlan, TranslationStrategy, common::ModelKey};

/// Pair strategy: every supported direction has its own model artifact.
///
/// The model is bound to one direction, so no source context or forced target
/// token is needed at decode time.
pub struct PairStrategy {
    registry: PairRegistry,
}

impl PairStrategy {
    pub fn new(registry: PairRegistry) -> Self {
        Self { registry }
    }

    pub fn from_config(config: &TranslateConfig) -> Result<Self> {
        Ok(Self::new(PairRegistry::from_config(&config.pairs)?))
    }
}

impl TranslationStrategy for PairStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pair
    }

    fn registry(&self) -> &dyn LanguageRegistry {
        &self.registry
    }

    fn plan(&self, pair: &LanguagePair) -> Result<TranslationPlan> {
        if pair.source == pair.target {
            return Err(VerbaError::SameLanguage(pair.source.to_string()));
        }

        let resolved = self.registry.resolve_pair(pair).ok_or_else(|| VerbaError::UnsupportedPair {
            source_lang: pair.source.to_string(),
            target_lang: pair.target.to_string(),
        })?;

        let model = resolved.model.ok_or_else(|| {
            VerbaError::Config(format!("No model bound to language pair {}", pair))
        })?;

        debug!("Pair {} served by {}", pair, model);

        Ok(TranslationPlan {
            key: ModelKey::Pair(pair.clone()),
            model,
            source_tag: None,
            forced_target: None,
        })
    }
}
