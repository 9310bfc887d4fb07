use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{Config, StrategyKind};
use crate::error::{Result, VerbaError};
use crate::translate::{TranslationEngine, TranslationOutcome};
use crate::tts::{Capability, SynthesisEngine, SynthesisOutcome};

fn default_source_lang() -> String {
    "en".to_string()
}

fn default_target_lang() -> String {
    "ko".to_string()
}

/// One translate(+speak) request, as read from batch input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// Also synthesize the translated text
    #[serde(default)]
    pub speak: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CombinedOutcome {
    pub original: String,
    pub source_lang: String,
    pub target_lang: String,
    pub translation: TranslationOutcome,
    /// Present only when synthesis was requested and translation succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub strategy: StrategyKind,
    pub synthesis: Capability,
    pub cached_translation_models: Vec<String>,
    pub cached_voices: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageListing {
    pub names: BTreeMap<String, String>,
    pub languages: Vec<String>,
    pub pairs: Vec<String>,
    pub tts_languages: Vec<String>,
}

pub struct Workflow {
    translator: TranslationEngine,
    synthesizer: SynthesisEngine,
    language_names: BTreeMap<String, String>,
}

impl Workflow {
    pub fn new(config: &Config) -> Result<Self> {
        let translator = TranslationEngine::from_config(&config.translate)?;
        let synthesizer = SynthesisEngine::from_config(&config.tts)?;
        Ok(Self::with_engines(
            translator,
            synthesizer,
            config.translate.language_names.clone(),
        ))
    }

    pub fn with_engines(
        translator: TranslationEngine,
        synthesizer: SynthesisEngine,
        language_names: BTreeMap<String, String>,
    ) -> Self {
        Self {
            translator,
            synthesizer,
            language_names,
        }
    }

    pub fn translator(&self) -> &TranslationEngine {
        &self.translator
    }

    pub fn synthesizer(&self) -> &SynthesisEngine {
        &self.synthesizer
    }

    /// Translate, then optionally speak the translation.
    ///
    /// A synthesis failure is reported next to the translation and never replaces it.
    pub async fn process(&self, request: &TranslationRequest) -> CombinedOutcome {
        let translation = self
            .translator
            .translate(&request.text, &request.source_lang, &request.target_lang)
            .await;

        let synthesis = match (request.speak, translation.translated_text()) {
            (true, Some(translated)) => Some(
                self.synthesizer
                    .synthesize(translated, &request.target_lang)
                    .await,
            ),
            _ => None,
        };

        CombinedOutcome {
            original: request.text.clone(),
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            translation,
            synthesis,
        }
    }

    pub async fn health(&self) -> HealthReport {
        let report = HealthReport {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            strategy: self.translator.strategy(),
            synthesis: self.synthesizer.capability().await,
            cached_translation_models: self
                .translator
                .cached_keys()
                .await
                .iter()
                .map(|key| key.to_string())
                .collect(),
            cached_voices: self
                .synthesizer
                .cached_voices()
                .await
                .iter()
                .map(|code| code.to_string())
                .collect(),
            checked_at: Utc::now(),
        };

        info!(
            "Health: strategy={}, synthesis={}, {} translation model(s), {} voice(s) resident",
            report.strategy,
            report.synthesis,
            report.cached_translation_models.len(),
            report.cached_voices.len()
        );
        report
    }

    pub fn languages(&self) -> LanguageListing {
        let registry = self.translator.registry();
        LanguageListing {
            names: self.language_names.clone(),
            languages: registry.languages().iter().map(|c| c.to_string()).collect(),
            pairs: registry.pairs().iter().map(|p| p.to_string()).collect(),
            tts_languages: self.synthesizer.languages().iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Run requests concurrently against one shared workflow; outcomes keep input order.
    pub async fn process_batch(self: &Arc<Self>, requests: Vec<TranslationRequest>) -> Vec<CombinedOutcome> {
        let total = requests.len();
        info!("Processing batch of {} request(s)", total);

        let mut tasks = JoinSet::new();
        for (index, request) in requests.iter().cloned().enumerate() {
            let workflow = Arc::clone(self);
            tasks.spawn(async move { (index, workflow.process(&request).await) });
        }

        let mut slots: Vec<Option<CombinedOutcome>> = (0..total).map(|_| None).collect();
        let mut aborted = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => {
                    warn!("Batch task failed: {}", e);
                    aborted.push(e.to_string());
                }
            }
        }

        // A task that panicked never reports its index; its slot stays empty
        let reason = aborted.join("; ");
        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| CombinedOutcome {
                    original: request.text,
                    source_lang: request.source_lang,
                    target_lang: request.target_lang,
                    translation: TranslationOutcome::failure(&VerbaError::Inference(format!(
                        "Request did not complete: {}",
                        reason
                    ))),
                    synthesis: None,
                })
            })
            .collect()
    }

    /// Release every resident translation model and voice
    pub async fn clear_models(&self) {
        self.translator.clear_models().await;
        self.synthesizer.clear_models().await;
    }
}

/// Parse JSON-lines batch input. Blank lines are skipped.
pub fn parse_requests(input: &str) -> Result<Vec<TranslationRequest>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line)
                .map_err(|e| VerbaError::Config(format!("Invalid request on line {}: {}", number + 1, e)))
        })
        .collect()
}

pub async fn read_requests<P: AsRef<Path>>(path: P) -> Result<Vec<TranslationRequest>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_requests(&content)
}
