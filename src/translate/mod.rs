// Translation engine
//
// The engine is written against the TranslationStrategy trait; two strategies exist:
// - Pair: one direction-specific model per supported language pair
// - Shared: one multilingual model, target chosen by a forced first token
//
// Both feed the same pipeline: validate -> plan -> cached model -> encode ->
// constrained generation -> decode. Every failure along the way is folded
// into a TranslationOutcome; `translate` never returns an error.

pub mod common;
pub mod pair;
pub mod shared;
pub mod remote;

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use common::*;
use crate::cache::ModelCache;
use crate::config::{StrategyKind, TranslateConfig};
use crate::error::{FailureReason, Result, VerbaError};
use crate::language::{BackendLanguageTag, LanguageCode, LanguagePair, LanguageRegistry};

/// What a strategy decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPlan {
    /// Cache key of the model serving the request
    pub key: ModelKey,
    /// Model to load if the key is not resident yet
    pub model: String,
    /// Source language context for the tokenizer
    pub source_tag: Option<BackendLanguageTag>,
    /// Tag to force as the first output token
    pub forced_target: Option<BackendLanguageTag>,
}

/// Maps a language pair onto a model and its decoding setup
pub trait TranslationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn registry(&self) -> &dyn LanguageRegistry;

    /// Validate the pair and plan the request. Must not touch any model.
    fn plan(&self, pair: &LanguagePair) -> Result<TranslationPlan>;
}

/// Factory for creating strategies
pub struct StrategyFactory;

impl StrategyFactory {
    pub fn create_strategy(config: &TranslateConfig) -> Result<Box<dyn TranslationStrategy>> {
        match config.strategy {
            StrategyKind::Pair => Ok(Box::new(pair::PairStrategy::from_config(config)?)),
            StrategyKind::Shared => Ok(Box::new(shared::SharedStrategy::from_config(config)?)),
        }
    }
}

/// Result of one translation request.
///
/// `translated_text` is set exactly when `success` is true, `error` exactly when it is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationOutcome {
    success: bool,
    translated_text: Option<String>,
    error: Option<FailureReason>,
}

impl TranslationOutcome {
    pub fn success(translated_text: String) -> Self {
        Self {
            success: true,
            translated_text: Some(translated_text),
            error: None,
        }
    }

    pub fn failure(error: &VerbaError) -> Self {
        Self {
            success: false,
            translated_text: None,
            error: Some(FailureReason::from(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn translated_text(&self) -> Option<&str> {
        self.translated_text.as_deref()
    }

    pub fn error(&self) -> Option<&FailureReason> {
        self.error.as_ref()
    }
}

impl From<Result<String>> for TranslationOutcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) => Self::success(text),
            Err(e) => Self::failure(&e),
        }
    }
}

pub struct TranslationEngine {
    strategy: Box<dyn TranslationStrategy>,
    loader: Arc<dyn ModelLoader>,
    cache: ModelCache<ModelKey, ModelHandle>,
    params: GenerationParams,
    max_text_length: usize,
    max_input_tokens: usize,
}

impl TranslationEngine {
    pub fn new(
        strategy: Box<dyn TranslationStrategy>,
        loader: Arc<dyn ModelLoader>,
        config: &TranslateConfig,
    ) -> Self {
        Self {
            strategy,
            loader,
            cache: ModelCache::new(),
            params: GenerationParams::from_config(config),
            max_text_length: config.max_text_length,
            max_input_tokens: config.max_input_tokens,
        }
    }

    /// Build the engine with the configured strategy and the model server backend
    pub fn from_config(config: &TranslateConfig) -> Result<Self> {
        let strategy = StrategyFactory::create_strategy(config)?;
        let loader = remote::RemoteModelLoader::from_config(config)?;
        Ok(Self::new(strategy, Arc::new(loader), config))
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn registry(&self) -> &dyn LanguageRegistry {
        self.strategy.registry()
    }

    /// Translate `text`. Always returns an outcome; failures are reported inside it.
    pub async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> TranslationOutcome {
        let outcome = TranslationOutcome::from(self.try_translate(text, source_lang, target_lang).await);

        match outcome.error() {
            None => info!("Translated {} -> {}", source_lang, target_lang),
            Some(reason) => warn!("Translation {} -> {} failed: {}", source_lang, target_lang, reason.message),
        }

        outcome
    }

    /// Reject bad input and plan the request without touching any model.
    pub fn validate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<TranslationPlan> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VerbaError::EmptyText);
        }

        let len = text.chars().count();
        if len > self.max_text_length {
            return Err(VerbaError::TextTooLong {
                len,
                max: self.max_text_length,
            });
        }

        let pair = LanguagePair::new(LanguageCode::parse(source_lang)?, LanguageCode::parse(target_lang)?);
        self.strategy.plan(&pair)
    }

    async fn try_translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let plan = self.validate(text, source_lang, target_lang)?;

        let handle = self
            .cache
            .get_or_create(plan.key.clone(), || {
                let loader = self.loader.clone();
                let model = plan.model.clone();
                async move { loader.load(&model).await }
            })
            .await?;

        let source_tag = plan.source_tag.as_ref().map(|tag| tag.as_str().to_string());
        let input_ids = handle
            .tokenizer
            .encode(text.trim(), source_tag, self.max_input_tokens)
            .await?;

        let constraint = match &plan.forced_target {
            Some(tag) => resolve_decoder_constraint(handle.tokenizer.as_ref(), tag, &handle.name).await,
            None => DecoderConstraint::Unconstrained,
        };
        let params = self.params.with_constraint(constraint);
        debug!("Generating with {:?} on {}", params, handle.name);

        let output_ids = handle.model.generate(&input_ids, &params).await?;
        let decoded = handle.tokenizer.decode(&output_ids).await?;

        let translated = decoded.trim();
        if translated.is_empty() {
            return Err(VerbaError::Inference(format!(
                "Model {} produced an empty translation",
                handle.name
            )));
        }

        Ok(translated.to_string())
    }

    /// Keys of the models currently resident
    pub async fn cached_keys(&self) -> BTreeSet<ModelKey> {
        self.cache.list_keys().await
    }

    /// Release every resident model
    pub async fn clear_models(&self) {
        self.cache.clear().await;
        info!("Translation model cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::config::Config;
    use crate::error::FailureKind;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Encodes text as chars and "translates" by looking the input up in a phrase table.
    struct FakeTokenizer {
        lang_ids: HashMap<String, u32>,
        vocab: HashMap<String, u32>,
        sources: Arc<Mutex<Vec<Option<String>>>>,
    }

    #[async_trait]
    impl Seq2SeqTokenizer for FakeTokenizer {
        async fn encode(&self, text: &str, source_tag: Option<String>, _max_length: usize) -> Result<Vec<u32>> {
            self.sources.lock().unwrap().push(source_tag);
            Ok(text.chars().map(u32::from).collect())
        }

        async fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids.iter().filter_map(|&id| char::from_u32(id)).collect())
        }

        fn lang_id(&self, tag: &str) -> Option<u32> {
            self.lang_ids.get(tag).copied()
        }

        async fn token_to_id(&self, token: &str) -> Result<Option<u32>> {
            Ok(self.vocab.get(token).copied())
        }
    }

    struct FakeModel {
        phrases: HashMap<String, String>,
        fail: bool,
        seen: Arc<Mutex<Vec<GenerationParams>>>,
    }

    #[async_trait]
    impl Seq2SeqModel for FakeModel {
        async fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
            self.seen.lock().unwrap().push(params.clone());
            if self.fail {
                return Err(VerbaError::Inference("CUDA out of memory".to_string()));
            }
            let input: String = input_ids.iter().filter_map(|&id| char::from_u32(id)).collect();
            let output = self
                .phrases
                .get(&input)
                .cloned()
                .unwrap_or_else(|| format!(" {} ", input.to_uppercase()));
            Ok(output.chars().map(u32::from).collect())
        }
    }

    #[derive(Default)]
    struct FakeLoader {
        calls: AtomicUsize,
        fail_loads: AtomicUsize,
        fail_generation: bool,
        load_delay: Option<Duration>,
        lang_ids: HashMap<String, u32>,
        vocab: HashMap<String, u32>,
        sources: Arc<Mutex<Vec<Option<String>>>>,
        seen: Arc<Mutex<Vec<GenerationParams>>>,
    }

    #[async_trait]
    impl ModelLoader for FakeLoader {
        async fn load(&self, model: &str) -> Result<ModelHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.load_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_loads.load(Ordering::SeqCst) > 0 {
                self.fail_loads.fetch_sub(1, Ordering::SeqCst);
                return Err(VerbaError::ModelLoad {
                    model: model.to_string(),
                    reason: "connection refused".to_string(),
                });
            }

            let mut phrases = HashMap::new();
            phrases.insert("Hello, how are you?".to_string(), "  안녕하세요, 어떻게 지내세요?\n".to_string());

            Ok(ModelHandle {
                name: model.to_string(),
                tokenizer: Box::new(FakeTokenizer {
                    lang_ids: self.lang_ids.clone(),
                    vocab: self.vocab.clone(),
                    sources: self.sources.clone(),
                }),
                model: Box::new(FakeModel {
                    phrases,
                    fail: self.fail_generation,
                    seen: self.seen.clone(),
                }),
            })
        }
    }

    fn engine_with(strategy: StrategyKind, loader: Arc<FakeLoader>) -> TranslationEngine {
        let mut config = Config::default().translate;
        config.strategy = strategy;
        config.max_text_length = 20;
        let strategy = StrategyFactory::create_strategy(&config).unwrap();
        TranslationEngine::new(strategy, loader, &config)
    }

    fn kind_of(outcome: &TranslationOutcome) -> FailureKind {
        outcome.error().expect("expected a failure").kind
    }

    #[tokio::test]
    async fn test_translate_scenario() {
        let loader = Arc::new(FakeLoader::default());
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        let outcome = engine.translate("Hello, how are you?", "en", "ko").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.translated_text(), Some("안녕하세요, 어떻게 지내세요?"));
        assert!(outcome.error().is_none());
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let loader = Arc::new(FakeLoader::default());
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        for text in ["", "   \n"] {
            let outcome = engine.translate(text, "en", "ko").await;
            assert!(!outcome.is_success());
            assert!(outcome.translated_text().is_none());
            assert_eq!(kind_of(&outcome), FailureKind::InputRejected);
            assert_eq!(outcome.error().unwrap().message, VerbaError::EmptyText.to_string());
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_languages_never_load_a_model() {
        for strategy in [StrategyKind::Pair, StrategyKind::Shared] {
            let loader = Arc::new(FakeLoader::default());
            let engine = engine_with(strategy, loader.clone());

            for (source, target) in [("xx", "yy"), ("en", "yy"), ("xx", "ko"), ("en", "en"), ("", "ko")] {
                let outcome = engine.translate("hi", source, target).await;
                assert!(!outcome.is_success(), "{} -> {} should fail", source, target);
                assert_eq!(kind_of(&outcome), FailureKind::InputRejected);
            }

            let outcome = engine.translate("hi", "xx", "yy").await;
            assert!(outcome.error().unwrap().message.contains("Unsupported language"));
            assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_length_boundary() {
        let loader = Arc::new(FakeLoader::default());
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        let at_limit = "a".repeat(20);
        assert!(engine.translate(&at_limit, "en", "ko").await.is_success());

        let over_limit = "a".repeat(21);
        let outcome = engine.translate(&over_limit, "en", "ko").await;
        assert!(!outcome.is_success());
        assert_eq!(kind_of(&outcome), FailureKind::InputRejected);

        // Length counts characters, not bytes
        let hangul = "가".repeat(20);
        assert!(engine.translate(&hangul, "ko", "en").await.is_success());
    }

    #[tokio::test]
    async fn test_pair_strategy_loads_once_per_direction() {
        let loader = Arc::new(FakeLoader::default());
        let engine = engine_with(StrategyKind::Pair, loader.clone());

        assert!(engine.translate("hello", "en", "ko").await.is_success());
        assert!(engine.translate("world", "en", "ko").await.is_success());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        assert!(engine.translate("안녕", "ko", "en").await.is_success());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);

        let keys: Vec<String> = engine.cached_keys().await.iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["en-ko".to_string(), "ko-en".to_string()]);
    }

    #[tokio::test]
    async fn test_shared_strategy_loads_once_for_all_directions() {
        let loader = Arc::new(FakeLoader::default());
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        assert!(engine.translate("hello", "en", "ko").await.is_success());
        assert!(engine.translate("hello", "en", "ja").await.is_success());
        assert!(engine.translate("hola", "es", "de").await.is_success());

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cached_keys().await.into_iter().collect::<Vec<_>>(), vec![ModelKey::Shared]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_load_once() {
        let loader = Arc::new(FakeLoader {
            load_delay: Some(Duration::from_millis(50)),
            ..FakeLoader::default()
        });
        let engine = Arc::new(engine_with(StrategyKind::Pair, loader.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..12 {
            let engine = engine.clone();
            tasks.spawn(async move { engine.translate(&format!("line {}", i), "en", "ko").await });
        }
        while let Some(outcome) = tasks.join_next().await {
            assert!(outcome.unwrap().is_success());
        }

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_strategy_steers_decoding() {
        let loader = Arc::new(FakeLoader {
            lang_ids: HashMap::from([("kor_Hang".to_string(), 11)]),
            vocab: HashMap::from([("jpn_Jpan".to_string(), 22)]),
            ..FakeLoader::default()
        });
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        // Tier 1, tier 2, then neither
        assert!(engine.translate("hello", "en", "ko").await.is_success());
        assert!(engine.translate("hello", "en", "ja").await.is_success());
        assert!(engine.translate("hello", "en", "de").await.is_success());

        let seen = loader.seen.lock().unwrap();
        let forced: Vec<Option<u32>> = seen.iter().map(|p| p.forced_bos_token_id).collect();
        assert_eq!(forced, vec![Some(11), Some(22), None]);
        assert!(seen.iter().all(|p| p.num_beams == 5 && p.early_stopping && p.no_repeat_ngram_size == 3));

        let sources = loader.sources.lock().unwrap();
        assert!(sources.iter().all(|s| s.as_deref() == Some("eng_Latn")));
    }

    #[tokio::test]
    async fn test_pair_strategy_does_not_force_tokens() {
        let loader = Arc::new(FakeLoader {
            lang_ids: HashMap::from([("ko".to_string(), 11)]),
            ..FakeLoader::default()
        });
        let engine = engine_with(StrategyKind::Pair, loader.clone());

        assert!(engine.translate("hello", "en", "ko").await.is_success());
        assert_eq!(loader.seen.lock().unwrap()[0].forced_bos_token_id, None);
        assert_eq!(loader.sources.lock().unwrap()[0], None);
    }

    #[tokio::test]
    async fn test_failed_load_is_reported_and_retried() {
        let loader = Arc::new(FakeLoader {
            fail_loads: AtomicUsize::new(1),
            ..FakeLoader::default()
        });
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        let outcome = engine.translate("hello", "en", "ko").await;
        assert!(!outcome.is_success());
        assert_eq!(kind_of(&outcome), FailureKind::ResourceUnavailable);
        assert!(engine.cached_keys().await.is_empty());

        let outcome = engine.translate("hello", "en", "ko").await;
        assert!(outcome.is_success());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_is_an_outcome() {
        let loader = Arc::new(FakeLoader {
            fail_generation: true,
            ..FakeLoader::default()
        });
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        let outcome = engine.translate("hello", "en", "ko").await;
        assert!(!outcome.is_success());
        assert!(outcome.translated_text().is_none());
        assert_eq!(kind_of(&outcome), FailureKind::InferenceFailure);

        // The model itself stays resident
        assert_eq!(engine.cached_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_models_forces_reload() {
        let loader = Arc::new(FakeLoader::default());
        let engine = engine_with(StrategyKind::Shared, loader.clone());

        assert!(engine.translate("hello", "en", "ko").await.is_success());
        engine.clear_models().await;
        assert!(engine.cached_keys().await.is_empty());
        assert!(engine.translate("hello", "en", "ko").await.is_success());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let ok = serde_json::to_value(TranslationOutcome::success("안녕".to_string())).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["translated_text"], "안녕");
        assert!(ok["error"].is_null());

        let failed = serde_json::to_value(TranslationOutcome::failure(&VerbaError::EmptyText)).unwrap();
        assert_eq!(failed["success"], false);
        assert!(failed["translated_text"].is_null());
        assert_eq!(failed["error"]["kind"], "input_rejected");
    }
}
