// Speech synthesis engine
//
// One resident voice per language, loaded lazily through the model cache.
// Output files are content-addressed: the same (language, text) always maps
// to the same `tts_<lang>_<digest>.<ext>` name, so repeated requests reuse the
// file already on disk.

pub mod coqui;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::ModelCache;
use crate::config::TtsConfig;
use crate::error::{FailureReason, Result, VerbaError};
use crate::language::LanguageCode;

/// Number of hex characters of the digest kept in file names
const DIGEST_HEX_LEN: usize = 16;

/// A loaded speech model.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Render `text` and return the encoded audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Speech backend: availability probe plus model construction.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Succeeds when the backend can be used at all.
    async fn probe(&self) -> Result<()>;

    async fn load(&self, model: &str) -> Result<Box<dyn SpeechModel>>;
}

/// Resident voice for one language
pub struct VoiceHandle {
    pub model: String,
    pub voice: Box<dyn SpeechModel>,
}

/// Whether synthesis can run, and if not, whose fault it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Capability {
    Available,
    DisabledByConfig,
    BackendUnavailable(String),
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::DisabledByConfig => write!(f, "disabled by configuration"),
            Self::BackendUnavailable(reason) => write!(f, "backend unavailable ({})", reason),
        }
    }
}

/// File name for the audio of `text` in `language`.
pub fn audio_file_name(language: &LanguageCode, text: &str, extension: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", language, text).as_bytes());
    let hex: String = digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(DIGEST_HEX_LEN)
        .collect();
    format!("tts_{}_{}.{}", language, hex, extension)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAudio {
    /// Content-addressed file name
    pub file_name: String,
    /// Path relative to the working directory
    pub audio_path: String,
    /// Caller-facing reference
    pub audio_url: String,
}

/// An audio file found in the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFileInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Result of one synthesis request. `audio` is set exactly when `success` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisOutcome {
    success: bool,
    audio: Option<SynthesizedAudio>,
    error: Option<FailureReason>,
}

impl SynthesisOutcome {
    pub fn success(audio: SynthesizedAudio) -> Self {
        Self {
            success: true,
            audio: Some(audio),
            error: None,
        }
    }

    pub fn failure(error: &VerbaError) -> Self {
        Self {
            success: false,
            audio: None,
            error: Some(FailureReason::from(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn audio(&self) -> Option<&SynthesizedAudio> {
        self.audio.as_ref()
    }

    pub fn error(&self) -> Option<&FailureReason> {
        self.error.as_ref()
    }
}

pub struct SynthesisEngine {
    backend: Arc<dyn SpeechBackend>,
    cache: ModelCache<LanguageCode, VoiceHandle>,
    probed: OnceCell<()>,
    enabled: bool,
    models: BTreeMap<LanguageCode, String>,
    default_language: Option<LanguageCode>,
    audio_dir: PathBuf,
    url_prefix: String,
    extension: String,
}

impl SynthesisEngine {
    pub fn new(backend: Arc<dyn SpeechBackend>, config: &TtsConfig) -> Result<Self> {
        let mut models = BTreeMap::new();
        for (code, model) in &config.models {
            models.insert(LanguageCode::parse(code)?, model.clone());
        }

        // An empty default is allowed; requests without a language then fail
        let default_language = if config.default_language.trim().is_empty() {
            None
        } else {
            Some(LanguageCode::parse(&config.default_language)?)
        };

        Ok(Self {
            backend,
            cache: ModelCache::new(),
            probed: OnceCell::new(),
            enabled: config.enabled,
            models,
            default_language,
            audio_dir: PathBuf::from(&config.audio_dir),
            url_prefix: config.url_prefix.trim_end_matches('/').to_string(),
            extension: config.file_extension.trim_start_matches('.').to_string(),
        })
    }

    /// Build the engine on top of the Coqui speech server backend
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let backend = coqui::CoquiBackend::from_config(config)?;
        Self::new(Arc::new(backend), config)
    }

    /// Tri-state availability. A successful probe is remembered; a failed one is retried.
    pub async fn capability(&self) -> Capability {
        if !self.enabled {
            return Capability::DisabledByConfig;
        }

        match self
            .probed
            .get_or_try_init(|| async { self.backend.probe().await })
            .await
        {
            Ok(_) => Capability::Available,
            Err(e) => Capability::BackendUnavailable(e.to_string()),
        }
    }

    /// Languages with a dedicated voice
    pub fn languages(&self) -> Vec<LanguageCode> {
        self.models.keys().cloned().collect()
    }

    /// Languages whose voice is currently resident
    pub async fn cached_voices(&self) -> BTreeSet<LanguageCode> {
        self.cache.list_keys().await
    }

    pub async fn clear_models(&self) {
        self.cache.clear().await;
        info!("Speech model cache cleared");
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Synthesize `text`. Always returns an outcome; failures are reported inside it.
    pub async fn synthesize(&self, text: &str, language: &str) -> SynthesisOutcome {
        match self.try_synthesize(text, language).await {
            Ok(audio) => {
                info!("Synthesized {} ({})", audio.file_name, language);
                SynthesisOutcome::success(audio)
            }
            Err(e) => {
                warn!("Speech synthesis ({}) failed: {}", language, e);
                SynthesisOutcome::failure(&e)
            }
        }
    }

    /// Synthesized files in the audio directory, newest first
    pub fn list_audio(&self) -> Result<Vec<AudioFileInfo>> {
        let suffix = format!(".{}", self.extension);
        let mut files = Vec::new();

        for entry in self.audio_entries() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.ends_with(&suffix) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| VerbaError::Io(e.into()))?;
            files.push(AudioFileInfo {
                file_name,
                path: entry.path().to_path_buf(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.file_name.cmp(&b.file_name)));
        Ok(files)
    }

    /// Delete synthesized files, including leftover partial writes. Returns the number removed.
    pub fn clear_audio(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.audio_entries() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
        info!("Removed {} audio file(s) from {}", removed, self.audio_dir.display());
        Ok(removed)
    }

    fn audio_entries(&self) -> impl Iterator<Item = walkdir::DirEntry> {
        WalkDir::new(&self.audio_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().starts_with("tts_"))
    }

    fn normalize_language(&self, language: &str) -> Result<LanguageCode> {
        if language.trim().is_empty() {
            return self
                .default_language
                .clone()
                .ok_or_else(|| VerbaError::NoVoiceModel(language.to_string()));
        }
        LanguageCode::parse(language)
    }

    /// Pick the voice for `language`, falling back to the default language's voice.
    fn resolve_voice(&self, language: &LanguageCode) -> Result<(LanguageCode, String)> {
        if let Some(model) = self.models.get(language) {
            return Ok((language.clone(), model.clone()));
        }

        self.default_language
            .as_ref()
            .and_then(|fallback| {
                self.models
                    .get(fallback)
                    .map(|model| (fallback.clone(), model.clone()))
            })
            .ok_or_else(|| VerbaError::NoVoiceModel(language.to_string()))
    }

    async fn try_synthesize(&self, text: &str, language: &str) -> Result<SynthesizedAudio> {
        let language = self.normalize_language(language)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(VerbaError::EmptyText);
        }

        match self.capability().await {
            Capability::Available => {}
            Capability::DisabledByConfig => return Err(VerbaError::SynthesisDisabled),
            Capability::BackendUnavailable(reason) => return Err(VerbaError::SynthesisUnavailable(reason)),
        }

        let (voice_language, model) = self.resolve_voice(&language)?;
        if voice_language != language {
            debug!("No voice for {}, using {} voice {}", language, voice_language, model);
        }

        let file_name = audio_file_name(&language, text, &self.extension);
        let audio = self.describe(&file_name);
        let path = self.audio_dir.join(&file_name);

        fs::create_dir_all(&self.audio_dir).await?;

        if is_complete(&path).await {
            debug!("Reusing existing audio file: {}", path.display());
            return Ok(audio);
        }

        let handle = self
            .cache
            .get_or_create(voice_language, || {
                let backend = self.backend.clone();
                let model = model.clone();
                async move {
                    let voice = backend.load(&model).await?;
                    Ok(VoiceHandle { model, voice })
                }
            })
            .await?;

        let bytes = handle.voice.synthesize(text).await?;
        if bytes.is_empty() {
            return Err(VerbaError::Synthesis(format!("Model {} returned no audio", handle.model)));
        }

        write_atomically(&path, &bytes).await?;
        Ok(audio)
    }

    fn describe(&self, file_name: &str) -> SynthesizedAudio {
        let audio_path = format!("{}/{}", self.audio_dir.to_string_lossy(), file_name).replace('\\', "/");
        SynthesizedAudio {
            file_name: file_name.to_string(),
            audio_path,
            audio_url: format!("{}/{}", self.url_prefix, file_name),
        }
    }
}

/// True when `path` holds a finished, non-empty audio file
async fn is_complete(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}

/// Write through a uniquely named `.partial` file in the same directory, then rename it into place.
///
/// Concurrent writers of the same name each publish a complete file and the last rename wins.
/// A failed write removes its own partial file and never touches anyone else's.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let target = path.to_path_buf();
    let bytes = bytes.to_vec();

    let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = target
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = format!(
            "{}.",
            target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
        );

        let mut partial = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".partial")
            .tempfile_in(dir)?;
        partial.write_all(&bytes)?;
        partial.as_file().sync_all()?;
        partial.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| VerbaError::Synthesis(format!("Audio write task failed: {}", e)))?;

    if let Err(e) = written {
        // Another writer may have published the same content first
        if is_complete(path).await {
            debug!("Audio file was published concurrently: {}", path.display());
            return Ok(());
        }
        return Err(VerbaError::Synthesis(format!("Failed to write {}: {}", path.display(), e)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::FailureKind;
    use assert_fs::TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeVoice {
        fail: bool,
    }

    #[async_trait]
    impl SpeechModel for FakeVoice {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            if self.fail {
                return Err(VerbaError::Synthesis("vocoder crashed".to_string()));
            }
            Ok(format!("RIFF{}", text).into_bytes())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        missing: bool,
        fail_synthesis: bool,
        probes: AtomicUsize,
        loads: AtomicUsize,
        loaded_models: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechBackend for FakeBackend {
        async fn probe(&self) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(VerbaError::SynthesisUnavailable("tts-server not found".to_string()));
            }
            Ok(())
        }

        async fn load(&self, model: &str) -> Result<Box<dyn SpeechModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.loaded_models.lock().unwrap().push(model.to_string());
            Ok(Box::new(FakeVoice { fail: self.fail_synthesis }))
        }
    }

    fn engine(dir: &TempDir, backend: Arc<FakeBackend>, enabled: bool) -> SynthesisEngine {
        let mut config = Config::default().tts;
        config.enabled = enabled;
        config.audio_dir = dir.path().join("audio").to_string_lossy().to_string();
        SynthesisEngine::new(backend, &config).unwrap()
    }

    fn lang(s: &str) -> LanguageCode {
        LanguageCode::parse(s).unwrap()
    }

    #[test]
    fn test_file_name_is_stable() {
        assert_eq!(audio_file_name(&lang("en"), "Hello", "wav"), "tts_en_732e312764e92468.wav");
        assert_eq!(audio_file_name(&lang("ko"), "안녕하세요", "wav"), "tts_ko_0a4e13bdc6eb5655.wav");
    }

    #[test]
    fn test_file_name_shape() {
        for (code, text) in [("en", "Hello"), ("de", "Guten Tag"), ("es", ""), ("fr", "ça va?")] {
            let name = audio_file_name(&lang(code), text, "wav");
            let stem = name.strip_suffix(".wav").unwrap();
            let digest = stem.strip_prefix(&format!("tts_{}_", code)).unwrap();
            assert_eq!(digest.len(), 16);
            assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }

        // Language is part of the digest input, not just the prefix
        let en = audio_file_name(&lang("en"), "Hola", "wav");
        let es = audio_file_name(&lang("es"), "Hola", "wav");
        assert_ne!(en[7..], es[7..]);
    }

    #[tokio::test]
    async fn test_synthesize_twice_reuses_file() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let engine = engine(&dir, backend.clone(), true);

        let first = engine.synthesize("Hello", "en").await;
        let second = engine.synthesize("Hello", "EN").await;

        assert!(first.is_success());
        assert_eq!(first.audio(), second.audio());

        let audio = first.audio().unwrap();
        assert_eq!(audio.file_name, "tts_en_732e312764e92468.wav");
        assert_eq!(audio.audio_url, "/static/audio/tts_en_732e312764e92468.wav");
        assert!(audio.audio_path.ends_with("audio/tts_en_732e312764e92468.wav"));
        assert!(dir.path().join("audio").join(&audio.file_name).exists());

        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_voice_loaded_once_per_language() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let engine = engine(&dir, backend.clone(), true);

        assert!(engine.synthesize("one", "en").await.is_success());
        assert!(engine.synthesize("two", "en").await.is_success());
        assert!(engine.synthesize("uno", "es").await.is_success());

        assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
        assert_eq!(engine.cached_voices().await.into_iter().collect::<Vec<_>>(), vec![lang("en"), lang("es")]);
    }

    #[tokio::test]
    async fn test_unknown_language_falls_back_to_default_voice() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let engine = engine(&dir, backend.clone(), true);

        let outcome = engine.synthesize("안녕하세요", "ko").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.audio().unwrap().file_name, "tts_ko_0a4e13bdc6eb5655.wav");
        assert_eq!(
            backend.loaded_models.lock().unwrap().as_slice(),
            ["tts_models/en/ljspeech/tacotron2-DDC".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_language_uses_default() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, Arc::new(FakeBackend::default()), true);

        let outcome = engine.synthesize("Hello", "  ").await;
        assert_eq!(outcome.audio().unwrap().file_name, "tts_en_732e312764e92468.wav");
    }

    #[tokio::test]
    async fn test_no_default_voice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default().tts;
        config.audio_dir = dir.path().to_string_lossy().to_string();
        config.default_language = String::new();
        let engine = SynthesisEngine::new(Arc::new(FakeBackend::default()), &config).unwrap();

        let outcome = engine.synthesize("안녕", "ko").await;
        assert_eq!(outcome.error().unwrap().kind, FailureKind::InputRejected);
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_before_probe() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let engine = engine(&dir, backend.clone(), true);

        let outcome = engine.synthesize("  ", "en").await;
        assert!(!outcome.is_success());
        assert!(outcome.audio().is_none());
        assert_eq!(outcome.error().unwrap().kind, FailureKind::InputRejected);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_and_missing_backend_are_distinguished() {
        let dir = TempDir::new().unwrap();

        let disabled = engine(&dir, Arc::new(FakeBackend::default()), false);
        let outcome = disabled.synthesize("Hello", "en").await;
        assert_eq!(outcome.error().unwrap().message, VerbaError::SynthesisDisabled.to_string());
        assert_eq!(disabled.capability().await, Capability::DisabledByConfig);

        let missing_backend = Arc::new(FakeBackend {
            missing: true,
            ..FakeBackend::default()
        });
        let missing = engine(&dir, missing_backend.clone(), true);
        let outcome = missing.synthesize("Hello", "en").await;
        let message = &outcome.error().unwrap().message;
        assert!(message.contains("unavailable"));
        assert_ne!(message, &VerbaError::SynthesisDisabled.to_string());
        assert!(matches!(missing.capability().await, Capability::BackendUnavailable(_)));
        assert_eq!(missing_backend.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_probe_is_remembered() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let engine = engine(&dir, backend.clone(), true);

        assert!(engine.capability().await.is_available());
        assert!(engine.capability().await.is_available());
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_synthesis_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend {
            fail_synthesis: true,
            ..FakeBackend::default()
        });
        let engine = engine(&dir, backend, true);

        let outcome = engine.synthesize("Hello", "en").await;
        assert!(!outcome.is_success());
        assert!(outcome.audio().is_none());
        assert_eq!(outcome.error().unwrap().kind, FailureKind::InferenceFailure);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("audio")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_clear_audio() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, Arc::new(FakeBackend::default()), true);

        // Missing directory lists as empty
        assert!(engine.list_audio().unwrap().is_empty());

        assert!(engine.synthesize("Hello", "en").await.is_success());
        assert!(engine.synthesize("Hola", "es").await.is_success());
        let audio_dir = dir.path().join("audio");
        std::fs::write(audio_dir.join("tts_en_0000000000000000.wav.partial"), b"RIFF").unwrap();
        std::fs::write(audio_dir.join("notes.txt"), b"keep me").unwrap();

        let listed = engine.list_audio().unwrap();
        let mut names: Vec<&str> = listed.iter().map(|f| f.file_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["tts_en_732e312764e92468.wav", audio_file_name(&lang("es"), "Hola", "wav").as_str()]);
        assert!(listed.iter().all(|f| f.size > 0));

        assert_eq!(engine.clear_audio().unwrap(), 3);
        assert!(engine.list_audio().unwrap().is_empty());
        assert!(audio_dir.join("notes.txt").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_identical_requests_share_one_file() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine(&dir, Arc::new(FakeBackend::default()), true));

        for round in 0..10 {
            let text = format!("Hello {}", round);
            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..8 {
                let engine = engine.clone();
                let text = text.clone();
                tasks.spawn(async move { engine.synthesize(&text, "en").await });
            }

            let mut names = BTreeSet::new();
            while let Some(outcome) = tasks.join_next().await {
                let outcome = outcome.unwrap();
                assert!(outcome.is_success(), "{:?}", outcome.error());
                names.insert(outcome.audio().unwrap().file_name.clone());
            }
            assert_eq!(names.len(), 1);

            let file_name = names.into_iter().next().unwrap();
            let written = std::fs::read(dir.path().join("audio").join(&file_name)).unwrap();
            assert_eq!(written, format!("RIFF{}", text).into_bytes());
        }

        // Only finished files remain
        let entries: Vec<String> = std::fs::read_dir(dir.path().join("audio"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries.len(), 10);
        assert!(entries.iter().all(|name| name.ends_with(".wav")));
    }
}
