//! Language codes and the registries that map them to backend-specific tags.
//!
//! Two registry shapes exist:
//! - [`PairRegistry`]: an explicit set of supported ordered pairs, each bound
//!   to its own direction-specific model
//! - [`TagTable`]: one flat code -> tag table shared by every pair, used with a
//!   single multilingual model
//!
//! Callers only see the [`LanguageRegistry`] trait. An absent entry means
//! "unsupported", never an error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Result, VerbaError};

/// Short canonical language code such as `en` or `ko`.
///
/// Always lower-case and never empty. Regional variants use `_` (`zh_tw`);
/// `-` is reserved as the separator of pair keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_lowercase();
        if code.is_empty() {
            return Err(VerbaError::InvalidLanguageCode(raw.to_string()));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(VerbaError::InvalidLanguageCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = VerbaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}

/// Identifier meaningful only to one model family, e.g. `kor_Hang`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendLanguageTag(String);

impl BackendLanguageTag {
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendLanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered (source, target) combination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: LanguageCode,
    pub target: LanguageCode,
}

impl LanguagePair {
    pub fn new(source: LanguageCode, target: LanguageCode) -> Self {
        Self { source, target }
    }

    /// Parse a `src-tgt` key as used in configuration files.
    pub fn parse(key: &str) -> Result<Self> {
        let (source, target) = key
            .split_once('-')
            .ok_or_else(|| VerbaError::Config(format!("Invalid language pair '{}', expected 'src-tgt'", key)))?;
        Ok(Self::new(LanguageCode::parse(source)?, LanguageCode::parse(target)?))
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

/// Registry entry for a supported pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub source: BackendLanguageTag,
    pub target: BackendLanguageTag,
    /// Direction-specific model, if the registry binds one to the pair
    pub model: Option<String>,
}

pub trait LanguageRegistry: Send + Sync {
    /// Backend tag for a single language, if the registry knows it.
    fn resolve(&self, code: &LanguageCode) -> Option<BackendLanguageTag>;

    /// Backend tags (and model, where bound) for an ordered pair.
    fn resolve_pair(&self, pair: &LanguagePair) -> Option<ResolvedPair>;

    /// Every language this registry can translate from or into.
    fn languages(&self) -> Vec<LanguageCode>;

    /// Every ordered pair this registry supports.
    fn pairs(&self) -> Vec<LanguagePair>;
}

/// Explicitly enumerated pairs, each with its own model.
///
/// The backend tag of a language is its code, since direction-specific model
/// names embed the codes directly.
#[derive(Debug, Clone, Default)]
pub struct PairRegistry {
    pairs: BTreeMap<LanguagePair, String>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, pair: LanguagePair, model: S) {
        self.pairs.insert(pair, model.into());
    }

    /// Build from configuration entries of the form `"en-ko" = "model"`.
    pub fn from_config(entries: &BTreeMap<String, String>) -> Result<Self> {
        let mut registry = Self::new();
        for (key, model) in entries {
            let pair = LanguagePair::parse(key)
                .map_err(|e| VerbaError::Config(format!("Invalid pair key '{}': {}", key, e)))?;
            if pair.source == pair.target {
                return Err(VerbaError::Config(format!(
                    "Language pair '{}' translates a language into itself",
                    key
                )));
            }
            registry.insert(pair, model.clone());
        }
        Ok(registry)
    }
}

impl LanguageRegistry for PairRegistry {
    fn resolve(&self, code: &LanguageCode) -> Option<BackendLanguageTag> {
        self.pairs
            .keys()
            .any(|pair| &pair.source == code || &pair.target == code)
            .then(|| BackendLanguageTag::new(code.as_str()))
    }

    fn resolve_pair(&self, pair: &LanguagePair) -> Option<ResolvedPair> {
        self.pairs.get(pair).map(|model| ResolvedPair {
            source: BackendLanguageTag::new(pair.source.as_str()),
            target: BackendLanguageTag::new(pair.target.as_str()),
            model: Some(model.clone()),
        })
    }

    fn languages(&self) -> Vec<LanguageCode> {
        self.pairs
            .keys()
            .flat_map(|pair| [pair.source.clone(), pair.target.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn pairs(&self) -> Vec<LanguagePair> {
        self.pairs.keys().cloned().collect()
    }
}

/// One flat code -> tag table shared by every direction.
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    tags: BTreeMap<LanguageCode, BackendLanguageTag>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: LanguageCode, tag: BackendLanguageTag) {
        self.tags.insert(code, tag);
    }

    pub fn from_config(entries: &BTreeMap<String, String>) -> Result<Self> {
        let mut table = Self::new();
        for (code, tag) in entries {
            let code = LanguageCode::parse(code)
                .map_err(|e| VerbaError::Config(format!("Invalid language tag entry: {}", e)))?;
            table.insert(code, BackendLanguageTag::new(tag.clone()));
        }
        Ok(table)
    }
}

impl LanguageRegistry for TagTable {
    fn resolve(&self, code: &LanguageCode) -> Option<BackendLanguageTag> {
        self.tags.get(code).cloned()
    }

    fn resolve_pair(&self, pair: &LanguagePair) -> Option<ResolvedPair> {
        Some(ResolvedPair {
            source: self.resolve(&pair.source)?,
            target: self.resolve(&pair.target)?,
            model: None,
        })
    }

    fn languages(&self) -> Vec<LanguageCode> {
        self.tags.keys().cloned().collect()
    }

    fn pairs(&self) -> Vec<LanguagePair> {
        let mut pairs = Vec::new();
        for source in self.tags.keys() {
            for target in self.tags.keys() {
                if source != target {
                    pairs.push(LanguagePair::new(source.clone(), target.clone()));
                }
            }
        }
        pairs
    }
}
