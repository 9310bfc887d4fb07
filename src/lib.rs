//! Verba - lazy-loading translation and speech synthesis
//!
//! Language registries, a per-key model cache, a translation engine with
//! pair-specific and shared multilingual strategies, and a speech synthesis
//! engine with content-addressed output files.

pub mod cli;
pub mod config;
pub mod error;
pub mod language;
pub mod cache;
pub mod translate;
pub mod tts;
pub mod workflow;
