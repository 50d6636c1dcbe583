use anyhow::{Context, Result};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::PipelineError;
use crate::services::narration::VoiceSlot;
use crate::services::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "eleven_turbo_v2_5";
const UNKNOWN_MODEL_LIMIT: usize = 10_000;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Absolute character ceiling of a synthesis request for `model`.
pub fn model_char_limit(model: &str) -> usize {
    match model {
        "eleven_turbo_v2_5" | "eleven_flash_v2_5" => 40_000,
        "eleven_multilingual_v2" => 10_000,
        _ => UNKNOWN_MODEL_LIMIT,
    }
}

fn default_fallback_limit(model: &str) -> Option<usize> {
    match model {
        "eleven_turbo_v2_5" | "eleven_flash_v2_5" => Some(4_000),
        "eleven_multilingual_v2" => Some(3_000),
        _ => None,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub input_path: String,

    #[serde(default)]
    pub book: BookConfig,

    /// Display names of voice A and voice B, in that order.
    #[serde(default)]
    pub voices: Vec<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    pub output_folder: Option<String>,

    pub primary_chunk_chars: Option<usize>,
    pub fallback_chunk_chars: Option<usize>,

    #[serde(default = "default_voice_cache_path")]
    pub voice_cache_path: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub keep_fragments: bool,

    /// Chapter ordinal -> opening voice, overriding the name heuristic.
    #[serde(default)]
    pub opening_voice_overrides: HashMap<usize, VoiceSlot>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BookConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Wav,
    Mp3,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_chapter_silence_ms")]
    pub chapter_silence_ms: u64,
    #[serde(default = "default_target_dbfs")]
    pub target_dbfs: f64,
    #[serde(default = "default_qc_seconds")]
    pub qc_seconds: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            format: OutputFormat::default(),
            bitrate: default_bitrate(),
            chapter_silence_ms: default_chapter_silence_ms(),
            target_dbfs: default_target_dbfs(),
            qc_seconds: default_qc_seconds(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_concurrency() -> usize {
    8
}
fn default_voice_cache_path() -> String {
    "voices_cache.json".to_string()
}
fn default_base_url() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_max_attempts() -> usize {
    5
}
fn default_initial_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    20_000
}
fn default_sample_rate() -> u32 {
    24_000
}
fn default_bitrate() -> String {
    "128k".to_string()
}
fn default_chapter_silence_ms() -> u64 {
    2_500
}
fn default_target_dbfs() -> f64 {
    -16.0
}
fn default_qc_seconds() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            input_path: String::new(),
            book: BookConfig::default(),
            voices: Vec::new(),
            model: default_model(),
            concurrency: default_concurrency(),
            output_folder: None,
            primary_chunk_chars: None,
            fallback_chunk_chars: None,
            voice_cache_path: default_voice_cache_path(),
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
            retry: RetryConfig::default(),
            audio: AudioConfig::default(),
            keep_fragments: false,
            opening_voice_overrides: HashMap::new(),
        }
    }
}

/// Everything a run needs, checked once before any work starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub api_key: String,
    pub input_path: PathBuf,
    pub book_title: String,
    pub book_author: String,
    pub voice_a: String,
    pub voice_b: String,
    pub model: String,
    pub model_limit: usize,
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub primary_cap: usize,
    pub fallback_cap: usize,
    pub voice_cache_path: PathBuf,
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub retry: RetryPolicy,
    pub audio: AudioConfig,
    pub keep_fragments: bool,
    pub opening_voice_overrides: HashMap<usize, VoiceSlot>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.apply_env_key(std::env::var("ELEVEN_API_KEY").ok());
        Ok(config)
    }

    /// Fills an empty `api_key` from the environment. A key written in the
    /// file always wins.
    pub fn apply_env_key(&mut self, key: Option<String>) {
        if !self.api_key.trim().is_empty() {
            return;
        }
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<RunConfig, PipelineError> {
        let mut missing = Vec::new();
        if self.api_key.trim().is_empty() {
            missing.push("api_key");
        }
        if self.input_path.trim().is_empty() {
            missing.push("input_path");
        }
        if self.book.title.trim().is_empty() {
            missing.push("book.title");
        }
        if self.book.author.trim().is_empty() {
            missing.push("book.author");
        }
        if !missing.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        let voices: Vec<String> = self
            .voices
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if voices.len() != 2 {
            return Err(PipelineError::Configuration(
                "`voices` must name exactly two voices (e.g. [Demetri, Diana])".to_string(),
            ));
        }
        if voices[0].eq_ignore_ascii_case(&voices[1]) {
            return Err(PipelineError::Configuration(
                "`voices` must name two different voices".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(PipelineError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let (primary_cap, fallback_cap) = self.chunk_caps()?;

        let output_dir = match &self.output_folder {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => Path::new("output").join(slugify(&self.book.title)),
        };

        let mut voices = voices.into_iter();
        let voice_a = voices.next().unwrap_or_default();
        let voice_b = voices.next().unwrap_or_default();

        Ok(RunConfig {
            api_key: self.api_key.trim().to_string(),
            input_path: PathBuf::from(&self.input_path),
            book_title: self.book.title.trim().to_string(),
            book_author: self.book.author.trim().to_string(),
            voice_a,
            voice_b,
            model: self.model.clone(),
            model_limit: model_char_limit(&self.model),
            concurrency: self.concurrency,
            output_dir,
            primary_cap,
            fallback_cap,
            voice_cache_path: PathBuf::from(&self.voice_cache_path),
            base_url: self.base_url.clone(),
            request_timeout_seconds: self.request_timeout_seconds,
            retry: RetryPolicy::from(&self.retry),
            audio: self.audio.clone(),
            keep_fragments: self.keep_fragments,
            opening_voice_overrides: self.opening_voice_overrides.clone(),
        })
    }

    fn chunk_caps(&self) -> Result<(usize, usize), PipelineError> {
        let model_limit = model_char_limit(&self.model);

        let mut primary = match self.primary_chunk_chars {
            Some(0) => {
                return Err(PipelineError::Configuration(
                    "primary_chunk_chars must be greater than zero".to_string(),
                ))
            }
            Some(n) => n,
            None => model_limit * 9 / 10,
        };
        if primary > model_limit {
            warn!(
                "primary_chunk_chars {} exceeds the {} ceiling of {}; clamping",
                primary, self.model, model_limit
            );
            primary = model_limit;
        }

        let fallback = match self.fallback_chunk_chars {
            Some(0) => {
                return Err(PipelineError::Configuration(
                    "fallback_chunk_chars must be greater than zero".to_string(),
                ))
            }
            Some(n) if n >= primary => {
                return Err(PipelineError::Configuration(format!(
                    "fallback_chunk_chars ({}) must be smaller than the primary chunk size ({})",
                    n, primary
                )))
            }
            Some(n) => n,
            None => {
                let default = default_fallback_limit(&self.model).unwrap_or(primary / 3);
                if default >= primary {
                    primary / 2
                } else {
                    default
                }
            }
        };
        if fallback == 0 {
            return Err(PipelineError::Configuration(format!(
                "primary chunk size {} leaves no room for a smaller fallback size",
                primary
            )));
        }

        Ok((primary, fallback))
    }
}

pub fn slugify(s: &str) -> String {
    let stripped = NON_WORD.replace_all(s, "");
    WHITESPACE_RUN
        .replace_all(stripped.trim(), "-")
        .to_lowercase()
}
