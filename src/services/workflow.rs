use crate::core::config::RunConfig;
use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::voice_cache::VoiceCache;
use crate::services::assembler::{assemble, AssemblyOptions};
use crate::services::chapters::split_chapters;
use crate::services::manuscript::{load_manuscript, normalize_whitespace};
use crate::services::plan::{build_plan, PlanOptions, FRAGMENT_DIR};
use crate::services::scheduler::{SchedulerOptions, Scheduler};
use crate::services::tts::{resolve_voices, SpeechClient};
use anyhow::Result;
use log::info;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub chapters: usize,
    pub jobs: usize,
    pub cached: usize,
    pub synthesized: usize,
    pub recovered: usize,
    pub chapter_files: Vec<PathBuf>,
    pub full_book: PathBuf,
    pub qc_reel: PathBuf,
    pub duration_ms: u64,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.duration_ms / 1000;
        writeln!(
            f,
            "{} chapter(s), {} chunk(s): {} synthesized, {} reused, {} recovered by re-chunking",
            self.chapters, self.jobs, self.synthesized, self.cached, self.recovered
        )?;
        writeln!(f, "Full book: {:?} ({}:{:02}:{:02})", self.full_book, secs / 3600, secs / 60 % 60, secs % 60)?;
        write!(f, "QC reel:   {:?}", self.qc_reel)
    }
}

pub struct WorkflowManager {
    config: RunConfig,
    tts: Box<dyn SpeechClient>,
    storage: Arc<dyn Storage>,
    show_progress: bool,
}

impl WorkflowManager {
    pub fn new(config: RunConfig, tts: Box<dyn SpeechClient>, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            tts,
            storage,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Runs the whole pipeline. Nothing is assembled unless every chunk has
    /// audio on disk, so a failed run can simply be started again.
    pub async fn run(&self) -> Result<RunReport> {
        let config = &self.config;
        let storage = self.storage.as_ref();

        println!("Loading manuscript {:?}", config.input_path);
        let text = normalize_whitespace(&load_manuscript(&config.input_path)?);
        if text.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "manuscript {:?} contains no text",
                config.input_path
            ))
            .into());
        }

        let chapters = split_chapters(&text);
        println!("Found {} chapter(s)", chapters.len());

        let mut voice_cache = VoiceCache::load(&config.voice_cache_path, storage).await?;
        let voices = resolve_voices(
            self.tts.as_ref(),
            &mut voice_cache,
            &config.voice_a,
            &config.voice_b,
            storage,
        )
        .await?;
        info!(
            "Voice A {} -> {}, voice B {} -> {}",
            voices.a.display_name, voices.a.provider_voice_id, voices.b.display_name, voices.b.provider_voice_id
        );

        let fragment_dir = config.output_dir.join(FRAGMENT_DIR);
        let jobs = build_plan(
            &chapters,
            &PlanOptions {
                voices: &voices,
                max_chars: config.primary_cap,
                fragment_dir: &fragment_dir,
                opening_overrides: &config.opening_voice_overrides,
            },
        );

        println!("Synthesizing audio ({} chunks)...", jobs.len());
        let scheduler = Scheduler::new(
            self.tts.as_ref(),
            storage,
            SchedulerOptions {
                concurrency: config.concurrency,
                fallback_cap: config.fallback_cap,
                retry: config.retry.clone(),
                show_progress: self.show_progress,
            },
        );
        let outcome = scheduler.run(jobs).await?;
        if !outcome.failures.is_empty() {
            return Err(PipelineError::JobFailures(outcome.failures).into());
        }

        println!("Assembling audio...");
        let assembly = assemble(
            &outcome.jobs,
            storage,
            &AssemblyOptions {
                output_dir: &config.output_dir,
                fragment_dir: &fragment_dir,
                book_title: &config.book_title,
                book_author: &config.book_author,
                audio: &config.audio,
                keep_fragments: config.keep_fragments,
            },
        )
        .await?;

        let report = RunReport {
            chapters: chapters.len(),
            jobs: outcome.jobs.len(),
            cached: outcome.cached,
            synthesized: outcome.synthesized,
            recovered: outcome.recovered,
            chapter_files: assembly.chapter_files,
            full_book: assembly.full_book,
            qc_reel: assembly.qc_reel,
            duration_ms: assembly.duration_ms,
        };
        println!("{}", report);
        Ok(report)
    }
}
