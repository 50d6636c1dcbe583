use anyhow::{Context, Result};
use futures_util::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use tokio::sync::Semaphore;

use crate::core::error::{JobFailure, SynthesisError};
use crate::core::io::Storage;
use crate::services::chunker::sentence_chunks;
use crate::services::plan::{JobStatus, SynthesisJob};
use crate::services::retry::RetryPolicy;
use crate::services::tts::SpeechClient;
use crate::utils::audio::concat_wav_bytes;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub concurrency: usize,
    pub fallback_cap: usize,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Every job in plan order with its final status.
    pub jobs: Vec<SynthesisJob>,
    pub cached: usize,
    pub synthesized: usize,
    pub recovered: usize,
    pub failures: Vec<JobFailure>,
}

pub struct Scheduler<'a> {
    client: &'a dyn SpeechClient,
    storage: &'a dyn Storage,
    options: SchedulerOptions,
}

impl<'a> Scheduler<'a> {
    pub fn new(client: &'a dyn SpeechClient, storage: &'a dyn Storage, options: SchedulerOptions) -> Self {
        Self {
            client,
            storage,
            options,
        }
    }

    /// Synthesizes every job that has no fragment on disk yet, at most
    /// `concurrency` requests at a time. Per-job failures are collected rather
    /// than aborting the batch; storage errors while probing the cache abort.
    pub async fn run(&self, mut jobs: Vec<SynthesisJob>) -> Result<ScheduleOutcome> {
        for job in jobs.iter_mut() {
            if self.storage.has_content(&job.output_path).await? {
                job.status = JobStatus::Cached;
            }
        }
        let cached = jobs.iter().filter(|j| j.status == JobStatus::Cached).count();
        let pending: Vec<usize> = (0..jobs.len())
            .filter(|&i| jobs[i].status == JobStatus::Pending)
            .collect();
        info!(
            "{} job(s) planned, {} cached, {} to synthesize",
            jobs.len(),
            cached,
            pending.len()
        );

        let pb = if self.options.show_progress && !pending.is_empty() {
            let pb = ProgressBar::new(pending.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let semaphore = Semaphore::new(self.options.concurrency.max(1));
        let tasks = pending.iter().map(|&i| {
            let job = &jobs[i];
            let semaphore = &semaphore;
            let pb = pb.clone();
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => self.process(job).await,
                    Err(e) => Err(e).context("Semaphore acquisition failed"),
                };
                pb.inc(1);
                (i, result)
            }
        });
        let results = join_all(tasks).await;
        pb.finish_with_message("Synthesis complete");

        for (i, result) in results {
            let job = &mut jobs[i];
            match result {
                Ok(recovered) => {
                    job.status = JobStatus::Done;
                    job.recovered_by_fallback = recovered;
                }
                Err(e) => job.status = JobStatus::Failed(format!("{:#}", e)),
            }
        }

        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Cached) {
            if !self.storage.has_content(&job.output_path).await? {
                job.status = JobStatus::Failed(format!(
                    "cached fragment {:?} disappeared before assembly",
                    job.output_path
                ));
            }
        }

        let failures: Vec<JobFailure> = jobs
            .iter()
            .filter_map(|job| match &job.status {
                JobStatus::Failed(error) => Some(JobFailure {
                    chapter: job.chapter,
                    sequence: job.sequence,
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect();
        for failure in &failures {
            warn!("Job failed: {}", failure);
        }

        Ok(ScheduleOutcome {
            synthesized: jobs.iter().filter(|j| j.status == JobStatus::Done).count(),
            recovered: jobs.iter().filter(|j| j.recovered_by_fallback).count(),
            cached: jobs.iter().filter(|j| j.status == JobStatus::Cached).count(),
            jobs,
            failures,
        })
    }

    /// Returns whether the job needed fallback re-chunking. The caller holds a
    /// permit for the whole call, fallback included.
    async fn process(&self, job: &SynthesisJob) -> Result<bool> {
        let label = format!("chapter {} chunk {}", job.chapter, job.sequence);
        let client = self.client;
        let voice_id = job.voice_id.as_str();
        let text = job.text.as_str();

        match self
            .options
            .retry
            .run(&label, move |_| client.synthesize(voice_id, text))
            .await
        {
            Ok(audio) => {
                self.store(job, &audio).await?;
                debug!("{} done", label);
                Ok(false)
            }
            Err(e) if e.allows_fallback() && text.chars().count() > self.options.fallback_cap => {
                warn!(
                    "{} ({} chars) failed ({}); re-chunking at {} characters",
                    label,
                    text.chars().count(),
                    e,
                    self.options.fallback_cap
                );
                self.fallback(job, &label).await?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fallback(&self, job: &SynthesisJob, label: &str) -> Result<()> {
        let pieces = sentence_chunks(&job.text, self.options.fallback_cap);
        let client = self.client;
        let voice_id = job.voice_id.as_str();

        let mut parts = Vec::with_capacity(pieces.len());
        for (n, piece) in pieces.iter().enumerate() {
            let piece_label = format!("{} part {}/{}", label, n + 1, pieces.len());
            let text = piece.as_str();
            let audio = self
                .options
                .retry
                .run(&piece_label, move |_| client.synthesize(voice_id, text))
                .await?;
            parts.push(audio);
        }

        let joined = concat_wav_bytes(&parts)
            .map_err(|e| SynthesisError::Audio(format!("joining fallback parts: {:#}", e)))?;
        self.store(job, &joined).await
    }

    async fn store(&self, job: &SynthesisJob, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Err(SynthesisError::Audio("empty audio payload".to_string()).into());
        }
        self.storage.write(&job.output_path, audio).await
    }
}
