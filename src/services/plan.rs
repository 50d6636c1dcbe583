use crate::services::chapters::Chapter;
use crate::services::chunker::sentence_chunks;
use crate::services::narration::{detect_opening_voice, split_narrator_spans, VoicePair, VoiceSlot};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const FRAGMENT_DIR: &str = "temp_chunks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// A non-empty fragment from an earlier run was found at `output_path`.
    Cached,
    Done,
    Failed(String),
}

/// One chunk's trip through the speech service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisJob {
    pub chapter: usize,
    /// Global, strictly increasing in plan order; 1-based.
    pub sequence: usize,
    pub voice: VoiceSlot,
    pub voice_id: String,
    pub text: String,
    pub output_path: PathBuf,
    pub status: JobStatus,
    /// Set when the job only succeeded through fallback re-chunking.
    pub recovered_by_fallback: bool,
}

impl SynthesisJob {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, JobStatus::Cached | JobStatus::Done)
    }
}

pub fn fragment_path(fragment_dir: &Path, chapter: usize, sequence: usize) -> PathBuf {
    fragment_dir.join(format!("ch{:03}_{:04}.wav", chapter, sequence))
}

pub struct PlanOptions<'a> {
    pub voices: &'a VoicePair,
    pub max_chars: usize,
    pub fragment_dir: &'a Path,
    pub opening_overrides: &'a HashMap<usize, VoiceSlot>,
}

/// The opening voice of a chapter: a configured hint if any, otherwise the
/// name heuristic.
pub fn opening_voice(chapter: &Chapter, options: &PlanOptions<'_>) -> VoiceSlot {
    options
        .opening_overrides
        .get(&chapter.index)
        .copied()
        .unwrap_or_else(|| detect_opening_voice(&chapter.text, &options.voices.b.display_name))
}

/// Builds the full ordered job list. Identical input always yields identical
/// sequence numbers and paths, which is what lets a rerun find its fragments.
pub fn build_plan(chapters: &[Chapter], options: &PlanOptions<'_>) -> Vec<SynthesisJob> {
    let mut jobs = Vec::new();
    for chapter in chapters {
        let opening = opening_voice(chapter, options);
        let spans = split_narrator_spans(&chapter.text, opening);
        debug!(
            "Chapter {}: opens with voice {:?}, {} span(s)",
            chapter.index,
            opening,
            spans.len()
        );

        for span in spans {
            let voice_id = options.voices.get(span.voice).provider_voice_id.clone();
            for text in sentence_chunks(&span.text, options.max_chars) {
                let sequence = jobs.len() + 1;
                jobs.push(SynthesisJob {
                    chapter: chapter.index,
                    sequence,
                    voice: span.voice,
                    voice_id: voice_id.clone(),
                    text,
                    output_path: fragment_path(options.fragment_dir, chapter.index, sequence),
                    status: JobStatus::Pending,
                    recovered_by_fallback: false,
                });
            }
        }
    }
    jobs
}
