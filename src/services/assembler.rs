use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::config::AudioConfig;
use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::services::plan::SynthesisJob;
use crate::utils::audio::{export_clip, AudioClip, Tags};

pub struct AssemblyOptions<'a> {
    pub output_dir: &'a Path,
    pub fragment_dir: &'a Path,
    pub book_title: &'a str,
    pub book_author: &'a str,
    pub audio: &'a AudioConfig,
    pub keep_fragments: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyReport {
    pub chapter_files: Vec<PathBuf>,
    pub full_book: PathBuf,
    pub qc_reel: PathBuf,
    pub duration_ms: u64,
}

pub fn chapter_file_name(chapter: usize, ext: &str) -> String {
    format!("{:02}_Chapter.{}", chapter, ext)
}

/// Joins finished fragments into per-chapter files, the full book and a QC
/// excerpt. Fragments are removed afterwards unless `keep_fragments` is set.
pub async fn assemble(
    jobs: &[SynthesisJob],
    storage: &dyn Storage,
    options: &AssemblyOptions<'_>,
) -> Result<AssemblyReport, PipelineError> {
    let mut by_chapter: BTreeMap<usize, Vec<&SynthesisJob>> = BTreeMap::new();
    for job in jobs {
        if !job.is_complete() {
            return Err(PipelineError::assembly(
                &job.output_path,
                "fragment was never synthesized",
            ));
        }
        by_chapter.entry(job.chapter).or_default().push(job);
    }
    if by_chapter.is_empty() {
        return Err(PipelineError::assembly(options.output_dir, "nothing to assemble"));
    }

    let audio = options.audio;
    let ext = audio.format.extension();
    let mut chapter_files = Vec::new();
    let mut chapter_clips = Vec::new();

    for (chapter, mut chapter_jobs) in by_chapter {
        chapter_jobs.sort_by_key(|j| j.sequence);
        let clip = join_fragments(&chapter_jobs, storage).await?;

        let path = options.output_dir.join(chapter_file_name(chapter, ext));
        let tags = Tags {
            title: format!("Chapter {}", chapter),
            artist: options.book_author.to_string(),
            album: options.book_title.to_string(),
            track: Some(chapter),
        };
        export_clip(&clip, &path, audio.format, &audio.bitrate, &tags)
            .map_err(|e| PipelineError::assembly(&path, format!("{:#}", e)))?;
        info!("Wrote {:?} ({} ms)", path, clip.duration_ms());

        chapter_files.push(path);
        chapter_clips.push(clip);
    }

    let full_path = options.output_dir.join(format!("_full_book.{}", ext));
    let mut book = AudioClip::empty(chapter_clips[0].spec());
    for (i, mut clip) in chapter_clips.into_iter().enumerate() {
        clip.normalize_to(audio.target_dbfs);
        if i > 0 {
            book.append(&AudioClip::silence(book.spec(), audio.chapter_silence_ms))
                .map_err(|e| PipelineError::assembly(&full_path, e))?;
        }
        book.append(&clip)
            .map_err(|e| PipelineError::assembly(&full_path, format!("chapter {}: {}", i + 1, e)))?;
    }

    let book_tags = Tags {
        title: options.book_title.to_string(),
        artist: options.book_author.to_string(),
        album: options.book_title.to_string(),
        track: None,
    };
    export_clip(&book, &full_path, audio.format, &audio.bitrate, &book_tags)
        .map_err(|e| PipelineError::assembly(&full_path, format!("{:#}", e)))?;
    info!("Wrote {:?} ({} ms)", full_path, book.duration_ms());

    let qc_path = options.output_dir.join(format!("_qc_reel.{}", ext));
    let qc = book.head(audio.qc_seconds * 1000);
    let qc_tags = Tags {
        title: format!("{} (QC)", options.book_title),
        ..book_tags
    };
    export_clip(&qc, &qc_path, audio.format, &audio.bitrate, &qc_tags)
        .map_err(|e| PipelineError::assembly(&qc_path, format!("{:#}", e)))?;

    if options.keep_fragments {
        info!("Keeping fragments in {:?}", options.fragment_dir);
    } else if let Err(e) = storage.delete(options.fragment_dir).await {
        warn!("Failed to clean up {:?}: {:#}", options.fragment_dir, e);
    }

    Ok(AssemblyReport {
        chapter_files,
        full_book: full_path,
        qc_reel: qc_path,
        duration_ms: book.duration_ms(),
    })
}

async fn join_fragments(jobs: &[&SynthesisJob], storage: &dyn Storage) -> Result<AudioClip, PipelineError> {
    let mut joined: Option<AudioClip> = None;
    for job in jobs {
        let path = &job.output_path;
        let bytes = storage
            .read(path)
            .await
            .map_err(|e| PipelineError::assembly(path, format!("{:#}", e)))?;
        let clip = AudioClip::from_wav_bytes(&bytes)
            .map_err(|e| PipelineError::assembly(path, format!("{:#}", e)))?;
        match joined.as_mut() {
            Some(acc) => acc
                .append(&clip)
                .map_err(|e| PipelineError::assembly(path, e))?,
            None => joined = Some(clip),
        }
    }
    joined.ok_or_else(|| PipelineError::assembly(Path::new(""), "chapter without fragments"))
}
