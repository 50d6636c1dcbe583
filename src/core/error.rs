use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("requested voices not found: {}. Check the names in the voice catalog and the `voices` setting.", .missing.join(", "))]
    VoiceResolution { missing: Vec<String> },
    #[error("{} chunk(s) failed to synthesize:\n{}", .0.len(), JobFailureList(.0))]
    JobFailures(Vec<JobFailure>),
    #[error("audio assembly failed for {path:?}: {reason}")]
    Assembly { path: PathBuf, reason: String },
}

impl PipelineError {
    pub fn assembly(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::Assembly {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A job that exhausted both retries and the fallback path.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub chapter: usize,
    pub sequence: usize,
    pub error: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chapter {}, chunk {}: {}", self.chapter, self.sequence, self.error)
    }
}

struct JobFailureList<'a>(&'a [JobFailure]);

impl fmt::Display for JobFailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", failure)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    /// Network trouble, timeouts, rate limiting or a 5xx answer.
    #[error("transient synthesis error: {0}")]
    Transient(String),
    #[error("text of {len} characters exceeds the model ceiling of {limit}")]
    TextTooLong { len: usize, limit: usize },
    #[error("speech service rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        last: Box<SynthesisError>,
    },
    #[error("unusable audio: {0}")]
    Audio(String),
}

impl SynthesisError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SynthesisError::Transient(_))
    }

    /// Whether re-chunking the text into smaller requests may succeed.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            SynthesisError::Exhausted { .. } | SynthesisError::TextTooLong { .. }
        )
    }
}
