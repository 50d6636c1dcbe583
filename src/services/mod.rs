pub mod assembler;
pub mod chapters;
pub mod chunker;
pub mod manuscript;
pub mod narration;
pub mod plan;
pub mod retry;
pub mod scheduler;
pub mod tts;
pub mod workflow;
