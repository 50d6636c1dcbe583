pub mod config;
pub mod error;
pub mod io;
pub mod voice_cache;
