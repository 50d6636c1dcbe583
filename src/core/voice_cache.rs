use crate::core::io::Storage;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Display name -> provider voice id, persisted as JSON between runs.
///
/// Loaded once before voice resolution and flushed once afterwards; nothing
/// touches it while synthesis jobs are in flight.
#[derive(Debug, Clone)]
pub struct VoiceCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl VoiceCache {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    pub async fn load(path: impl Into<PathBuf>, storage: &dyn Storage) -> Result<Self> {
        let path = path.into();
        if !storage.exists(&path).await? {
            return Ok(Self::empty(path));
        }
        let bytes = storage.read(&path).await?;
        let entries: BTreeMap<String, String> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse voice cache {:?}", path))?;
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|s| s.as_str())
    }

    pub fn insert(&mut self, name: &str, voice_id: &str) {
        if self.get(name) != Some(voice_id) {
            self.entries.insert(name.to_string(), voice_id.to_string());
            self.dirty = true;
        }
    }

    /// Writes the cache if anything changed since load.
    pub async fn flush(&mut self, storage: &dyn Storage) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        storage.write(&self.path, content.as_bytes()).await?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[tokio::test]
    async fn test_roundtrip_through_disk() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let path = temp_dir.path().join("voices_cache.json");

        let mut cache = VoiceCache::load(&path, &storage).await?;
        assert!(cache.get("Diana").is_none());
        cache.insert("Diana", "vid-diana");
        cache.flush(&storage).await?;

        let reloaded = VoiceCache::load(&path, &storage).await?;
        assert_eq!(reloaded.get("Diana"), Some("vid-diana"));
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_without_changes_writes_nothing() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let path = temp_dir.path().join("voices_cache.json");

        let mut cache = VoiceCache::load(&path, &storage).await?;
        cache.flush(&storage).await?;
        assert!(!path.exists());
        Ok(())
    }
}
