pub mod elevenlabs;

use crate::core::error::{PipelineError, SynthesisError};
use crate::core::io::Storage;
use crate::core::voice_cache::VoiceCache;
use crate::services::narration::{Voice, VoicePair};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;

/// One entry of the provider's voice catalog.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CatalogVoice {
    pub name: String,
    pub voice_id: String,
}

#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<CatalogVoice>>;

    /// Synthesizes `text` with `voice_id` and returns a complete WAV stream.
    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// Maps the two configured display names to provider voice ids. The cache is
/// consulted first; the catalog is fetched at most once and only when a name
/// is unknown. Matching is case-insensitive.
pub async fn resolve_voices(
    client: &dyn SpeechClient,
    cache: &mut VoiceCache,
    voice_a: &str,
    voice_b: &str,
    storage: &dyn Storage,
) -> Result<VoicePair> {
    let names = [voice_a, voice_b];
    let mut ids: [Option<String>; 2] = [
        cache.get(voice_a).map(str::to_string),
        cache.get(voice_b).map(str::to_string),
    ];

    if ids.iter().any(Option::is_none) {
        info!("Fetching voice catalog...");
        let catalog = client.list_voices().await?;
        debug!("Catalog holds {} voice(s)", catalog.len());
        for (name, id) in names.iter().zip(ids.iter_mut()) {
            if id.is_some() {
                continue;
            }
            if let Some(found) = catalog.iter().find(|v| v.name.eq_ignore_ascii_case(name)) {
                cache.insert(name, &found.voice_id);
                *id = Some(found.voice_id.clone());
            }
        }
    }

    let missing: Vec<String> = names
        .iter()
        .zip(ids.iter())
        .filter(|(_, id)| id.is_none())
        .map(|(name, _)| name.to_string())
        .collect();
    // Ids found in this run are kept even when the other name is missing.
    cache.flush(storage).await?;
    if !missing.is_empty() {
        return Err(PipelineError::VoiceResolution { missing }.into());
    }

    let [id_a, id_b] = ids;
    Ok(VoicePair {
        a: Voice {
            display_name: voice_a.to_string(),
            provider_voice_id: id_a.unwrap_or_default(),
        },
        b: Voice {
            display_name: voice_b.to_string(),
            provider_voice_id: id_b.unwrap_or_default(),
        },
    })
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::utils::audio::{pcm16_spec, AudioClip};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    pub const MOCK_SAMPLE_RATE: u32 = 8_000;
    const SAMPLES_PER_CHAR: usize = 4;

    /// Deterministic stand-in for the speech service: every character becomes
    /// a few samples derived from its code point.
    #[derive(Clone, Default)]
    pub struct MockSpeechClient {
        pub catalog: Vec<CatalogVoice>,
        pub list_calls: Arc<Mutex<usize>>,
        pub requests: Arc<Mutex<Vec<(String, String)>>>,
        pub in_flight: Arc<AtomicUsize>,
        pub max_in_flight: Arc<AtomicUsize>,
        /// Texts longer than this fail transiently on every attempt.
        pub fail_longer_than: Option<usize>,
        /// Texts containing this marker are rejected outright.
        pub reject_marker: Option<String>,
        /// Random per-call delay upper bound, in milliseconds.
        pub max_delay_ms: u64,
    }

    impl MockSpeechClient {
        pub fn with_voices(names: &[(&str, &str)]) -> Self {
            Self {
                catalog: names
                    .iter()
                    .map(|(name, id)| CatalogVoice {
                        name: name.to_string(),
                        voice_id: id.to_string(),
                    })
                    .collect(),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn render(text: &str) -> AudioClip {
            let samples = text
                .chars()
                .flat_map(|c| std::iter::repeat((c as u32 % 2_000) as i16 + 500).take(SAMPLES_PER_CHAR))
                .collect();
            AudioClip::from_samples(pcm16_spec(MOCK_SAMPLE_RATE, 1), samples)
        }
    }

    #[async_trait]
    impl SpeechClient for MockSpeechClient {
        async fn list_voices(&self) -> Result<Vec<CatalogVoice>> {
            *self.list_calls.lock().unwrap() += 1;
            Ok(self.catalog.clone())
        }

        async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Vec<u8>, SynthesisError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push((voice_id.to_string(), text.to_string()));

            let delay = if self.max_delay_ms > 0 {
                rand::random::<u64>() % self.max_delay_ms
            } else {
                1
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(marker) = &self.reject_marker {
                if text.contains(marker.as_str()) {
                    return Err(SynthesisError::Rejected {
                        status: 422,
                        body: "unprocessable".to_string(),
                    });
                }
            }
            if let Some(limit) = self.fail_longer_than {
                if text.chars().count() > limit {
                    return Err(SynthesisError::Transient("503 Service Unavailable".to_string()));
                }
            }
            Self::render(text)
                .to_wav_bytes()
                .map_err(|e| SynthesisError::Audio(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockSpeechClient;
    use super::*;
    use crate::core::io::NativeStorage;

    #[tokio::test]
    async fn test_resolve_uses_catalog_then_cache() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let cache_path = temp_dir.path().join("voices_cache.json");
        let client = MockSpeechClient::with_voices(&[("Demetri", "id-d"), ("DIANA", "id-x")]);

        let mut cache = VoiceCache::load(&cache_path, &storage).await?;
        let pair = resolve_voices(&client, &mut cache, "Demetri", "Diana", &storage).await?;
        assert_eq!(pair.a.provider_voice_id, "id-d");
        assert_eq!(pair.b.provider_voice_id, "id-x");
        assert_eq!(pair.b.display_name, "Diana");
        assert_eq!(*client.list_calls.lock().unwrap(), 1);

        let mut reloaded = VoiceCache::load(&cache_path, &storage).await?;
        let again = resolve_voices(&client, &mut reloaded, "Demetri", "Diana", &storage).await?;
        assert_eq!(again, pair);
        assert_eq!(*client.list_calls.lock().unwrap(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_voice_is_reported() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let client = MockSpeechClient::with_voices(&[("Demetri", "id-d")]);
        let mut cache = VoiceCache::empty(temp_dir.path().join("cache.json"));

        let err = resolve_voices(&client, &mut cache, "Demetri", "Nobody", &storage)
            .await
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::VoiceResolution { missing }) => {
                assert_eq!(missing, &vec!["Nobody".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }

        let reloaded = VoiceCache::load(temp_dir.path().join("cache.json"), &storage).await?;
        assert_eq!(reloaded.get("Demetri"), Some("id-d"));
        assert_eq!(reloaded.get("Nobody"), None);
        Ok(())
    }
}
