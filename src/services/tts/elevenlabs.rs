use super::{CatalogVoice, SpeechClient};
use crate::core::config::RunConfig;
use crate::core::error::SynthesisError;
use crate::utils::audio::AudioClip;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

const API_KEY_HEADER: &str = "xi-api-key";

#[derive(Deserialize)]
struct VoicesResponse {
    voices: Vec<CatalogVoice>,
}

pub struct ElevenLabsClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    model_limit: usize,
    sample_rate: u32,
}

impl ElevenLabsClient {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: parse_base_url(&config.base_url)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            model_limit: config.model_limit,
            sample_rate: config.audio.sample_rate,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn synthesis_url(&self, voice_id: &str) -> Result<Url> {
        let mut url = self.endpoint(&["text-to-speech", voice_id])?;
        url.query_pairs_mut()
            .append_pair("output_format", &format!("pcm_{}", self.sample_rate));
        Ok(url)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid base_url {:?}", raw))?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("Invalid base_url {:?}", raw));
    }
    Ok(url)
}

/// Rate limiting and server-side failures are worth another try; anything
/// else the service refused is final.
fn classify_status(status: StatusCode, body: String) -> SynthesisError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        SynthesisError::Transient(format!("{}: {}", status, body))
    } else {
        SynthesisError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl SpeechClient for ElevenLabsClient {
    async fn list_voices(&self) -> Result<Vec<CatalogVoice>> {
        let url = self.endpoint(&["voices"])?;
        let resp = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .context("Failed to request the voice catalog")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Voice catalog request failed ({}): {}", status, body));
        }
        let parsed: VoicesResponse = resp
            .json()
            .await
            .context("Failed to parse the voice catalog")?;
        Ok(parsed.voices)
    }

    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let len = text.chars().count();
        if len > self.model_limit {
            return Err(SynthesisError::TextTooLong {
                len,
                limit: self.model_limit,
            });
        }

        let url = self
            .synthesis_url(voice_id)
            .map_err(|e| SynthesisError::Rejected { status: 0, body: e.to_string() })?;
        debug!("POST {} ({} chars)", url.path(), len);

        let resp = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({ "text": text, "model_id": self.model }))
            .send()
            .await
            .map_err(|e| SynthesisError::Transient(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let pcm = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transient(format!("reading audio failed: {}", e)))?;
        if pcm.is_empty() {
            return Err(SynthesisError::Transient("empty audio payload".to_string()));
        }

        AudioClip::from_pcm16_le(&pcm, self.sample_rate, 1)
            .and_then(|clip| clip.to_wav_bytes())
            .map_err(|e| SynthesisError::Audio(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BookConfig, Config};

    fn client(base_url: &str, model: &str) -> ElevenLabsClient {
        let config = Config {
            api_key: "key".to_string(),
            input_path: "book.txt".to_string(),
            book: BookConfig {
                title: "T".to_string(),
                author: "A".to_string(),
            },
            voices: vec!["Demetri".to_string(), "Diana".to_string()],
            model: model.to_string(),
            base_url: base_url.to_string(),
            ..Config::default()
        };
        ElevenLabsClient::new(&config.validate().unwrap()).unwrap()
    }

    #[test]
    fn test_urls() {
        let c = client("https://api.elevenlabs.io/v1", "eleven_turbo_v2_5");
        assert_eq!(
            c.endpoint(&["voices"]).unwrap().as_str(),
            "https://api.elevenlabs.io/v1/voices"
        );
        assert_eq!(
            c.synthesis_url("abc123").unwrap().as_str(),
            "https://api.elevenlabs.io/v1/text-to-speech/abc123?output_format=pcm_24000"
        );

        let trailing = client("http://localhost:9000/v1/", "eleven_turbo_v2_5");
        assert_eq!(
            trailing.endpoint(&["voices"]).unwrap().as_str(),
            "http://localhost:9000/v1/voices"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, String::new()).is_retryable());
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key".to_string()),
            SynthesisError::Rejected { status: 401, body: "bad key".to_string() }
        );
    }

    #[tokio::test]
    async fn test_ceiling_checked_before_sending() {
        // Unroutable host: the request must never be attempted.
        let c = client("http://127.0.0.1:9/v1", "eleven_multilingual_v2");
        let text = "x".repeat(10_001);
        let err = c.synthesize("vid", &text).await.unwrap_err();
        assert_eq!(err, SynthesisError::TextTooLong { len: 10_001, limit: 10_000 });
    }
}
