use anyhow::{anyhow, bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::config::OutputFormat;

const FULL_SCALE: f64 = 32768.0;

pub fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// 16-bit integer PCM held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    spec: WavSpec,
    samples: Vec<i16>,
}

impl AudioClip {
    pub fn empty(spec: WavSpec) -> Self {
        Self {
            spec,
            samples: Vec::new(),
        }
    }

    pub fn silence(spec: WavSpec, millis: u64) -> Self {
        let frames = spec.sample_rate as u64 * millis / 1000;
        Self {
            spec,
            samples: vec![0; (frames * spec.channels as u64) as usize],
        }
    }

    pub fn from_samples(spec: WavSpec, samples: Vec<i16>) -> Self {
        Self { spec, samples }
    }

    /// Wraps raw little-endian 16-bit PCM as returned by the speech service.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            bail!("PCM payload has an odd length of {} bytes", bytes.len());
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            spec: pcm16_spec(sample_rate, channels),
            samples,
        })
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = WavReader::new(Cursor::new(bytes)).context("Not a readable WAV stream")?;
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
            bail!(
                "Unsupported WAV format: {} bits {:?}; expected 16-bit integer PCM",
                spec.bits_per_sample,
                spec.sample_format
            );
        }
        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Corrupt WAV sample data")?;
        Ok(Self { spec, samples })
    }

    pub fn from_wav_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_wav_bytes(&bytes).with_context(|| format!("Failed to decode {:?}", path))
    }

    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buf), self.spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(buf)
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn duration_ms(&self) -> u64 {
        let frames = self.samples.len() as u64 / self.spec.channels.max(1) as u64;
        frames * 1000 / self.spec.sample_rate.max(1) as u64
    }

    /// Appends `other`; both clips must share rate, channels and sample format.
    pub fn append(&mut self, other: &AudioClip) -> Result<()> {
        if self.spec != other.spec {
            bail!(
                "Audio format mismatch: {} Hz/{} ch vs {} Hz/{} ch",
                self.spec.sample_rate,
                self.spec.channels,
                other.spec.sample_rate,
                other.spec.channels
            );
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Loudness relative to full scale; `-inf` for digital silence.
    pub fn dbfs(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NEG_INFINITY;
        }
        let sum_sq: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum_sq / self.samples.len() as f64).sqrt();
        if rms == 0.0 {
            f64::NEG_INFINITY
        } else {
            20.0 * (rms / FULL_SCALE).log10()
        }
    }

    pub fn apply_gain(&mut self, db: f64) {
        let factor = 10f64.powf(db / 20.0);
        for s in &mut self.samples {
            *s = (*s as f64 * factor).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }

    /// Gain-shifts the clip so its loudness lands on `target_dbfs`. Silent
    /// clips are left alone.
    pub fn normalize_to(&mut self, target_dbfs: f64) {
        let current = self.dbfs();
        if current.is_finite() {
            self.apply_gain(target_dbfs - current);
        }
    }

    /// The first `millis` of the clip, or all of it when shorter.
    pub fn head(&self, millis: u64) -> AudioClip {
        let frames = self.spec.sample_rate as u64 * millis / 1000;
        let len = ((frames * self.spec.channels as u64) as usize).min(self.samples.len());
        AudioClip {
            spec: self.spec,
            samples: self.samples[..len].to_vec(),
        }
    }
}

/// Concatenates WAV byte streams of identical format into one WAV stream.
pub fn concat_wav_bytes(parts: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut iter = parts.iter();
    let first = iter.next().ok_or_else(|| anyhow!("Nothing to concatenate"))?;
    let mut combined = AudioClip::from_wav_bytes(first)?;
    for (i, part) in iter.enumerate() {
        let clip = AudioClip::from_wav_bytes(part).with_context(|| format!("Segment {}", i + 2))?;
        combined.append(&clip)?;
    }
    combined.to_wav_bytes()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track: Option<usize>,
}

impl Tags {
    fn info_fields(&self) -> Vec<(&'static [u8; 4], String)> {
        let mut fields = vec![
            (b"INAM", self.title.clone()),
            (b"IART", self.artist.clone()),
            (b"IPRD", self.album.clone()),
        ];
        if let Some(track) = self.track {
            fields.push((b"ITRK", track.to_string()));
        }
        fields.retain(|(_, v)| !v.is_empty());
        fields
    }

    fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |key: &str, value: &str| {
            if !value.is_empty() {
                args.push("-metadata".to_string());
                args.push(format!("{}={}", key, value));
            }
        };
        push("title", &self.title);
        push("artist", &self.artist);
        push("album", &self.album);
        if let Some(track) = self.track {
            push("track", &track.to_string());
        }
        args
    }
}

/// Appends a RIFF `LIST/INFO` chunk carrying `tags` and fixes the RIFF size.
/// The stream must hold a complete `data` chunk.
pub fn tag_wav_bytes(mut wav: Vec<u8>, tags: &Tags) -> Result<Vec<u8>> {
    let chunks = scan_riff(&mut Cursor::new(&wav))?;
    let data = chunks
        .iter()
        .find(|c| &c.id == b"data")
        .ok_or_else(|| anyhow!("WAV stream has no data chunk"))?;
    if data.offset + data.size as u64 > wav.len() as u64 {
        bail!("WAV data chunk is truncated");
    }
    let fields = tags.info_fields();
    if fields.is_empty() {
        return Ok(wav);
    }

    let mut list = Vec::new();
    list.extend_from_slice(b"INFO");
    for (id, value) in fields {
        let mut data = value.into_bytes();
        data.push(0);
        list.extend_from_slice(id);
        list.extend_from_slice(&(data.len() as u32).to_le_bytes());
        list.extend_from_slice(&data);
        if data.len() % 2 == 1 {
            list.push(0);
        }
    }

    if wav.len() % 2 == 1 {
        wav.push(0);
    }
    wav.extend_from_slice(b"LIST");
    wav.extend_from_slice(&(list.len() as u32).to_le_bytes());
    wav.extend_from_slice(&list);

    let riff_size = (wav.len() - 8) as u32;
    wav[4..8].copy_from_slice(&riff_size.to_le_bytes());
    Ok(wav)
}

struct RiffChunk {
    id: [u8; 4],
    offset: u64,
    size: u32,
}

fn scan_riff<R: Read + Seek>(f: &mut R) -> Result<Vec<RiffChunk>> {
    let mut id = [0u8; 4];
    f.read_exact(&mut id)?;
    if &id != b"RIFF" {
        return Err(anyhow!("Not a RIFF file"));
    }
    f.seek(SeekFrom::Current(4))?;
    f.read_exact(&mut id)?;
    if &id != b"WAVE" {
        return Err(anyhow!("Not a WAVE file"));
    }

    let mut chunks = Vec::new();
    loop {
        let mut chunk_id = [0u8; 4];
        let n = f.read(&mut chunk_id)?;
        if n == 0 {
            break;
        }
        if n < 4 {
            return Err(anyhow!("Unexpected EOF reading chunk ID"));
        }
        let mut size_buf = [0u8; 4];
        f.read_exact(&mut size_buf)?;
        let size = u32::from_le_bytes(size_buf);
        let offset = f.stream_position()?;
        chunks.push(RiffChunk {
            id: chunk_id,
            offset,
            size,
        });
        let padded = size as i64 + (size % 2) as i64;
        f.seek(SeekFrom::Current(padded))?;
    }
    Ok(chunks)
}

/// Reads back the `LIST/INFO` tags of a WAV stream.
#[cfg(test)]
pub fn read_wav_tags(wav: &[u8]) -> Result<Tags> {
    let mut cursor = Cursor::new(wav);
    let mut tags = Tags::default();
    for chunk in scan_riff(&mut cursor)? {
        if &chunk.id != b"LIST" {
            continue;
        }
        let start = chunk.offset as usize;
        let end = (start + chunk.size as usize).min(wav.len());
        let body = &wav[start..end];
        if body.len() < 4 || &body[0..4] != b"INFO" {
            continue;
        }
        let mut pos = 4;
        while pos + 8 <= body.len() {
            let id = &body[pos..pos + 4];
            let len = u32::from_le_bytes([body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]]) as usize;
            let data_end = (pos + 8 + len).min(body.len());
            let value = String::from_utf8_lossy(&body[pos + 8..data_end])
                .trim_end_matches('\0')
                .to_string();
            match id {
                b"INAM" => tags.title = value,
                b"IART" => tags.artist = value,
                b"IPRD" => tags.album = value,
                b"ITRK" => tags.track = value.parse().ok(),
                _ => {}
            }
            pos += 8 + len + len % 2;
        }
    }
    Ok(tags)
}

/// Writes `clip` to `path` in `format` with `tags` attached.
pub fn export_clip(
    clip: &AudioClip,
    path: &Path,
    format: OutputFormat,
    bitrate: &str,
    tags: &Tags,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    match format {
        OutputFormat::Wav => {
            let bytes = tag_wav_bytes(clip.to_wav_bytes()?, tags)?;
            fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
        }
        OutputFormat::Mp3 => encode_mp3(clip, path, bitrate, tags)?,
    }
    Ok(())
}

fn encode_mp3(clip: &AudioClip, path: &Path, bitrate: &str, tags: &Tags) -> Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".src.wav");
    let staging = PathBuf::from(staging);
    fs::write(&staging, clip.to_wav_bytes()?)
        .with_context(|| format!("Failed to write {:?}", staging))?;

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(&staging)
        .args(["-f", "mp3", "-b:a", bitrate])
        .args(tags.ffmpeg_args())
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to spawn ffmpeg; is it installed and on PATH?");
    let _ = fs::remove_file(&staging);
    let output = output?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffmpeg conversion failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(samples: &[i16]) -> AudioClip {
        AudioClip::from_samples(pcm16_spec(8_000, 1), samples.to_vec())
    }

    #[test]
    fn test_wav_bytes_roundtrip_keeps_samples() -> Result<()> {
        let original = clip(&[0, 100, -100, i16::MAX, i16::MIN]);
        let decoded = AudioClip::from_wav_bytes(&original.to_wav_bytes()?)?;
        assert_eq!(decoded, original);
        Ok(())
    }

    #[test]
    fn test_from_pcm16_le() -> Result<()> {
        let clip = AudioClip::from_pcm16_le(&[0x01, 0x00, 0xff, 0xff], 24_000, 1)?;
        assert_eq!(clip.samples(), &[1, -1]);
        assert_eq!(clip.spec().sample_rate, 24_000);
        assert!(AudioClip::from_pcm16_le(&[0x01], 24_000, 1).is_err());
        Ok(())
    }

    #[test]
    fn test_append_rejects_mismatched_formats() {
        let mut a = clip(&[1, 2]);
        let b = AudioClip::from_samples(pcm16_spec(16_000, 1), vec![3]);
        assert!(a.append(&b).is_err());
        a.append(&clip(&[3])).unwrap();
        assert_eq!(a.samples(), &[1, 2, 3]);
    }

    #[test]
    fn test_concat_wav_bytes_in_order() -> Result<()> {
        let parts = vec![clip(&[1, 2]).to_wav_bytes()?, clip(&[3]).to_wav_bytes()?];
        let joined = AudioClip::from_wav_bytes(&concat_wav_bytes(&parts)?)?;
        assert_eq!(joined.samples(), &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_silence_and_duration() {
        let spec = pcm16_spec(8_000, 2);
        let gap = AudioClip::silence(spec, 250);
        assert_eq!(gap.samples().len(), 4_000);
        assert_eq!(gap.duration_ms(), 250);
        assert_eq!(gap.dbfs(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_normalize_hits_target() {
        let mut c = clip(&[1000, -1000, 1000, -1000]);
        c.normalize_to(-16.0);
        assert!((c.dbfs() + 16.0).abs() < 0.01, "got {}", c.dbfs());

        let mut quiet = clip(&[0, 0, 0]);
        quiet.normalize_to(-16.0);
        assert_eq!(quiet.samples(), &[0, 0, 0]);
    }

    #[test]
    fn test_gain_clamps() {
        let mut c = clip(&[20_000, -20_000]);
        c.apply_gain(12.0);
        assert_eq!(c.samples(), &[i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_head_is_bounded() {
        let c = AudioClip::silence(pcm16_spec(8_000, 1), 3_000);
        assert_eq!(c.head(1_000).duration_ms(), 1_000);
        assert_eq!(c.head(10_000).duration_ms(), 3_000);
    }

    #[test]
    fn test_tags_roundtrip_and_stay_playable() -> Result<()> {
        let tags = Tags {
            title: "Chapter 1".to_string(),
            artist: "A. Writer".to_string(),
            album: "The Book".to_string(),
            track: Some(1),
        };
        let original = clip(&[5, 6, 7]);
        let tagged = tag_wav_bytes(original.to_wav_bytes()?, &tags)?;

        assert_eq!(read_wav_tags(&tagged)?, tags);
        let riff_size = u32::from_le_bytes([tagged[4], tagged[5], tagged[6], tagged[7]]) as usize;
        assert_eq!(riff_size, tagged.len() - 8);
        assert_eq!(AudioClip::from_wav_bytes(&tagged)?, original);
        Ok(())
    }

    #[test]
    fn test_tagging_rejects_broken_streams() -> Result<()> {
        let tags = Tags { title: "T".to_string(), ..Default::default() };
        assert!(tag_wav_bytes(b"not a wav file".to_vec(), &tags).is_err());

        let mut truncated = clip(&[1, 2, 3, 4]).to_wav_bytes()?;
        truncated.truncate(truncated.len() - 4);
        assert!(tag_wav_bytes(truncated, &tags).is_err());
        Ok(())
    }

    #[test]
    fn test_export_wav_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("nested/01_Chapter.wav");
        let tags = Tags { title: "T".to_string(), ..Default::default() };
        export_clip(&clip(&[9, 9]), &path, OutputFormat::Wav, "128k", &tags)?;

        let bytes = fs::read(&path)?;
        assert_eq!(read_wav_tags(&bytes)?.title, "T");
        assert_eq!(AudioClip::from_wav_file(&path)?.samples(), &[9, 9]);
        Ok(())
    }
}
