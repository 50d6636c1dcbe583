use crate::core::error::PipelineError;
use anyhow::{anyhow, Context, Result};
use epub::doc::EpubDoc;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

const HTML_WRAP_WIDTH: usize = 100_000;

static TRAILING_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+\n").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
// `*x*`, `**x**` or `***x***` around text that starts and ends with a visible
// character. Bare `***` or `* * *` lines never match.
static EMPHASIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*{1,3}([^\s*](?:[^*\n]*[^\s*])?)\*{1,3}").unwrap()
});

/// Decodes the manuscript at `path` into plain text, chosen by extension.
pub fn load_manuscript(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(PipelineError::Configuration(format!(
            "input_path not found: {}",
            path.display()
        ))
        .into());
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    info!("Loading manuscript {:?} (.{})", path, ext);

    match ext.as_str() {
        "txt" => {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        "md" | "markdown" => {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            Ok(strip_emphasis(&String::from_utf8_lossy(&bytes)))
        }
        "html" | "htm" | "xhtml" => {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            html_to_text(&bytes)
        }
        "epub" => load_epub(path),
        other => Err(PipelineError::Configuration(format!(
            "unsupported manuscript extension: .{}",
            other
        ))
        .into()),
    }
}

/// Removes asterisk emphasis markup so it cannot be mistaken for a scene
/// break. Standalone break lines are kept.
pub fn strip_emphasis(text: &str) -> String {
    EMPHASIS.replace_all(text, "$1").into_owned()
}

// html2text renders <b>/<em> back as asterisk emphasis.
fn html_to_text(html: &[u8]) -> Result<String> {
    html2text::from_read(html, HTML_WRAP_WIDTH)
        .map(|text| strip_emphasis(&text))
        .map_err(|e| anyhow!("Failed to convert HTML: {}", e))
}

fn load_epub(path: &Path) -> Result<String> {
    let mut doc = EpubDoc::new(path).map_err(|e| anyhow!("Failed to open epub {:?}: {:?}", path, e))?;

    let mut sections = Vec::new();
    loop {
        if let Some((content, mimetype)) = doc.get_current_str() {
            match mimetype.as_str() {
                "application/xhtml+xml" | "text/html" => {
                    let text = html_to_text(content.as_bytes())?;
                    if !text.trim().is_empty() {
                        sections.push(text);
                    }
                }
                _ => debug!("Skipping epub item with MIME type {}", mimetype),
            }
        }
        if !doc.go_next() {
            break;
        }
    }

    Ok(sections.join("\n\n"))
}

/// Unifies line endings, drops form feeds and soft hyphens, strips trailing
/// blanks and collapses runs of blank lines to one.
pub fn normalize_whitespace(text: &str) -> String {
    let s = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{000C}', '\u{00AD}'], "");
    let s = TRAILING_SPACE.replace_all(&s, "\n");
    let s = BLANK_RUN.replace_all(&s, "\n\n");
    s.trim().to_string()
}
