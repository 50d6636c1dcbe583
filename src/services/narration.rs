use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many leading lines of a chapter are searched for voice B's name.
pub const OPENING_SCAN_LINES: usize = 3;

/// A run of asterisk-like glyphs, each optionally followed by whitespace,
/// NBSP, zero-width characters or a BOM. Every three glyphs in a run count as
/// one scene break.
static SCENE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[*\x{2217}\x{204E}\x{FF0A}][\s\x{00A0}\x{200B}\x{200C}\x{200D}\x{2060}\x{FEFF}]*){3,}")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceSlot {
    A,
    B,
}

impl VoiceSlot {
    pub fn toggled(self) -> Self {
        match self {
            VoiceSlot::A => VoiceSlot::B,
            VoiceSlot::B => VoiceSlot::A,
        }
    }
}

/// A resolved narrator voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub display_name: String,
    pub provider_voice_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePair {
    pub a: Voice,
    pub b: Voice,
}

impl VoicePair {
    pub fn get(&self, slot: VoiceSlot) -> &Voice {
        match slot {
            VoiceSlot::A => &self.a,
            VoiceSlot::B => &self.b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarratorSpan {
    pub voice: VoiceSlot,
    pub text: String,
}

/// Picks the voice that opens a chapter: B when B's display name shows up in
/// the first few lines, A otherwise. A heuristic only; a name mentioned in
/// early dialogue will flip the chapter to B.
pub fn detect_opening_voice(chapter_text: &str, voice_b_name: &str) -> VoiceSlot {
    let needle = voice_b_name.trim().to_lowercase();
    if needle.is_empty() {
        return VoiceSlot::A;
    }
    let header = chapter_text
        .lines()
        .take(OPENING_SCAN_LINES)
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    if header.contains(&needle) {
        VoiceSlot::B
    } else {
        VoiceSlot::A
    }
}

/// Cuts a chapter at scene breaks and alternates the voice across the pieces.
/// Empty pieces still flip the voice for whatever follows them, so a run of
/// six glyphs hands the next text back to the voice before it.
pub fn split_narrator_spans(chapter_text: &str, opening: VoiceSlot) -> Vec<NarratorSpan> {
    let mut spans = Vec::new();
    let mut current = opening;
    let mut cursor = 0;

    for run in SCENE_BREAK.find_iter(chapter_text) {
        push_span(&mut spans, &chapter_text[cursor..run.start()], current);
        let breaks = run.as_str().chars().filter(|c| is_break_glyph(*c)).count() / 3;
        for _ in 0..breaks {
            current = current.toggled();
        }
        cursor = run.end();
    }
    push_span(&mut spans, &chapter_text[cursor..], current);
    spans
}

fn push_span(spans: &mut Vec<NarratorSpan>, fragment: &str, voice: VoiceSlot) {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        spans.push(NarratorSpan {
            voice,
            text: fragment.to_string(),
        });
    }
}

fn is_break_glyph(c: char) -> bool {
    matches!(c, '*' | '\u{2217}' | '\u{204E}' | '\u{FF0A}')
}

/// Whether anything besides scene-break glyphs and whitespace is left to read.
pub fn has_speakable_text(text: &str) -> bool {
    !SCENE_BREAK.replace_all(text, "").trim().is_empty()
}

#[cfg(test)]
pub fn contains_scene_break(text: &str) -> bool {
    SCENE_BREAK.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices(spans: &[NarratorSpan]) -> Vec<VoiceSlot> {
        spans.iter().map(|s| s.voice).collect()
    }

    #[test]
    fn test_no_marker_single_span() {
        let spans = split_narrator_spans("  One scene only.  ", VoiceSlot::B);
        assert_eq!(
            spans,
            vec![NarratorSpan { voice: VoiceSlot::B, text: "One scene only.".to_string() }]
        );
    }

    #[test]
    fn test_two_markers_alternate_from_a() {
        let text = "First.\n\n***\n\nSecond.\n\n* * *\n\nThird.";
        let spans = split_narrator_spans(text, VoiceSlot::A);
        assert_eq!(voices(&spans), vec![VoiceSlot::A, VoiceSlot::B, VoiceSlot::A]);
        assert_eq!(spans[1].text, "Second.");
    }

    #[test]
    fn test_marker_tolerates_invisible_characters() {
        let text = "Before.\n*\u{200B}*\u{00A0}*\nAfter.\n\u{FF0A} \u{FF0A} \u{FF0A}\nLast.";
        let spans = split_narrator_spans(text, VoiceSlot::A);
        assert_eq!(spans.len(), 3);
        for span in &spans {
            assert!(!span.text.contains('*'));
            assert!(!span.text.contains('\u{FF0A}'));
            assert!(!contains_scene_break(&span.text));
        }
    }

    #[test]
    fn test_empty_fragments_still_toggle() {
        // Leading marker: the empty first piece belongs to A, so text opens with B.
        let spans = split_narrator_spans("***\nOne.\n***\n***\nTwo.", VoiceSlot::A);
        assert_eq!(voices(&spans), vec![VoiceSlot::B, VoiceSlot::B]);
        assert_eq!(spans[0].text, "One.");
        assert_eq!(spans[1].text, "Two.");
    }

    #[test]
    fn test_long_asterisk_runs() {
        let spans = split_narrator_spans("One.\n****\nTwo.", VoiceSlot::A);
        assert_eq!(voices(&spans), vec![VoiceSlot::A, VoiceSlot::B]);
        assert_eq!(spans[1].text, "Two.");

        let spans = split_narrator_spans("One.\n******\nTwo.", VoiceSlot::A);
        assert_eq!(voices(&spans), vec![VoiceSlot::A, VoiceSlot::A]);
    }

    #[test]
    fn test_single_asterisks_are_spoken() {
        let spans = split_narrator_spans("He was *very* sure.", VoiceSlot::A);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "He was *very* sure.");
    }

    #[test]
    fn test_has_speakable_text() {
        assert!(!has_speakable_text("***"));
        assert!(!has_speakable_text(" * * *\n\u{FF0A}\u{FF0A}\u{FF0A} "));
        assert!(has_speakable_text("***\nChapter 1"));
        assert!(has_speakable_text("He was *very* sure."));
    }

    #[test]
    fn test_detect_opening_voice() {
        assert_eq!(
            detect_opening_voice("Chapter 2\nDIANA.\nThe rain fell.", "Diana"),
            VoiceSlot::B
        );
        assert_eq!(
            detect_opening_voice("Chapter 2\nDemetri.\nThe rain fell.", "Diana"),
            VoiceSlot::A
        );
        // Beyond the scanned lines.
        assert_eq!(
            detect_opening_voice("Chapter 2\none\ntwo\nDiana said hi.", "Diana"),
            VoiceSlot::A
        );
    }
}
