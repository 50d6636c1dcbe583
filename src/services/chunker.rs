use once_cell::sync::Lazy;
use regex::Regex;

// A sentence runs up to terminal punctuation plus any closing quotes or
// brackets and trailing whitespace; an unterminated tail is its own sentence.
static SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[^.!?…]*[.!?…]+["'’”»)\]]*\s*|[^.!?…]+$"#).unwrap()
});

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Sentence-like units covering `text` end to end.
pub fn sentences(text: &str) -> Vec<&str> {
    let found: Vec<&str> = SENTENCE.find_iter(text).map(|m| m.as_str()).collect();
    if found.is_empty() && !text.is_empty() {
        vec![text]
    } else {
        found
    }
}

/// Packs sentences into chunks of at most `max_chars` characters. A sentence
/// longer than the cap is sliced into cap-sized pieces.
///
/// `max_chars` must be at least 1.
pub fn sentence_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0;

    for sentence in sentences(text) {
        let len = char_len(sentence);
        if buf_len + len <= max_chars {
            buf.push_str(sentence);
            buf_len += len;
            continue;
        }

        flush(&mut chunks, &buf);
        buf.clear();
        buf_len = 0;

        if len <= max_chars {
            buf.push_str(sentence);
            buf_len = len;
        } else {
            hard_slice(&mut chunks, sentence, max_chars);
        }
    }
    flush(&mut chunks, &buf);
    chunks
}

fn flush(chunks: &mut Vec<String>, buf: &str) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn hard_slice(chunks: &mut Vec<String>, sentence: &str, max_chars: usize) {
    let chars: Vec<char> = sentence.chars().collect();
    for piece in chars.chunks(max_chars) {
        let piece: String = piece.iter().collect();
        flush(chunks, &piece);
    }
}
