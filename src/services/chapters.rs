use crate::services::narration::has_speakable_text;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^(?:chapter|part|kapitel)\b[^\n]*$|^[ \t]*#[^\n]+$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based ordinal in document order.
    pub index: usize,
    pub text: String,
}

/// Splits a normalized manuscript at heading lines. Each heading opens a new
/// chapter and stays in its text so it gets spoken. Text before the first
/// heading becomes its own chapter when it has something to read. Sections
/// made only of scene-break ornaments are skipped before numbering.
pub fn split_chapters(text: &str) -> Vec<Chapter> {
    let mut starts: Vec<usize> = HEADING.find_iter(text).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    let mut chapters = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let part = text[start..end].trim();
        if part.is_empty() {
            continue;
        }
        if !has_speakable_text(part) {
            warn!("Skipping section without speakable text: {:?}", part);
            continue;
        }
        chapters.push(Chapter {
            index: chapters.len() + 1,
            text: part.to_string(),
        });
    }

    if chapters.is_empty() {
        chapters.push(Chapter {
            index: 1,
            text: text.trim().to_string(),
        });
    }
    chapters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_headings_is_one_chapter() {
        let chapters = split_chapters("Just a story.\n\nWith two paragraphs.");
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].index, 1);
        assert_eq!(chapters[0].text, "Just a story.\n\nWith two paragraphs.");
    }

    #[test]
    fn test_headings_start_chapters() {
        let text = "Chapter 1\nFirst.\n\nCHAPTER 2: Later\nSecond.\n\nPart Three\nThird.";
        let chapters = split_chapters(text);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].text, "Chapter 1\nFirst.");
        assert_eq!(chapters[1].text, "CHAPTER 2: Later\nSecond.");
        assert_eq!(chapters[2].text, "Part Three\nThird.");
        assert_eq!(
            chapters.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_preface_becomes_first_chapter() {
        let text = "A preface.\n\n# One\nBody one.\n\nKapitel 2\nBody two.";
        let chapters = split_chapters(text);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].text, "A preface.");
        assert_eq!(chapters[1].text, "# One\nBody one.");
        assert_eq!(chapters[2].text, "Kapitel 2\nBody two.");
    }

    #[test]
    fn test_keyword_needs_word_boundary_and_line_start() {
        let text = "Chapterhouse is a word.\nThe chapter continues.\nParticular things.";
        assert_eq!(split_chapters(text).len(), 1);
    }

    #[test]
    fn test_ornament_only_section_is_not_a_chapter() {
        let chapters = split_chapters("***\n\nChapter 1\nHello there.\n\nChapter 2\nBye.");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].index, 1);
        assert_eq!(chapters[0].text, "Chapter 1\nHello there.");
        assert_eq!(chapters[1].index, 2);
    }

    #[test]
    fn test_chapters_cover_all_text() {
        let text = "Intro.\n\nChapter 1\nA.\n\nChapter 2\nB.";
        let chapters = split_chapters(text);
        let joined: String = chapters.iter().map(|c| c.text.as_str()).collect();
        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(strip(&joined), strip(text));
    }
}
