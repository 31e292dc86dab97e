//! Assembled page model.
//!
//! A [`MushafPage`] is what the assembler produces from one page's layout rows
//! and the words they reference. Verses are modeled twice: once as
//! [`PageAyah`] values (one per verse, owning its per-line segments) and once
//! as a per-line index into those segments for line-by-line rendering.

use std::collections::BTreeMap;

/// Unicode basmallah used when a basmallah line carries no word range.
pub const BASMALLAH_TEXT: &str = "بِسۡمِ ٱللَّهِ ٱلرَّحۡمَٰنِ ٱلرَّحِيمِ";

/// Separator placed between consecutive words of a line.
pub const WORD_SEPARATOR: char = ' ';

/// A row of the word table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub id: i64,
    pub text: String,
    pub surah: u16,
    pub ayah: u16,
}

/// Kind of a physical line on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineType {
    Ayah,
    Basmallah,
    SurahName,
}

impl LineType {
    /// Parse the `line_type` column. Unknown values yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ayah" => Some(Self::Ayah),
            "basmallah" | "besmellah" | "bismillah" => Some(Self::Basmallah),
            "surah_name" => Some(Self::SurahName),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ayah => "ayah",
            Self::Basmallah => "basmallah",
            Self::SurahName => "surah_name",
        }
    }
}

/// A row of the page layout table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutLine {
    pub page_number: u32,
    pub line_number: u32,
    pub line_type: LineType,
    pub is_centered: bool,
    pub surah_number: Option<u16>,
    /// Inclusive word id range shown on this line
    pub word_range: Option<(i64, i64)>,
}

/// A single word inside an [`AyahSegment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AyahWord {
    pub text: String,
    /// 1-based position of the word within its ayah on this page
    pub word_index: u32,
    /// Char offsets within the segment text
    pub start_index: usize,
    pub end_index: usize,
}

/// The part of an ayah that sits on one physical line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AyahSegment {
    pub line_number: u32,
    /// Segment words; followed by the word separator unless `is_end`
    pub text: String,
    /// Char offsets of the segment's words within the line text
    pub start_index: usize,
    pub end_index: usize,
    pub is_start: bool,
    pub is_end: bool,
    pub words: Vec<AyahWord>,
}

/// Whether an ayah group holds a verse or a standalone basmallah
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AyahKind {
    Basmallah,
    Verse,
}

/// One verse (or basmallah) as it appears on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAyah {
    pub surah: u16,
    pub ayah: u16,
    pub kind: AyahKind,
    pub text: String,
    pub segments: Vec<AyahSegment>,
    pub start_line_number: u32,
    pub end_line_number: u32,
}

impl PageAyah {
    /// Number of words of this ayah shown on the page.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.words.len()).sum()
    }

    /// Iterate the ayah's words in reading order.
    pub fn words(&self) -> impl Iterator<Item = &AyahWord> {
        self.segments.iter().flat_map(|s| s.words.iter())
    }

    #[must_use]
    pub const fn is_basmallah(&self) -> bool {
        matches!(self.kind, AyahKind::Basmallah)
    }

    /// Engine-facing handle for this ayah
    #[must_use]
    pub fn to_ref(&self) -> AyahRef {
        AyahRef {
            surah: self.surah,
            ayah: self.ayah,
            word_count: u32::try_from(self.word_count()).unwrap_or(u32::MAX),
        }
    }
}

/// Minimal view of an ayah used by the playback engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AyahRef {
    pub surah: u16,
    pub ayah: u16,
    pub word_count: u32,
}

impl AyahRef {
    #[must_use]
    pub const fn new(surah: u16, ayah: u16, word_count: u32) -> Self {
        Self {
            surah,
            ayah,
            word_count,
        }
    }
}

impl std::fmt::Display for AyahRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.surah, self.ayah)
    }
}

/// Reference to a segment owned by one of the page's ayahs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRef {
    /// Index into [`MushafPage::ayahs`]
    pub ayah: usize,
    /// Index into that ayah's segments
    pub segment: usize,
}

/// A fully assembled page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MushafPage {
    pub page_number: u32,
    pub lines: Vec<LayoutLine>,
    pub ayahs: Vec<PageAyah>,
    /// Segments shown on each line, in reading order
    pub line_segments: BTreeMap<u32, Vec<SegmentRef>>,
}

impl MushafPage {
    /// A page with no lines, substituted when the layout has no rows for it.
    #[must_use]
    pub const fn empty(page_number: u32) -> Self {
        Self {
            page_number,
            lines: Vec::new(),
            ayahs: Vec::new(),
            line_segments: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Segments on a line, resolved against the owning ayahs
    pub fn segments_on_line(&self, line_number: u32) -> impl Iterator<Item = (&PageAyah, &AyahSegment)> {
        self.line_segments
            .get(&line_number)
            .into_iter()
            .flatten()
            .filter_map(|r| {
                let ayah = self.ayahs.get(r.ayah)?;
                Some((ayah, ayah.segments.get(r.segment)?))
            })
    }

    /// Verses to recite for this page, basmallah groups excluded
    #[must_use]
    pub fn recitation_queue(&self) -> Vec<AyahRef> {
        self.ayahs
            .iter()
            .filter(|a| !a.is_basmallah())
            .map(PageAyah::to_ref)
            .collect()
    }

    /// Find an ayah on this page
    #[must_use]
    pub fn ayah(&self, surah: u16, ayah: u16) -> Option<&PageAyah> {
        self.ayahs
            .iter()
            .find(|a| a.surah == surah && a.ayah == ayah && !a.is_basmallah())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, word_index: u32, start: usize) -> AyahWord {
        AyahWord {
            text: text.to_string(),
            word_index,
            start_index: start,
            end_index: start + text.chars().count(),
        }
    }

    fn sample_page() -> MushafPage {
        let basmallah = PageAyah {
            surah: 2,
            ayah: 1,
            kind: AyahKind::Basmallah,
            text: "b".to_string(),
            segments: vec![AyahSegment {
                line_number: 2,
                text: "b".to_string(),
                start_index: 0,
                end_index: 1,
                is_start: true,
                is_end: true,
                words: vec![word("b", 1, 0)],
            }],
            start_line_number: 2,
            end_line_number: 2,
        };
        let verse = PageAyah {
            surah: 2,
            ayah: 1,
            kind: AyahKind::Verse,
            text: "x y".to_string(),
            segments: vec![AyahSegment {
                line_number: 3,
                text: "x y".to_string(),
                start_index: 0,
                end_index: 3,
                is_start: true,
                is_end: true,
                words: vec![word("x", 1, 0), word("y", 2, 2)],
            }],
            start_line_number: 3,
            end_line_number: 3,
        };
        let mut line_segments = BTreeMap::new();
        line_segments.insert(2, vec![SegmentRef { ayah: 0, segment: 0 }]);
        line_segments.insert(3, vec![SegmentRef { ayah: 1, segment: 0 }]);
        MushafPage {
            page_number: 2,
            lines: Vec::new(),
            ayahs: vec![basmallah, verse],
            line_segments,
        }
    }

    #[test]
    fn test_line_type_parse() {
        assert_eq!(LineType::parse("ayah"), Some(LineType::Ayah));
        assert_eq!(LineType::parse(" Basmallah "), Some(LineType::Basmallah));
        assert_eq!(LineType::parse("surah_name"), Some(LineType::SurahName));
        assert_eq!(LineType::parse(""), None);
    }

    #[test]
    fn test_recitation_queue_skips_basmallah() {
        let page = sample_page();
        assert_eq!(page.recitation_queue(), vec![AyahRef::new(2, 1, 2)]);
    }

    #[test]
    fn test_ayah_lookup_ignores_basmallah() {
        let page = sample_page();
        let found = page.ayah(2, 1).unwrap();
        assert_eq!(found.kind, AyahKind::Verse);
        assert_eq!(found.word_count(), 2);
    }

    #[test]
    fn test_segments_on_line() {
        let page = sample_page();
        let on_line: Vec<_> = page.segments_on_line(3).collect();
        assert_eq!(on_line.len(), 1);
        assert_eq!(on_line[0].1.text, "x y");
        assert_eq!(page.segments_on_line(9).count(), 0);
    }

    #[test]
    fn test_ayah_ref_display() {
        assert_eq!(AyahRef::new(18, 110, 30).to_string(), "18:110");
    }

    #[test]
    fn test_empty_page() {
        let page = MushafPage::empty(605);
        assert!(page.is_empty());
        assert!(page.recitation_queue().is_empty());
    }
}
