//! Mapping playback position to the word being recited.
//!
//! Timing segments are matched by time first. Reciters sometimes go back and
//! repeat part of a verse, which makes the stored word index jump backwards;
//! in [`HighlightMode::Ordinal`] the Nth segment in time order therefore maps
//! to the Nth word on the page instead.

use crate::config::HighlightMode;
use crate::page::AyahRef;
use crate::timing::AudioSegment;
use std::fmt;

/// Identifies one word of one ayah, rendered as `surah:ayah:word`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordId {
    pub surah: u16,
    pub ayah: u16,
    pub word: u32,
}

impl WordId {
    #[must_use]
    pub const fn new(surah: u16, ayah: u16, word: u32) -> Self {
        Self { surah, ayah, word }
    }
}

impl fmt::Display for WordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.surah, self.ayah, self.word)
    }
}

/// Index of the segment active at `position_ms`.
///
/// A segment containing the position wins. Otherwise the segment with the
/// nearest boundary is chosen if it lies within `tolerance_ms`.
#[must_use]
pub fn active_segment(segments: &[AudioSegment], position_ms: u64, tolerance_ms: u64) -> Option<usize> {
    if let Some(idx) = segments.iter().position(|s| s.contains(position_ms)) {
        return Some(idx);
    }

    segments
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.distance(position_ms), idx))
        .min()
        .filter(|(distance, _)| *distance <= tolerance_ms)
        .map(|(_, idx)| idx)
}

/// Word to highlight for `ayah` at `position_ms`, if any
#[must_use]
pub fn highlighted_word(
    ayah: AyahRef,
    segments: &[AudioSegment],
    position_ms: u64,
    tolerance_ms: u64,
    mode: HighlightMode,
) -> Option<WordId> {
    if ayah.word_count == 0 {
        return None;
    }
    let idx = active_segment(segments, position_ms, tolerance_ms)?;

    let word = match mode {
        HighlightMode::Ordinal => u32::try_from(idx + 1).unwrap_or(u32::MAX),
        HighlightMode::RawWordIndex => segments[idx].word_index.max(1),
    };

    Some(WordId::new(ayah.surah, ayah.ayah, word.min(ayah.word_count)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: u64 = 500;

    fn three_words() -> Vec<AudioSegment> {
        vec![
            AudioSegment::new(1, 0, 500),
            AudioSegment::new(2, 500, 1000),
            AudioSegment::new(3, 1000, 1500),
        ]
    }

    fn word_at(segments: &[AudioSegment], word_count: u32, position_ms: u64) -> Option<u32> {
        highlighted_word(
            AyahRef::new(1, 2, word_count),
            segments,
            position_ms,
            TOLERANCE,
            HighlightMode::Ordinal,
        )
        .map(|w| w.word)
    }

    #[test]
    fn test_position_inside_segment() {
        assert_eq!(word_at(&three_words(), 3, 700), Some(2));
        assert_eq!(word_at(&three_words(), 3, 0), Some(1));
        assert_eq!(word_at(&three_words(), 3, 1000), Some(3));
    }

    #[test]
    fn test_position_after_last_within_tolerance() {
        assert_eq!(word_at(&three_words(), 3, 1600), Some(3));
        assert_eq!(word_at(&three_words(), 3, 2000), Some(3));
    }

    #[test]
    fn test_position_beyond_tolerance() {
        assert_eq!(word_at(&three_words(), 3, 50_000), None);
        assert_eq!(word_at(&three_words(), 3, 2001), None);
    }

    #[test]
    fn test_gap_picks_nearest_boundary() {
        let segments = vec![AudioSegment::new(1, 0, 400), AudioSegment::new(2, 1000, 1400)];
        assert_eq!(word_at(&segments, 2, 500), Some(1));
        assert_eq!(word_at(&segments, 2, 900), Some(2));
    }

    #[test]
    fn test_position_before_first_segment() {
        let segments = vec![AudioSegment::new(1, 300, 600)];
        assert_eq!(word_at(&segments, 1, 0), Some(1));
        let late = vec![AudioSegment::new(1, 900, 1200)];
        assert_eq!(word_at(&late, 1, 0), None);
    }

    #[test]
    fn test_ordinal_ignores_repeated_word_index() {
        // Reciter goes back to word 2 after word 3
        let segments = vec![
            AudioSegment::new(1, 0, 500),
            AudioSegment::new(2, 500, 1000),
            AudioSegment::new(3, 1000, 1500),
            AudioSegment::new(2, 1500, 2000),
            AudioSegment::new(3, 2000, 2500),
            AudioSegment::new(4, 2500, 3000),
        ];
        assert_eq!(word_at(&segments, 6, 1700), Some(4));
        assert_eq!(word_at(&segments, 6, 2700), Some(6));

        let raw = highlighted_word(
            AyahRef::new(1, 2, 6),
            &segments,
            1700,
            TOLERANCE,
            HighlightMode::RawWordIndex,
        );
        assert_eq!(raw, Some(WordId::new(1, 2, 2)));
    }

    #[test]
    fn test_ordinal_clamped_to_word_count() {
        assert_eq!(word_at(&three_words(), 2, 1200), Some(2));
    }

    #[test]
    fn test_no_segments_or_words() {
        assert_eq!(word_at(&[], 3, 100), None);
        assert_eq!(word_at(&three_words(), 0, 100), None);
    }

    #[test]
    fn test_word_id_display() {
        assert_eq!(WordId::new(2, 255, 7).to_string(), "2:255:7");
    }
}
