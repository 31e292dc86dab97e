//! Page assembly.
//!
//! The layout table records, per physical line, the inclusive range of word ids
//! shown on it. Verses are not stored anywhere; they are reconstructed here by
//! walking every line of a page, tagging each word with its verse, and
//! regrouping the words page-wide so a verse that wraps over several lines
//! becomes one [`PageAyah`] with one [`AyahSegment`] per line.

use crate::error::{CoreError, Result};
use crate::page::{
    AyahKind, AyahSegment, AyahWord, LayoutLine, LineType, MushafPage, PageAyah, SegmentRef, Word,
    BASMALLAH_TEXT, WORD_SEPARATOR,
};
use crate::renderer::Renderer;
use crate::store::{LayoutStore, WordStore};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const LOG_TARGET: &str = "mushaf::assembler";

/// Surah whose basmallah is itself a counted verse
const AL_FATIHAH: u16 = 1;

/// One word placed on a line, tagged with the verse it belongs to
#[derive(Debug)]
struct PlacedWord<'a> {
    surah: u16,
    ayah: u16,
    kind: AyahKind,
    text: &'a str,
    line_number: u32,
    /// Char offsets within the line text
    start_index: usize,
    end_index: usize,
}

type GroupKey = (u16, u16, AyahKind);

/// Builds [`MushafPage`]s for one renderer's store pair
pub struct PageAssembler {
    renderer: Renderer,
    words: Arc<WordStore>,
    layout: Arc<LayoutStore>,
    /// Number of `build_page` invocations
    builds: AtomicUsize,
}

impl PageAssembler {
    #[must_use]
    pub const fn new(renderer: Renderer, words: Arc<WordStore>, layout: Arc<LayoutStore>) -> Self {
        Self {
            renderer,
            words,
            layout,
            builds: AtomicUsize::new(0),
        }
    }

    /// Open the renderer's word and layout databases from `assets_dir`
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if either database cannot be opened.
    pub async fn open(renderer: Renderer, assets_dir: &Path) -> Result<Self> {
        let words = WordStore::open(&renderer.words_db_path(assets_dir)).await?;
        let layout = LayoutStore::open(&renderer.layout_db_path(assets_dir)).await?;
        Ok(Self::new(renderer, Arc::new(words), Arc::new(layout)))
    }

    #[must_use]
    pub const fn renderer(&self) -> Renderer {
        self.renderer
    }

    /// How many pages this assembler has built so far
    #[must_use]
    pub fn pages_built(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of pages in the layout
    ///
    /// # Errors
    ///
    /// Returns an error if the layout query fails.
    pub async fn page_count(&self) -> Result<u32> {
        self.layout.page_count().await
    }

    /// Build a page. A page without layout rows yields an empty page.
    ///
    /// # Errors
    ///
    /// Returns an error only if a store query fails.
    pub async fn build_page(&self, page_number: u32) -> Result<MushafPage> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        match self.try_build_page(page_number).await {
            Err(CoreError::EmptyPage { page }) => {
                debug!(target: LOG_TARGET, "Page {} has no layout rows, substituting empty page", page);
                Ok(MushafPage::empty(page))
            }
            other => other,
        }
    }

    async fn try_build_page(&self, page_number: u32) -> Result<MushafPage> {
        let started = Instant::now();

        let lines = self.layout.page_lines(page_number).await?;
        if lines.is_empty() {
            return Err(CoreError::EmptyPage { page: page_number });
        }

        // One range query for the whole page
        let words = match covering_range(&lines) {
            Some((min_id, max_id)) => self.words.words_in_range(min_id, max_id).await?,
            None => Vec::new(),
        };
        let words: HashMap<i64, Word> = words.into_iter().map(|w| (w.id, w)).collect();

        let page = assemble_page(page_number, lines, &words);

        debug!(
            target: LOG_TARGET,
            "Assembled page {} for {} ({} lines, {} ayahs) in {:?}",
            page_number,
            self.renderer,
            page.lines.len(),
            page.ayahs.len(),
            started.elapsed()
        );
        Ok(page)
    }
}

/// Smallest id range covering every line's word range
fn covering_range(lines: &[LayoutLine]) -> Option<(i64, i64)> {
    lines
        .iter()
        .filter_map(|line| line.word_range)
        .reduce(|(min_a, max_a), (min_b, max_b)| (min_a.min(min_b), max_a.max(max_b)))
}

/// Assemble a page from its layout lines and the words they reference.
///
/// Deterministic: the same lines and words always give the same page.
#[must_use]
pub fn assemble_page(page_number: u32, lines: Vec<LayoutLine>, words: &HashMap<i64, Word>) -> MushafPage {
    let placed = place_words(page_number, &lines, words);

    let mut groups: BTreeMap<GroupKey, Vec<PlacedWord<'_>>> = BTreeMap::new();
    for word in placed {
        groups.entry((word.surah, word.ayah, word.kind)).or_default().push(word);
    }

    let ayahs: Vec<PageAyah> = groups
        .into_iter()
        .map(|((surah, ayah, kind), group)| build_ayah(surah, ayah, kind, group))
        .collect();

    let line_segments = index_segments(&ayahs);

    MushafPage {
        page_number,
        lines,
        ayahs,
        line_segments,
    }
}

/// Walk the lines in order and tag every word with its verse and line offsets
fn place_words<'a>(
    page_number: u32,
    lines: &[LayoutLine],
    words: &'a HashMap<i64, Word>,
) -> Vec<PlacedWord<'a>> {
    let mut placed = Vec::new();
    let mut current_surah: Option<u16> = None;

    for (idx, line) in lines.iter().enumerate() {
        match (line.line_type, line.word_range) {
            (LineType::SurahName, _) => {
                current_surah = line.surah_number.or(current_surah);
            }
            (LineType::Basmallah, None) => {
                let surah = line
                    .surah_number
                    .or(current_surah)
                    .or_else(|| following_surah(&lines[idx + 1..], words));
                let Some(surah) = surah else {
                    warn!(
                        target: LOG_TARGET,
                        "Page {} line {}: basmallah without surah, skipping",
                        page_number, line.line_number
                    );
                    continue;
                };
                let texts = BASMALLAH_TEXT.split_whitespace();
                place_line(&mut placed, line.line_number, texts.map(|t| (surah, 1, AyahKind::Basmallah, t)));
            }
            (line_type, Some((first, last))) => {
                let line_words = (first..=last).filter_map(|id| {
                    let word = words.get(&id);
                    if word.is_none() {
                        debug!(
                            target: LOG_TARGET,
                            "Page {} line {}: word {} missing from store",
                            page_number, line.line_number, id
                        );
                    }
                    word
                });
                let tagged = line_words.map(|w| {
                    let kind = if line_type == LineType::Basmallah && w.surah != AL_FATIHAH {
                        AyahKind::Basmallah
                    } else {
                        AyahKind::Verse
                    };
                    (w.surah, w.ayah, kind, w.text.as_str())
                });
                place_line(&mut placed, line.line_number, tagged);
            }
            (_, None) => {}
        }
    }

    placed
}

/// Lay one line's words out left to right, tracking char offsets
fn place_line<'a>(
    placed: &mut Vec<PlacedWord<'a>>,
    line_number: u32,
    words: impl Iterator<Item = (u16, u16, AyahKind, &'a str)>,
) {
    let mut offset = 0;
    for (i, (surah, ayah, kind, text)) in words.enumerate() {
        if i > 0 {
            offset += 1;
        }
        let start_index = offset;
        offset += text.chars().count();
        placed.push(PlacedWord {
            surah,
            ayah,
            kind,
            text,
            line_number,
            start_index,
            end_index: offset,
        });
    }
}

/// Surah of the first word on the next line that has one
fn following_surah(lines: &[LayoutLine], words: &HashMap<i64, Word>) -> Option<u16> {
    lines
        .iter()
        .filter_map(|line| line.word_range)
        .find_map(|(first, _)| words.get(&first))
        .map(|w| w.surah)
}

/// Split one verse's words into per-line segments and number them
fn build_ayah(surah: u16, ayah: u16, kind: AyahKind, mut group: Vec<PlacedWord<'_>>) -> PageAyah {
    group.sort_by_key(|w| (w.line_number, w.start_index));

    let mut runs: Vec<&[PlacedWord<'_>]> = Vec::new();
    let mut run_start = 0;
    for i in 1..=group.len() {
        if i == group.len() || group[i].line_number != group[run_start].line_number {
            runs.push(&group[run_start..i]);
            run_start = i;
        }
    }

    let run_count = runs.len();
    let mut word_index = 0;
    let segments: Vec<AyahSegment> = runs
        .into_iter()
        .enumerate()
        .map(|(pos, run)| {
            let mut text = String::new();
            let mut words = Vec::with_capacity(run.len());
            let mut cursor = 0;
            for (i, placed) in run.iter().enumerate() {
                if i > 0 {
                    text.push(WORD_SEPARATOR);
                    cursor += 1;
                }
                let start_index = cursor;
                text.push_str(placed.text);
                cursor += placed.text.chars().count();
                word_index += 1;
                words.push(AyahWord {
                    text: placed.text.to_string(),
                    word_index,
                    start_index,
                    end_index: cursor,
                });
            }

            let is_end = pos + 1 == run_count;
            if !is_end {
                text.push(WORD_SEPARATOR);
            }

            AyahSegment {
                line_number: run[0].line_number,
                text,
                start_index: run[0].start_index,
                end_index: run[run.len() - 1].end_index,
                is_start: pos == 0,
                is_end,
                words,
            }
        })
        .collect();

    let text = segments.iter().map(|s| s.text.as_str()).collect();
    let start_line_number = segments.first().map_or(0, |s| s.line_number);
    let end_line_number = segments.last().map_or(0, |s| s.line_number);

    PageAyah {
        surah,
        ayah,
        kind,
        text,
        segments,
        start_line_number,
        end_line_number,
    }
}

/// Map each line to the segments shown on it, in reading order
fn index_segments(ayahs: &[PageAyah]) -> BTreeMap<u32, Vec<SegmentRef>> {
    let mut index: BTreeMap<u32, Vec<SegmentRef>> = BTreeMap::new();
    for (ayah_idx, ayah) in ayahs.iter().enumerate() {
        for (segment_idx, segment) in ayah.segments.iter().enumerate() {
            index.entry(segment.line_number).or_default().push(SegmentRef {
                ayah: ayah_idx,
                segment: segment_idx,
            });
        }
    }
    for refs in index.values_mut() {
        refs.sort_by_key(|r| ayahs[r.ayah].segments[r.segment].start_index);
    }
    index
}
