//! Renderer identification.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of pages in the 15-line Madinah layout shared by every renderer.
pub const MUSHAF_PAGE_COUNT: u32 = 604;

/// Identifies a glyph/layout dataset and the font it is typeset with.
///
/// Every renderer ships its own word database and line layout database.
/// Switching renderers invalidates every assembled page and every font
/// registration, since word ids and glyph text differ between datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Renderer {
    /// `DigitalKhatt` variable font with its own word segmentation
    #[default]
    DigitalKhatt,
    /// QPC Uthmani Hafs text with a single Unicode font
    QpcUthmani,
    /// QPC V2 glyph codes, one font per page
    QpcV2,
}

impl Renderer {
    /// All known renderers.
    pub const ALL: [Self; 3] = [Self::DigitalKhatt, Self::QpcUthmani, Self::QpcV2];

    /// Get the stable string identifier used in config files and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalKhatt => "digital_khatt",
            Self::QpcUthmani => "qpc_uthmani",
            Self::QpcV2 => "qpc_v2",
        }
    }

    /// File name of the word database inside the assets directory.
    #[must_use]
    pub const fn words_db_file(&self) -> &'static str {
        match self {
            Self::DigitalKhatt => "digital-khatt-v2.db",
            Self::QpcUthmani => "qpc-hafs-word-by-word.db",
            Self::QpcV2 => "qpc-v2-glyphs.db",
        }
    }

    /// File name of the page layout database inside the assets directory.
    #[must_use]
    pub const fn layout_db_file(&self) -> &'static str {
        match self {
            Self::DigitalKhatt => "digital-khatt-15-lines.db",
            Self::QpcUthmani => "qpc-hafs-15-lines.db",
            Self::QpcV2 => "qpc-v2-15-lines.db",
        }
    }

    /// Font family used for page text (the prefix, for per-page fonts).
    #[must_use]
    pub const fn font_family(&self) -> &'static str {
        match self {
            Self::DigitalKhatt => "DigitalKhatt",
            Self::QpcUthmani => "UthmanicHafs",
            Self::QpcV2 => "QCF_P",
        }
    }

    /// Whether every page is typeset with its own font file.
    #[must_use]
    pub const fn per_page_font(&self) -> bool {
        matches!(self, Self::QpcV2)
    }

    /// Font family to register for a page.
    #[must_use]
    pub fn page_font_family(&self, page: u32) -> String {
        if self.per_page_font() {
            format!("{}{page:03}", self.font_family())
        } else {
            self.font_family().to_string()
        }
    }

    /// Font file for a page, relative to the assets directory.
    #[must_use]
    pub fn page_font_file(&self, page: u32) -> PathBuf {
        match self {
            Self::DigitalKhatt => PathBuf::from("fonts").join("DigitalKhattV2.otf"),
            Self::QpcUthmani => PathBuf::from("fonts").join("UthmanicHafs_V22.ttf"),
            Self::QpcV2 => PathBuf::from("fonts").join("qpc-v2").join(format!("p{page}.ttf")),
        }
    }

    /// Full path of the word database under `assets_dir`.
    #[must_use]
    pub fn words_db_path(&self, assets_dir: &Path) -> PathBuf {
        assets_dir.join(self.words_db_file())
    }

    /// Full path of the layout database under `assets_dir`.
    #[must_use]
    pub fn layout_db_path(&self, assets_dir: &Path) -> PathBuf {
        assets_dir.join(self.layout_db_file())
    }
}

impl std::fmt::Display for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Renderer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|renderer| renderer.as_str() == s)
            .ok_or_else(|| format!("unknown renderer '{s}'"))
    }
}
