//! Read-only SQLite stores for words and page layout.
//!
//! Both databases are bundled assets. Columns are read as dynamic values and
//! parsed leniently: a malformed number falls back to a default instead of
//! failing the whole page.

use crate::error::{CoreError, Result};
use crate::page::{LayoutLine, LineType, Word};
use rusqlite::types::Value;
use rusqlite::OpenFlags;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "mushaf::store";

const WORDS_TABLE: &str = "words";
const LAYOUT_TABLE: &str = "pages";

/// Open a bundled database read-only and make sure `table` exists.
async fn open_read_only(path: &Path, table: &'static str) -> Result<Connection> {
    let unavailable = |reason: String| CoreError::StoreUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(unavailable("file does not exist".to_string()));
    }

    info!(target: LOG_TARGET, "Opening {} store at {:?}", table, path);

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .await
    .map_err(|e| unavailable(e.to_string()))?;

    conn.call(move |conn| {
        conn.prepare(&format!("SELECT * FROM {table} LIMIT 1"))?;
        Ok(())
    })
    .await
    .map_err(|e| unavailable(format!("missing table '{table}': {e}")))?;

    Ok(conn)
}

/// Lenient integer read: integers, reals and numeric text are accepted.
#[allow(clippy::cast_possible_truncation)]
fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(f) if f.is_finite() => Some(f.round() as i64),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
        }
        _ => None,
    }
}

fn value_as_u16(value: &Value) -> Option<u16> {
    value_as_i64(value).and_then(|i| u16::try_from(i).ok())
}

fn value_as_u32(value: &Value) -> Option<u32> {
    value_as_i64(value).and_then(|i| u32::try_from(i).ok())
}

fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        other => value_as_i64(other).is_some_and(|i| i != 0),
    }
}

fn value_as_text(value: Value) -> String {
    match value {
        Value::Text(s) => s,
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Null | Value::Blob(_) => String::new(),
    }
}

/// Word id columns use 0 or NULL for "no word"
fn value_as_word_id(value: &Value) -> Option<i64> {
    value_as_i64(value).filter(|id| *id > 0)
}

/// Store of every word in the book, keyed by a globally ordered id
pub struct WordStore {
    conn: Connection,
}

impl WordStore {
    /// Open the word database at `path`
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the file is missing, cannot be opened, or
    /// has no `words` table.
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = open_read_only(path, WORDS_TABLE).await?;
        Ok(Self { conn })
    }

    /// Wrap an already opened connection
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Fetch every word with `min_id <= id <= max_id`, ordered by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn words_in_range(&self, min_id: i64, max_id: i64) -> Result<Vec<Word>> {
        debug!(target: LOG_TARGET, "Fetching words {}..={}", min_id, max_id);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT id, text, surah, ayah
                    FROM words
                    WHERE id BETWEEN ?1 AND ?2
                    ORDER BY id
                ",
                )?;

                let rows = stmt.query_map(rusqlite::params![min_id, max_id], |row| {
                    Ok((
                        row.get::<_, Value>(0)?,
                        row.get::<_, Value>(1)?,
                        row.get::<_, Value>(2)?,
                        row.get::<_, Value>(3)?,
                    ))
                })?;

                let mut words = Vec::new();
                for row in rows {
                    let (id, text, surah, ayah) = row?;
                    let Some(id) = value_as_i64(&id) else {
                        continue;
                    };
                    words.push(Word {
                        id,
                        text: value_as_text(text),
                        surah: value_as_u16(&surah).unwrap_or_default(),
                        ayah: value_as_u16(&ayah).unwrap_or_default(),
                    });
                }
                Ok(words)
            })
            .await
            .map_err(Into::into)
    }
}

/// Store of the per-page line layout
pub struct LayoutStore {
    conn: Connection,
}

impl LayoutStore {
    /// Open the layout database at `path`
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the file is missing, cannot be opened, or
    /// has no `pages` table.
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = open_read_only(path, LAYOUT_TABLE).await?;
        Ok(Self { conn })
    }

    /// Wrap an already opened connection
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Fetch the lines of a page ordered by line number
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn page_lines(&self, page_number: u32) -> Result<Vec<LayoutLine>> {
        let mut lines = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT line_number, line_type, is_centered,
                           surah_number, first_word_id, last_word_id
                    FROM pages
                    WHERE page_number = ?1
                    ORDER BY line_number
                ",
                )?;

                let rows = stmt.query_map(rusqlite::params![page_number], |row| {
                    Ok((
                        row.get::<_, Value>(0)?,
                        row.get::<_, Value>(1)?,
                        row.get::<_, Value>(2)?,
                        row.get::<_, Value>(3)?,
                        row.get::<_, Value>(4)?,
                        row.get::<_, Value>(5)?,
                    ))
                })?;

                let mut raw = Vec::new();
                for row in rows {
                    raw.push(row?);
                }
                Ok(raw)
            })
            .await?
            .into_iter()
            .map(|(line_number, line_type, is_centered, surah, first, last)| {
                let line_type_text = value_as_text(line_type);
                let line_type = LineType::parse(&line_type_text).unwrap_or_else(|| {
                    warn!(
                        target: LOG_TARGET,
                        "Page {} has unknown line type '{}', treating as ayah",
                        page_number, line_type_text
                    );
                    LineType::Ayah
                });

                let word_range = match (value_as_word_id(&first), value_as_word_id(&last)) {
                    (Some(first), Some(last)) => Some((first.min(last), first.max(last))),
                    _ => None,
                };

                LayoutLine {
                    page_number,
                    line_number: value_as_u32(&line_number).unwrap_or_default(),
                    line_type,
                    is_centered: value_as_bool(&is_centered),
                    surah_number: value_as_u16(&surah).filter(|s| *s > 0),
                    word_range,
                }
            })
            .collect::<Vec<_>>();

        lines.sort_by_key(|line| line.line_number);
        Ok(lines)
    }

    /// Highest page number present in the layout
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn page_count(&self) -> Result<u32> {
        let max = self
            .conn
            .call(|conn| {
                let max: Value = conn.query_row("SELECT MAX(page_number) FROM pages", [], |row| row.get(0))?;
                Ok(max)
            })
            .await?;

        Ok(value_as_u32(&max).unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Create an in-memory word store from `(id, text, surah, ayah)` rows
    pub(crate) async fn word_store(rows: &[(i64, &str, u16, u16)]) -> WordStore {
        let rows: Vec<(i64, String, u16, u16)> = rows
            .iter()
            .map(|(id, text, surah, ayah)| (*id, (*text).to_string(), *surah, *ayah))
            .collect();
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(move |conn| {
            conn.execute_batch("CREATE TABLE words (id INTEGER PRIMARY KEY, text TEXT, surah INTEGER, ayah INTEGER);")?;
            for (id, text, surah, ayah) in rows {
                conn.execute(
                    "INSERT INTO words (id, text, surah, ayah) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, text, surah, ayah],
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();
        WordStore::from_connection(conn)
    }

    /// `(page, line, type, centered, surah, first, last)` with raw SQL literals
    pub(crate) type RawLine = (u32, u32, &'static str, i64, &'static str, &'static str, &'static str);

    /// Create an in-memory layout store; surah/word columns are inserted as SQL literals
    pub(crate) async fn layout_store(rows: &[RawLine]) -> LayoutStore {
        let statements: Vec<String> = rows
            .iter()
            .map(|(page, line, kind, centered, surah, first, last)| {
                format!(
                    "INSERT INTO pages (page_number, line_number, line_type, is_centered, surah_number, first_word_id, last_word_id) \
                     VALUES ({page}, {line}, '{kind}', {centered}, {surah}, {first}, {last});"
                )
            })
            .collect();
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(move |conn| {
            conn.execute_batch(
                "CREATE TABLE pages (page_number INTEGER, line_number INTEGER, line_type TEXT, \
                 is_centered INTEGER, surah_number INTEGER, first_word_id, last_word_id);",
            )?;
            for statement in statements {
                conn.execute_batch(&statement)?;
            }
            Ok(())
        })
        .await
        .unwrap();
        LayoutStore::from_connection(conn)
    }

    #[test]
    fn test_value_as_i64_lenient() {
        assert_eq!(value_as_i64(&Value::Integer(7)), Some(7));
        assert_eq!(value_as_i64(&Value::Text(" 12 ".to_string())), Some(12));
        assert_eq!(value_as_i64(&Value::Text("3.0".to_string())), Some(3));
        assert_eq!(value_as_i64(&Value::Real(4.0)), Some(4));
        assert_eq!(value_as_i64(&Value::Text(String::new())), None);
        assert_eq!(value_as_i64(&Value::Text("abc".to_string())), None);
        assert_eq!(value_as_i64(&Value::Null), None);
    }

    #[test]
    fn test_value_as_bool() {
        assert!(value_as_bool(&Value::Integer(1)));
        assert!(value_as_bool(&Value::Text("true".to_string())));
        assert!(!value_as_bool(&Value::Integer(0)));
        assert!(!value_as_bool(&Value::Null));
        assert!(!value_as_bool(&Value::Text("no".to_string())));
    }

    #[test]
    fn test_word_id_zero_is_absent() {
        assert_eq!(value_as_word_id(&Value::Integer(0)), None);
        assert_eq!(value_as_word_id(&Value::Text(String::new())), None);
        assert_eq!(value_as_word_id(&Value::Integer(42)), Some(42));
    }

    #[tokio::test]
    async fn test_words_in_range() {
        let store = word_store(&[(1, "a", 1, 1), (2, "b", 1, 1), (3, "c", 1, 2), (4, "d", 1, 3)]).await;
        let words = store.words_in_range(2, 3).await.unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].id, 2);
        assert_eq!(words[1].text, "c");
        assert_eq!(words[1].ayah, 2);
    }

    #[tokio::test]
    async fn test_page_lines_parses_malformed_fields() {
        let store = layout_store(&[
            (5, 2, "ayah", 0, "NULL", "'10'", "12"),
            (5, 1, "surah_name", 1, "'x'", "''", "NULL"),
            (5, 3, "ayah", 0, "NULL", "NULL", "14"),
            (6, 1, "ayah", 0, "NULL", "20", "25"),
        ])
        .await;

        let lines = store.page_lines(5).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line_number, 1);
        assert_eq!(lines[0].line_type, LineType::SurahName);
        assert!(lines[0].is_centered);
        assert_eq!(lines[0].surah_number, None);
        assert_eq!(lines[0].word_range, None);
        assert_eq!(lines[1].word_range, Some((10, 12)));
        // Half a range is no range
        assert_eq!(lines[2].word_range, None);
    }

    #[tokio::test]
    async fn test_page_lines_unknown_page_is_empty() {
        let store = layout_store(&[(1, 1, "ayah", 0, "NULL", "1", "2")]).await;
        assert!(store.page_lines(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_count() {
        let store = layout_store(&[
            (1, 1, "ayah", 0, "NULL", "1", "2"),
            (3, 1, "ayah", 0, "NULL", "3", "4"),
        ])
        .await;
        assert_eq!(store.page_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_open_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = WordStore::open(&dir.path().join("missing.db")).await;
        assert!(matches!(result, Err(CoreError::StoreUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_open_without_table_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();

        let result = LayoutStore::open(&path).await;
        assert!(matches!(result, Err(CoreError::StoreUnavailable { .. })));
    }
}
