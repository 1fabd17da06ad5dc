//! The persisted article table.
//!
//! A single CSV file with a header row and one row per article, in the column
//! order of [`Article`]. The table is append-only: rows are added, and a row
//! already on disk is never rewritten, reformatted or dropped.
//!
//! # Loading
//!
//! Loading never fails. A missing file is an empty table; a file whose header
//! cannot be read, or that has no `url` column, is logged and treated as
//! empty; a single malformed row is skipped with a warning so the rest of the
//! dataset survives.
//!
//! # Appending
//!
//! The known URLs are read straight from the raw `url` column, so rows the
//! typed loader would skip still count. New rows with an unknown URL are
//! encoded in the existing file's column order and written after the stored
//! bytes, which are carried over verbatim. The result goes to a sibling
//! temporary file that is renamed over the target, so a failed write leaves
//! the previous table intact. A file that is not a table at all is moved
//! aside rather than overwritten.

use crate::error::StoreError;
use crate::models::Article;
use itertools::Itertools;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{Span, debug, error, info, instrument, warn};

/// File-backed article table.
#[derive(Debug, Clone)]
pub struct ArticleStore {
    path: PathBuf,
    span: Span,
}

/// Header and URLs of the stored table, read without decoding rows.
struct Layout {
    columns: Vec<String>,
    urls: HashSet<String>,
}

impl ArticleStore {
    /// A store backed by the CSV file at `path`, which need not exist yet.
    pub fn new(path: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            path: path.into(),
            span,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored article.
    #[instrument(parent = &self.span, level = "debug", skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Vec<Article> {
        let raw = match self.read_raw().await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("No article table yet; starting empty");
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, "Could not read article table; treating as empty");
                return Vec::new();
            }
        };

        let articles = decode(&raw);
        info!(count = articles.len(), "Loaded article table");
        articles
    }

    /// URLs already in the table, including those on rows the typed loader
    /// skips.
    #[instrument(parent = &self.span, level = "debug", skip(self), fields(path = %self.path.display()))]
    pub async fn known_urls(&self) -> HashSet<String> {
        match self.read_raw().await {
            Ok(Some(raw)) => scan(&raw).map(|layout| layout.urls).unwrap_or_default(),
            Ok(None) => HashSet::new(),
            Err(e) => {
                error!(error = %e, "Could not read article table; no URLs known");
                HashSet::new()
            }
        }
    }

    /// Append `articles` to the table, keeping existing rows on URL conflicts.
    ///
    /// Articles without an absolute URL are refused with a warning. Stored
    /// rows are copied through byte for byte.
    ///
    /// # Returns
    ///
    /// The number of rows actually added. Nothing is written when that is
    /// zero.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the existing table cannot be read, or the
    /// new table cannot be encoded or written.
    #[instrument(parent = &self.span, level = "info", skip_all, fields(path = %self.path.display(), offered = articles.len()))]
    pub async fn append(&self, articles: &[Article]) -> Result<usize, StoreError> {
        let existing = self
            .read_raw()
            .await
            .map_err(|source| io_error(&self.path, source))?
            .filter(|raw| !raw.iter().all(u8::is_ascii_whitespace));

        let (mut table, layout) = match existing {
            None => (Vec::new(), None),
            Some(raw) => match scan(&raw) {
                Some(layout) => (raw, Some(layout)),
                None => {
                    self.quarantine().await?;
                    (Vec::new(), None)
                }
            },
        };
        let known = layout.as_ref().map(|l| &l.urls);

        let fresh = articles
            .iter()
            .filter(|a| {
                if !a.is_storable() {
                    warn!(url = %a.url, "Refusing to store article without an absolute URL");
                }
                a.is_storable()
            })
            .filter(|a| known.is_none_or(|urls| !urls.contains(&a.url)))
            .unique_by(|a| a.url.clone())
            .collect::<Vec<_>>();

        if fresh.is_empty() {
            info!("No new rows to store");
            return Ok(0);
        }

        if !table.is_empty() && !table.ends_with(b"\n") {
            table.push(b'\n');
        }
        table.extend(encode(&fresh, layout.as_ref().map(|l| l.columns.as_slice()))?);

        self.write_atomically(&table).await?;
        info!(added = fresh.len(), "Stored articles");
        Ok(fresh.len())
    }

    /// Check up front that the table's directory exists (creating it if
    /// needed) and accepts new files, so a permissions problem surfaces
    /// before any crawling is done.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created or
    /// written to.
    pub async fn ensure_writable(&self) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).await.map_err(|source| io_error(dir, source))?;

        let check = dir.join(".__write_check__");
        fs::write(&check, b"").await.map_err(|source| io_error(&check, source))?;
        if let Err(e) = fs::remove_file(&check).await {
            debug!(path = %check.display(), error = %e, "Could not remove write check file");
        }
        info!(dir = %dir.display(), "Output directory is writable");
        Ok(())
    }

    /// The table's bytes, `None` when the file does not exist.
    async fn read_raw(&self) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Move a file that is not a readable table out of the way.
    async fn quarantine(&self) -> Result<(), StoreError> {
        let aside = self.sibling(".corrupt");
        error!(moved_to = %aside.display(), "Article table is unreadable; moving it aside");
        fs::rename(&self.path, &aside)
            .await
            .map_err(|source| io_error(&self.path, source))
    }

    async fn write_atomically(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|source| io_error(parent, source))?;
        }

        let tmp = self.sibling(".tmp");
        debug!(tmp = %tmp.display(), bytes = bytes.len(), "Writing table");
        fs::write(&tmp, bytes).await.map_err(|source| io_error(&tmp, source))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| io_error(&self.path, source))
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Read the header and the `url` column without interpreting other cells.
/// `None` when there is no usable header.
fn scan(raw: &[u8]) -> Option<Layout> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw);
    let columns = reader
        .byte_headers()
        .ok()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect::<Vec<_>>();
    let url_column = columns.iter().position(|c| c == "url")?;

    let urls = reader
        .byte_records()
        .filter_map(Result::ok)
        .filter_map(|record| {
            let url = String::from_utf8_lossy(record.get(url_column)?).trim().to_string();
            (!url.is_empty()).then_some(url)
        })
        .collect();
    Some(Layout { columns, urls })
}

/// Encode `articles` as CSV. With `columns`, rows are laid out in that order
/// and no header is written; without, the full header comes first.
fn encode(articles: &[&Article], columns: Option<&[String]>) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for article in articles {
        writer.serialize(article)?;
    }
    let full = writer
        .into_inner()
        .map_err(|e| StoreError::Buffer(e.to_string()))?;

    let Some(columns) = columns else {
        return Ok(full);
    };

    let mut reader = csv::Reader::from_reader(full.as_slice());
    let ours = reader.headers()?.clone();
    let positions = columns
        .iter()
        .map(|c| ours.iter().position(|h| h == c))
        .collect::<Vec<_>>();
    let missing = ours
        .iter()
        .filter(|h| !columns.iter().any(|c| c == h))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        warn!(columns = ?missing, "Stored table lacks columns; their values are not written");
    }

    let mut projected = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for record in reader.records() {
        let record = record?;
        projected.write_record(
            positions
                .iter()
                .map(|p| p.and_then(|i| record.get(i)).unwrap_or("")),
        )?;
    }
    projected
        .into_inner()
        .map_err(|e| StoreError::Buffer(e.to_string()))
}

fn decode(raw: &[u8]) -> Vec<Article> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw);

    match reader.headers() {
        Ok(headers) if headers.iter().any(|h| h.trim() == "url") => {}
        Ok(_) => {
            error!("Article table has no url column; treating as empty");
            return Vec::new();
        }
        Err(e) => {
            error!(error = %e, "Could not read article table header; treating as empty");
            return Vec::new();
        }
    }

    reader
        .deserialize::<Article>()
        .enumerate()
        .filter_map(|(i, row)| {
            // Header is line 1.
            let line = i + 2;
            match row {
                Ok(article) if article.is_storable() => Some(article),
                Ok(article) => {
                    warn!(line, url = %article.url, "Skipping stored row without an absolute URL");
                    None
                }
                Err(e) => {
                    warn!(line, error = %e, "Skipping malformed stored row");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;

    fn article(url: &str, title: &str) -> Article {
        Article {
            title: title.to_string(),
            ..Article::new(url)
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> ArticleStore {
        ArticleStore::new(dir.path().join("data").join("articles.csv"), Span::none())
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut full = article("https://example.com/politics/a", "Title, with comma");
        full.section = "politics".to_string();
        full.description = "Line one\nline two".to_string();
        full.source = "Example".to_string();
        full.is_own_site = true;
        full.published_date = parse_date("2024-05-01T10:00:00+02:00");
        full.image_url = Some("https://example.com/a.jpg".to_string());
        full.ingested_at = parse_date("2024-05-02T00:00:00+00:00");
        let bare = article("https://example.com/b", "");

        assert_eq!(store.append(&[full.clone(), bare.clone()]).await.unwrap(), 2);
        assert_eq!(store.load().await, vec![full, bare]);
    }

    #[tokio::test]
    async fn test_header_matches_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(&[article("https://example.com/a", "A")]).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            raw.lines().next().unwrap(),
            "url,title,section,description,source,is_own_site,published_date,last_modified,image_url,ingested_at"
        );
    }

    #[tokio::test]
    async fn test_existing_row_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(&[article("https://example.com/x", "Old")]).await.unwrap();

        let added = store
            .append(&[article("https://example.com/x", "New"), article("https://example.com/y", "Y")])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let rows = store.load().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Old");
        assert_eq!(rows[1].url, "https://example.com/y");
    }

    #[tokio::test]
    async fn test_duplicates_within_batch_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let added = store
            .append(&[article("https://example.com/x", "First"), article("https://example.com/x", "Second")])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.load().await[0].title, "First");
    }

    #[tokio::test]
    async fn test_nothing_new_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.append(&[]).await.unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_invalid_urls_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let added = store
            .append(&[article("", "Empty"), article("/relative", "Relative"), article("https://example.com/ok", "Ok")])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.known_urls().await, HashSet::from(["https://example.com/ok".to_string()]));
    }

    #[tokio::test]
    async fn test_corrupted_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"\x00\xff\xfe not,a,table\n1,2,3\n").unwrap();

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let mut raw = b"url,title,section,is_own_site,published_date\n\
            https://example.com/a,A,news,True,2023-01-01 12:30:45\n\
            ,No URL,news,False,\n"
            .to_vec();
        raw.extend_from_slice(b"https://example.com/b,\xff\xfe,news,False,\n");
        std::fs::write(store.path(), raw).unwrap();

        let rows = store.load().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "https://example.com/a");
        assert!(rows[0].is_own_site);
        assert_eq!(rows[0].published_date, parse_date("2023-01-01T12:30:45+00:00"));
    }

    #[tokio::test]
    async fn test_stored_rows_survive_append_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let mut stored = b"url,title,section,description,source,is_own_site,published_date,last_modified,image_url,ingested_at\n\
            https://example.com/a,A,news,,Src,yes,someday in may,,,\n"
            .to_vec();
        stored.extend_from_slice(b"https://example.com/b,\xff\xfe,news,,Src,False,,,,\n");
        std::fs::write(store.path(), &stored).unwrap();

        let added = store
            .append(&[article("https://example.com/b", "Again"), article("https://example.com/c", "C")])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let after = std::fs::read(store.path()).unwrap();
        assert!(after.starts_with(&stored));
        let tail = String::from_utf8(after[stored.len()..].to_vec()).unwrap();
        assert!(tail.starts_with("https://example.com/c,C,general,"));
        assert_eq!(tail.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_known_urls_include_rows_the_loader_skips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"url,title\nhttps://example.com/a,\xff\n").unwrap();

        assert!(store.load().await.is_empty());
        assert_eq!(store.known_urls().await, HashSet::from(["https://example.com/a".to_string()]));
    }

    #[tokio::test]
    async fn test_new_rows_follow_stored_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "title,url\nOld,https://example.com/a").unwrap();

        store.append(&[article("https://example.com/b", "New")]).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "title,url\nOld,https://example.com/a\nNew,https://example.com/b\n");
        assert_eq!(store.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_table_is_moved_aside_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not,a,table\n1,2,3\n").unwrap();

        assert_eq!(store.append(&[article("https://example.com/a", "A")]).await.unwrap(), 1);

        let aside = std::fs::read_to_string(store.sibling(".corrupt")).unwrap();
        assert_eq!(aside, "not,a,table\n1,2,3\n");
        assert_eq!(store.load().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_writable_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.ensure_writable().await.unwrap();
        assert!(store.path().parent().unwrap().is_dir());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_ensure_writable_leaves_no_check_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.ensure_writable().await.unwrap();
        store.ensure_writable().await.unwrap();
        let parent = store.path().parent().unwrap();
        assert_eq!(std::fs::read_dir(parent).unwrap().count(), 0);
    }

    #[test]
    fn test_temporary_file_is_a_sibling() {
        let store = ArticleStore::new("/data/articles.csv", Span::none());
        assert_eq!(store.sibling(".tmp"), PathBuf::from("/data/articles.csv.tmp"));
    }
}
