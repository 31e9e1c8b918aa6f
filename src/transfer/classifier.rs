//! Content type classification for uploaded files
//!
//! A reference table maps file extensions to content types. Files whose
//! extension is not in the table are sniffed from their first bytes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;

use crate::error::Result;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_BINARY: &str = "application/octet-stream";

/// Bytes read from the start of a file when sniffing.
pub const TASTE_LENGTH: usize = 256;

const BOMS: [&[u8]; 3] = [&[0xFE, 0xFF], &[0xFF, 0xFE], &[0xEF, 0xBB, 0xBF]];

#[derive(Debug, Deserialize)]
struct MimeDocument {
    #[serde(rename = "type", default)]
    types: Vec<MimeEntry>,
}

#[derive(Debug, Deserialize)]
struct MimeEntry {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "ext", default)]
    extensions: Vec<String>,
}

/// Extension to content type lookup
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    by_extension: HashMap<String, String>,
}

impl MimeTable {
    /// Parse the reference document:
    ///
    /// ```xml
    /// <types>
    ///   <type name="text/csv"><ext>.csv</ext></type>
    /// </types>
    /// ```
    ///
    /// The first type listing an extension wins.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document: MimeDocument = quick_xml::de::from_str(xml)?;
        let mut by_extension = HashMap::new();
        for entry in document.types {
            for ext in entry.extensions {
                let key = normalize_extension(&ext);
                if !key.is_empty() {
                    by_extension.entry(key).or_insert_with(|| entry.name.clone());
                }
            }
        }
        Ok(Self { by_extension })
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }

    pub fn lookup(&self, extension: &str) -> Option<&str> {
        self.by_extension
            .get(&normalize_extension(extension))
            .map(String::as_str)
    }

    /// Content type for an extension and the leading bytes of the content.
    pub fn classify<'a>(&'a self, extension: &str, prefix: &[u8]) -> &'a str {
        self.lookup(extension).unwrap_or_else(|| sniff(prefix))
    }

    /// Classify a local file, reading its head only when the extension
    /// is not in the table.
    pub async fn classify_file(&self, path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut prefix = Vec::new();
        if self.lookup(&extension).is_none() {
            let file = tokio::fs::File::open(path).await?;
            file.take(TASTE_LENGTH as u64)
                .read_to_end(&mut prefix)
                .await?;
        }
        Ok(self.classify(&extension, &prefix).to_string())
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Text or binary from the first bytes of some content.
pub fn sniff(prefix: &[u8]) -> &'static str {
    let prefix = &prefix[..prefix.len().min(TASTE_LENGTH)];
    if BOMS.iter().any(|bom| prefix.starts_with(bom)) {
        return MIME_TEXT;
    }

    let decoded = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        // a multi-byte sequence cut off by the taste window
        Err(e) if e.error_len().is_none() => {
            match std::str::from_utf8(&prefix[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return MIME_BINARY,
            }
        }
        Err(_) => return MIME_BINARY,
    };

    if decoded.chars().any(is_non_text_char) {
        MIME_BINARY
    } else {
        MIME_TEXT
    }
}

fn is_non_text_char(c: char) -> bool {
    c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r')
}

/// Process-wide mime table, downloaded on first use.
///
/// A failed download leaves the cell empty so the next caller retries.
pub struct MimeTableCache {
    url: String,
    client: reqwest::Client,
    table: OnceCell<Arc<MimeTable>>,
}

impl MimeTableCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            table: OnceCell::new(),
        }
    }

    /// A cache that never downloads.
    pub fn preloaded(table: MimeTable) -> Self {
        Self {
            url: String::new(),
            client: reqwest::Client::new(),
            table: OnceCell::new_with(Some(Arc::new(table))),
        }
    }

    pub async fn get(&self) -> Result<Arc<MimeTable>> {
        self.table
            .get_or_try_init(|| self.fetch())
            .await
            .map(Arc::clone)
    }

    async fn fetch(&self) -> Result<Arc<MimeTable>> {
        let xml = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let table = MimeTable::from_xml(&xml)?;
        tracing::info!(url = %self.url, extensions = table.len(), "Loaded mime table");
        Ok(Arc::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    const XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<types>
  <type name="text/csv"><ext>.csv</ext></type>
  <type name="application/json"><ext>.json</ext><ext>.map</ext></type>
  <type name="text/x-csv"><ext>.CSV</ext></type>
</types>"#;

    #[test]
    fn test_table_lookup_is_case_insensitive() {
        let table = MimeTable::from_xml(XML).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(".CSV"), Some("text/csv"));
        assert_eq!(table.lookup("json"), Some("application/json"));
        assert_eq!(table.lookup("Map"), Some("application/json"));
        assert_eq!(table.lookup(".vtr"), None);
    }

    #[test]
    fn test_extension_wins_over_sniffing() {
        let table = MimeTable::from_xml(XML).unwrap();
        assert_eq!(table.classify(".csv", &[0, 1, 2, 3]), "text/csv");
        assert_eq!(table.classify(".dat", &[0, 1, 2, 3]), MIME_BINARY);
        assert_eq!(table.classify(".dat", b"a,b\r\n1,2\n"), MIME_TEXT);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"plain\ttext\r\n"), MIME_TEXT);
        assert_eq!(sniff(b""), MIME_TEXT);
        assert_eq!(sniff(&[0xFF, 0xFE, 0x41, 0x00]), MIME_TEXT);
        assert_eq!(sniff(&[0xFE, 0xFF, 0x00, 0x41]), MIME_TEXT);
        assert_eq!(sniff(&[0xEF, 0xBB, 0xBF, 0x41]), MIME_TEXT);
        assert_eq!(sniff(b"abc\x07def"), MIME_BINARY);
        assert_eq!(sniff(&[0x41, 0xC3, 0x28]), MIME_BINARY);
        assert_eq!(sniff("caf\u{e9}".as_bytes()), MIME_TEXT);
    }

    #[test]
    fn test_sniff_truncated_sequence_is_text() {
        let mut bytes = vec![b'a'; TASTE_LENGTH - 1];
        bytes.extend_from_slice("\u{e9}".as_bytes());
        assert_eq!(bytes.len(), TASTE_LENGTH + 1);
        assert_eq!(sniff(&bytes), MIME_TEXT);
    }

    #[test]
    fn test_bad_xml() {
        assert!(matches!(
            MimeTable::from_xml("<types><type>"),
            Err(AppError::XmlDeserialize(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_file() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("blob.dat");
        tokio::fs::write(&binary, [0u8, 159, 146, 150]).await.unwrap();
        let text = dir.path().join("notes.txt");
        tokio::fs::write(&text, b"hello\n").await.unwrap();
        let listed = dir.path().join("table.CSV");
        tokio::fs::write(&listed, [0u8, 1, 2, 3]).await.unwrap();

        let cache = MimeTableCache::preloaded(MimeTable::from_xml(XML).unwrap());
        let table = cache.get().await.unwrap();
        assert_eq!(table.classify_file(&binary).await.unwrap(), MIME_BINARY);
        assert_eq!(table.classify_file(&text).await.unwrap(), MIME_TEXT);
        // the table entry wins over binary content
        assert_eq!(table.classify_file(&listed).await.unwrap(), "text/csv");
        assert_eq!(
            table.classify_file(&dir.path().join("missing.csv")).await.unwrap(),
            "text/csv"
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried() {
        let cache = MimeTableCache::new("http://127.0.0.1:1/mime-types.xml");
        assert!(cache.get().await.is_err());
        assert!(cache.table.get().is_none());
    }
}
