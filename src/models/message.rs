//! Queue payloads exchanged between stages.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::extract_type_id;

/// "Snapshot is ready" announcement from the list fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListReady {
    pub path: PathBuf,
}

impl ListReady {
    /// Accepts `"{marker} {path}"` or a bare path.
    pub fn parse(payload: &[u8], marker: &str) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AppError::message(format!("list-ready payload is not UTF-8: {e}")))?
            .trim();
        let path = match text.strip_prefix(marker) {
            Some(rest) if !marker.is_empty() => rest.trim(),
            _ => text,
        };
        if path.is_empty() {
            return Err(AppError::message(format!("no snapshot path in {text:?}")));
        }
        Ok(Self {
            path: PathBuf::from(path),
        })
    }

    pub fn encode(&self, marker: &str) -> Vec<u8> {
        format!("{} {}", marker, self.path.display())
            .trim()
            .as_bytes()
            .to_vec()
    }
}

/// One new or changed registry record, for detail fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub type_id: String,
    pub url: String,
}

impl ChangeNotification {
    pub fn new(type_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            url: url.into(),
        }
    }

    /// Accepts `"{TypeID}|{URL}"` or a bare URL.
    ///
    /// The split is on the first `|` followed by a URL, not on a fixed
    /// offset, so identifiers containing `|` still parse.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AppError::message(format!("notification is not UTF-8: {e}")))?
            .trim();
        if text.is_empty() {
            return Err(AppError::message("empty change notification"));
        }

        if let Some(idx) = text
            .match_indices('|')
            .map(|(i, _)| i)
            .find(|&i| looks_like_url(&text[i + 1..]))
        {
            let type_id = text[..idx].trim();
            let url = text[idx + 1..].trim();
            let type_id = if type_id.is_empty() {
                extract_type_id(url).unwrap_or_default()
            } else {
                type_id.to_string()
            };
            if type_id.is_empty() {
                return Err(AppError::message(format!("no TypeID in {text:?}")));
            }
            return Ok(Self::new(type_id, checked_url(url)?));
        }

        if looks_like_url(text) {
            let url = checked_url(text)?;
            let type_id = extract_type_id(url)
                .ok_or_else(|| AppError::message(format!("no TypeID derivable from {text:?}")))?;
            return Ok(Self::new(type_id, url));
        }

        Err(AppError::message(format!(
            "expected \"TypeID|URL\" or a URL, got {text:?}"
        )))
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}|{}", self.type_id, self.url).into_bytes()
    }
}

fn checked_url(url: &str) -> Result<&str> {
    url::Url::parse(url).map_err(|e| AppError::message(format!("bad URL {url:?}: {e}")))?;
    Ok(url)
}

fn looks_like_url(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("http://") || s.starts_with("https://")
}

/// "Document saved" announcement from the detail fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReady {
    /// Registry TypeID, absent when only a path was sent
    pub type_id: Option<String>,
    pub path: PathBuf,
}

impl DocumentReady {
    pub fn new(type_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            type_id: Some(type_id.into()),
            path: path.into(),
        }
    }

    /// Accepts `"{TypeID}|{path}"` or a bare path.
    ///
    /// Saved document names never contain `|`, so the split is on the last one.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AppError::message(format!("document payload is not UTF-8: {e}")))?
            .trim();
        let (type_id, path) = match text.rsplit_once('|') {
            Some((id, path)) => {
                let id = id.trim();
                ((!id.is_empty()).then(|| id.to_string()), path.trim())
            }
            None => (None, text),
        };
        if path.is_empty() {
            return Err(AppError::message(format!("no document path in {text:?}")));
        }
        Ok(Self {
            type_id,
            path: PathBuf::from(path),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        match &self.type_id {
            Some(id) => format!("{}|{}", id, self.path.display()).into_bytes(),
            None => self.path.display().to_string().into_bytes(),
        }
    }
}

/// Structured fields extracted from one detail document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedRecord {
    pub type_id: String,
    pub document_path: String,
    pub fields: BTreeMap<String, String>,
    pub parsed_at: DateTime<Utc>,
}

impl ParsedRecord {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let record: ParsedRecord = serde_json::from_slice(payload)?;
        if record.type_id.trim().is_empty() {
            return Err(AppError::message("parsed record without type_id"));
        }
        Ok(record)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ready_with_marker() {
        let msg = ListReady::parse(b"CSV ready: /data/liste_vehicules_2026-01-02.csv", "CSV ready:")
            .unwrap();
        assert_eq!(msg.path, PathBuf::from("/data/liste_vehicules_2026-01-02.csv"));
    }

    #[test]
    fn test_list_ready_bare_path() {
        let msg = ListReady::parse(b"  /data/eratv_list.csv\n", "CSV ready:").unwrap();
        assert_eq!(msg.path, PathBuf::from("/data/eratv_list.csv"));
    }

    #[test]
    fn test_list_ready_marker_only_is_rejected() {
        assert!(ListReady::parse(b"CSV ready:   ", "CSV ready:").is_err());
    }

    #[test]
    fn test_list_ready_encode() {
        let msg = ListReady {
            path: PathBuf::from("/data/a.csv"),
        };
        assert_eq!(msg.encode("CSV ready:"), b"CSV ready: /data/a.csv".to_vec());
    }

    #[test]
    fn test_notification_pair() {
        let n = ChangeNotification::parse(b" T1 | https://eratv.test/View/T1 ").unwrap();
        assert_eq!(n, ChangeNotification::new("T1", "https://eratv.test/View/T1"));
    }

    #[test]
    fn test_notification_bare_url() {
        let n = ChangeNotification::parse(b"https://eratv.test/Eratv/Home/View?id=42-1").unwrap();
        assert_eq!(n.type_id, "42-1");
        assert_eq!(n.url, "https://eratv.test/Eratv/Home/View?id=42-1");
    }

    #[test]
    fn test_notification_pipe_in_identifier() {
        let n = ChangeNotification::parse(b"A|B|https://eratv.test/x").unwrap();
        assert_eq!(n.type_id, "A|B");
        assert_eq!(n.url, "https://eratv.test/x");
    }

    #[test]
    fn test_notification_garbage() {
        assert!(ChangeNotification::parse(b"hello world").is_err());
        assert!(ChangeNotification::parse(b"   ").is_err());
    }

    #[test]
    fn test_notification_encode() {
        let n = ChangeNotification::new("T9", "https://eratv.test/9");
        assert_eq!(n.encode(), b"T9|https://eratv.test/9".to_vec());
    }

    #[test]
    fn test_document_ready_keeps_type_id() {
        let msg = DocumentReady::parse(b"12/345|/data/xml/12-345_2026-10-19.xml").unwrap();
        assert_eq!(msg.type_id.as_deref(), Some("12/345"));
        assert_eq!(msg.path, PathBuf::from("/data/xml/12-345_2026-10-19.xml"));

        let again = DocumentReady::parse(&msg.encode()).unwrap();
        assert_eq!(again, msg);
    }

    #[test]
    fn test_document_ready_bare_path() {
        let msg = DocumentReady::parse(b" /data/xml/T1_2026-10-19.xml\n").unwrap();
        assert_eq!(msg.type_id, None);
        assert_eq!(msg.path, PathBuf::from("/data/xml/T1_2026-10-19.xml"));
        assert!(DocumentReady::parse(b"T1|  ").is_err());
    }

    #[test]
    fn test_notification_unparseable_url_is_rejected() {
        let err = ChangeNotification::parse(b"T1|https://bad host/x").unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_parsed_record_requires_type_id() {
        let json = br#"{"type_id":" ","document_path":"a.xml","fields":{},"parsed_at":"2026-01-01T00:00:00Z"}"#;
        assert!(ParsedRecord::decode(json).is_err());
    }
}
