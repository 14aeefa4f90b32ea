//! Stage 4: document path in, parsed record JSON out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::broker::Publisher;
use crate::error::{AppError, Result};
use crate::models::{DocumentReady, FieldRule, ParsedRecord};
use crate::pipeline::worker::MessageHandler;
use crate::services::detail_parser::{extract_fields, type_id_from_path};
use crate::storage::LocalStorage;

/// Read one saved document and build its parsed record.
///
/// The TypeID carried by the message wins. File names have `/` folded to
/// `-`, so the name is only a fallback for bare-path messages.
pub async fn parse_document(message: &DocumentReady, rules: &[FieldRule]) -> Result<ParsedRecord> {
    let path = message.path.as_path();
    let context = path.display().to_string();
    let type_id = match &message.type_id {
        Some(id) => id.clone(),
        None => type_id_from_path(path)
            .ok_or_else(|| AppError::document(&context, "no TypeID in file name"))?,
    };
    let xml = LocalStorage::read_document(path).await?;
    let fields = extract_fields(&xml, rules, &context)?;

    Ok(ParsedRecord {
        type_id,
        document_path: context,
        fields,
        parsed_at: Utc::now(),
    })
}

/// Consumes document-ready messages and publishes parsed records.
pub struct DetailParseHandler {
    rules: Vec<FieldRule>,
    publisher: Arc<dyn Publisher>,
    out_queue: String,
}

impl DetailParseHandler {
    pub fn new(
        rules: Vec<FieldRule>,
        publisher: Arc<dyn Publisher>,
        out_queue: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            publisher,
            out_queue: out_queue.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for DetailParseHandler {
    fn name(&self) -> &str {
        "parse-details"
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let message = DocumentReady::parse(payload)?;
        let record = parse_document(&message, &self.rules).await?;
        log::info!(
            "Parsed {} ({} fields) from {}",
            record.type_id,
            record.fields.len(),
            record.document_path
        );
        self.publisher
            .publish(&self.out_queue, &record.encode()?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParserConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_parse_document_reads_type_id_from_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("12-345_2026-10-19.xml");
        std::fs::write(&path, "<Type><TypeName>Regio</TypeName></Type>").unwrap();
        let message = DocumentReady {
            type_id: None,
            path,
        };

        let record = parse_document(&message, &ParserConfig::default().fields)
            .await
            .unwrap();
        assert_eq!(record.type_id, "12-345");
        assert_eq!(record.fields["title"], "Regio");
    }

    #[tokio::test]
    async fn test_message_type_id_beats_file_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("12-345_2026-10-19.xml");
        std::fs::write(&path, "<Type><Status>Valid</Status></Type>").unwrap();

        let record = parse_document(
            &DocumentReady::new("12/345", path),
            &ParserConfig::default().fields,
        )
        .await
        .unwrap();
        assert_eq!(record.type_id, "12/345");
    }

    #[tokio::test]
    async fn test_missing_file_is_data_error() {
        let tmp = TempDir::new().unwrap();
        let message = DocumentReady::new("T1", tmp.path().join("T1_2026-10-19.xml"));
        let err = parse_document(&message, &[]).await.unwrap_err();
        assert!(err.is_data_error());
    }
}
