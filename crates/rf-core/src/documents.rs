//! Attached document resolution
//!
//! Uploaded documents are stored as `{id}.{ext}` under the upload directory.
//! A run references them by id; ids are resolved before the run starts so a
//! missing document is rejected up front.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::{Error, Result};

/// Extensions searched when resolving an id, in order
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// A document attached to a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDocument {
    pub id: String,
    pub path: PathBuf,
}

impl AttachedDocument {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Whether the content can be inlined as text
    pub fn is_text(&self) -> bool {
        matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        )
    }

    /// Read a text document, keeping at most `max_chars` characters.
    /// Returns `None` for binary documents.
    ///
    /// Only the first `4 * max_chars` bytes are read. Bytes that are not
    /// valid UTF-8 become U+FFFD.
    pub async fn read_text(&self, max_chars: usize) -> Result<Option<String>> {
        if !self.is_text() {
            return Ok(None);
        }
        let file = tokio::fs::File::open(&self.path).await?;
        let limit = u64::try_from(max_chars.saturating_mul(4)).unwrap_or(u64::MAX);
        let mut bytes = Vec::new();
        file.take(limit).read_to_end(&mut bytes).await?;

        let content = String::from_utf8_lossy(&bytes);
        Ok(Some(content.chars().take(max_chars).collect()))
    }
}

/// Resolves document ids against the upload directory
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn validate_id(id: &str) -> Result<()> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!("invalid document id: {:?}", id)))
        }
    }

    /// Find the file for one id
    pub async fn resolve_one(&self, id: &str) -> Result<AttachedDocument> {
        Self::validate_id(id)?;

        for ext in ACCEPTED_EXTENSIONS {
            let path = self.root.join(format!("{}.{}", id, ext));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!("Resolved document {} -> {}", id, path.display());
                return Ok(AttachedDocument {
                    id: id.to_string(),
                    path,
                });
            }
        }

        Err(Error::DocumentNotFound(id.to_string()))
    }

    /// Resolve every id, preserving order. Fails on the first unknown id.
    pub async fn resolve(&self, ids: &[String]) -> Result<Vec<AttachedDocument>> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            documents.push(self.resolve_one(id).await?);
        }
        Ok(documents)
    }
}
