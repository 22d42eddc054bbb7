//! Core data models for the ingestion and retrieval pipeline.
//!
//! These types represent the agents and sources that flow through ingestion,
//! plus the hits returned by similarity search. Chunk and usage rows are
//! bound directly in SQL and never leave their modules as structs.

use anyhow::{bail, Result};

/// Retrieval configuration and identity for one agent.
///
/// An agent owns its sources and chunks and carries the knobs that shape
/// ingestion (chunk size/overlap, embedding model) and search (top_k,
/// similarity threshold). Agents are deactivated, never hard-deleted.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub tenant: String,
    pub name: String,
    pub embedding_model: String,
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub top_k: i64,
    pub similarity_threshold: f64,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// How a source's content enters the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Fetched from a web URL; re-ingestion is checksum-gated.
    Url,
    /// Uploaded file; content is captured at registration time.
    Upload,
    /// Manual text supplied directly.
    Text,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Url => "url",
            SourceKind::Upload => "upload",
            SourceKind::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "url" => Ok(SourceKind::Url),
            "upload" => Ok(SourceKind::Upload),
            "text" => Ok(SourceKind::Text),
            other => bail!("Unknown source kind: '{}'. Use url, upload, or text.", other),
        }
    }
}

/// Processing lifecycle of a source.
///
/// `pending → processing → completed | failed`. A failed source retains its
/// error message and is only retried by an explicit reprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Completed => "completed",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SourceStatus::Pending),
            "processing" => Ok(SourceStatus::Processing),
            "completed" => Ok(SourceStatus::Completed),
            "failed" => Ok(SourceStatus::Failed),
            other => bail!("Unknown source status: '{}'", other),
        }
    }
}

/// A registered source document belonging to one agent.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub agent_id: String,
    pub tenant: String,
    pub kind: SourceKind,
    /// URL, original file path, or a label for manual text.
    pub location: String,
    /// Raw content for upload/text sources; URLs are fetched at process time.
    pub content: Option<String>,
    /// SHA-256 of the extracted text, set after a successful processing run.
    pub checksum: Option<String>,
    pub status: SourceStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A ranked hit returned by similarity search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub source_id: String,
    pub source_location: String,
    pub chunk_index: i64,
    pub score: f64,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SourceStatus::Pending,
            SourceStatus::Processing,
            SourceStatus::Completed,
            SourceStatus::Failed,
        ] {
            assert_eq!(SourceStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_unknown_errors() {
        assert!(SourceStatus::parse("done").is_err());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [SourceKind::Url, SourceKind::Upload, SourceKind::Text] {
            assert_eq!(SourceKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_kind_unknown_errors() {
        assert!(SourceKind::parse("web").is_err());
    }
}
