//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one source: registration → content fetch or
//! read → extraction → chunking → embedding → storage. Chunk replacement,
//! the usage record, and the completed-status update commit in a single
//! transaction, so a crash or embedding failure mid-run can never leave a
//! source half-replaced — the previous chunk set stays queryable until the
//! new one lands whole.
//!
//! URL re-ingestion is checksum-gated (unchanged content is a no-op); the
//! explicit reprocess entry point always re-chunks regardless of checksum.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agents;
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{vec_to_blob, EmbeddingClient};
use crate::extract::{self, Extracted, PageMeta};
use crate::models::{Agent, Source, SourceKind, SourceStatus};

/// Result of one ingestion or processing run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source_id: String,
    /// True when a checksum match made the run a no-op.
    pub skipped: bool,
    pub chunk_count: u64,
    pub tokens: i64,
    pub estimated_cost: f64,
}

/// The ingestion pipeline with its dependencies passed in explicitly.
pub struct IngestPipeline {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingClient>,
    config: Config,
    http: reqwest::Client,
}

impl IngestPipeline {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingClient>, config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.crawler.user_agent.clone())
            .timeout(Duration::from_secs(config.crawler.page_timeout_secs))
            .build()?;

        Ok(Self {
            pool,
            embedder,
            config,
            http,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a source for an agent. The agent is created on first use.
    ///
    /// URL sources are unique per (agent, location): re-adding an existing
    /// URL returns the existing row instead of duplicating it. Text sources
    /// without a label get a generated one.
    pub async fn add_source(
        &self,
        agent_id: &str,
        tenant: &str,
        kind: SourceKind,
        location: Option<String>,
        content: Option<String>,
    ) -> Result<Source> {
        let agent = self.ensure_agent(agent_id, tenant).await?;

        let location = match (kind, location) {
            (SourceKind::Url, Some(loc)) => loc,
            (SourceKind::Url, None) => bail!("URL sources require a location"),
            (SourceKind::Upload, Some(loc)) => loc,
            (SourceKind::Upload, None) => bail!("Upload sources require a file path"),
            (SourceKind::Text, Some(loc)) => loc,
            (SourceKind::Text, None) => format!("text:{}", Uuid::new_v4()),
        };

        match kind {
            SourceKind::Url => {
                if content.is_some() {
                    bail!("URL sources are fetched at process time; no inline content");
                }
            }
            SourceKind::Upload | SourceKind::Text => {
                if content.is_none() {
                    bail!("{} sources require content", kind.as_str());
                }
            }
        }

        if let Some(existing) = self.find_source(&agent.id, &location).await? {
            return Ok(existing);
        }

        let now = chrono::Utc::now().timestamp();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO sources (id, agent_id, tenant, kind, location, content, status,
                                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&agent.id)
        .bind(tenant)
        .bind(kind.as_str())
        .bind(&location)
        .bind(&content)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_source(&id).await
    }

    /// Process a source end to end: extract, chunk, embed, store.
    ///
    /// Always re-chunks and replaces — this is the explicit entry point, not
    /// the checksum-gated URL path. On failure the source is marked `failed`
    /// with the error message and the previous chunk set is left intact.
    pub async fn process_source(&self, source_id: &str) -> Result<IngestOutcome> {
        let source = self.get_source(source_id).await?;
        let agent = agents::get_required(&self.pool, &source.agent_id).await?;

        self.mark_processing(&source.id).await?;

        let result = self.run_pipeline(&agent, &source).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_failed(&source.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Ingest a URL for an agent, registering the source if needed.
    ///
    /// Checksum-gated: when the fetched content hashes to the stored
    /// checksum and the source already completed, the run is skipped.
    pub async fn ingest_url(&self, agent_id: &str, tenant: &str, url: &str) -> Result<IngestOutcome> {
        let source = self
            .add_source(agent_id, tenant, SourceKind::Url, Some(url.to_string()), None)
            .await?;
        let agent = agents::get_required(&self.pool, &source.agent_id).await?;

        let html = match self.fetch_url(url).await {
            Ok(body) => body,
            Err(e) => {
                // A dead URL is a failed run, same as any pipeline error.
                self.mark_failed(&source.id, &e.to_string()).await?;
                return Err(e);
            }
        };
        let extracted = extract::extract_html(&html, self.config.crawler.max_page_bytes);

        self.ingest_extracted(&agent, &source, extracted).await
    }

    /// Store already-extracted content for a source, honoring the checksum
    /// gate. Used by the URL ingestion path and the crawler.
    pub async fn ingest_extracted(
        &self,
        agent: &Agent,
        source: &Source,
        extracted: Extracted,
    ) -> Result<IngestOutcome> {
        let checksum = hash_text(&extracted.text);
        if source.status == SourceStatus::Completed && source.checksum.as_deref() == Some(&checksum)
        {
            return Ok(IngestOutcome {
                source_id: source.id.clone(),
                skipped: true,
                chunk_count: 0,
                tokens: 0,
                estimated_cost: 0.0,
            });
        }

        self.mark_processing(&source.id).await?;

        match self.store_extracted(agent, source, &extracted, &checksum).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_failed(&source.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Explicit reprocess: identical to [`process_source`] — content is
    /// always re-chunked and old chunks replaced regardless of checksum.
    pub async fn reprocess(&self, source_id: &str) -> Result<IngestOutcome> {
        self.process_source(source_id).await
    }

    /// Operator-explicit source deletion. Chunks go with the source.
    pub async fn delete_source(&self, source_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            bail!("source not found: {}", source_id);
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_source(&self, source_id: &str) -> Result<Source> {
        let row = sqlx::query(
            "SELECT id, agent_id, tenant, kind, location, content, checksum, status,
                    error_message, created_at, updated_at
             FROM sources WHERE id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => source_from_row(row),
            None => bail!("source not found: {}", source_id),
        }
    }

    /// List an agent's sources, newest first.
    pub async fn list_sources(&self, agent_id: &str) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, agent_id, tenant, kind, location, content, checksum, status,
                    error_message, created_at, updated_at
             FROM sources WHERE agent_id = ? ORDER BY created_at DESC, id ASC",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(source_from_row).collect()
    }

    // ============ Pipeline internals ============

    async fn ensure_agent(&self, agent_id: &str, tenant: &str) -> Result<Agent> {
        match agents::get(&self.pool, agent_id).await? {
            Some(agent) => Ok(agent),
            None => {
                // Created on first use, with the configured defaults.
                agents::register(&self.pool, &self.config, agent_id, tenant, Default::default())
                    .await
            }
        }
    }

    async fn run_pipeline(&self, agent: &Agent, source: &Source) -> Result<IngestOutcome> {
        let extracted = self.load_content(source).await?;
        let checksum = hash_text(&extracted.text);
        self.store_extracted(agent, source, &extracted, &checksum).await
    }

    /// Fetch or read a source's content according to its kind.
    async fn load_content(&self, source: &Source) -> Result<Extracted> {
        let cap = self.config.crawler.max_page_bytes;
        match source.kind {
            SourceKind::Url => {
                let html = self.fetch_url(&source.location).await?;
                Ok(extract::extract_html(&html, cap))
            }
            SourceKind::Upload => {
                let content = source
                    .content
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("upload source has no stored content"))?;
                if looks_like_html(&source.location, content) {
                    Ok(extract::extract_html(content, cap))
                } else {
                    Ok(Extracted {
                        text: extract::clean_text(content, cap),
                        meta: PageMeta::default(),
                    })
                }
            }
            SourceKind::Text => {
                let content = source
                    .content
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("text source has no stored content"))?;
                Ok(Extracted {
                    text: extract::clean_text(content, cap),
                    meta: PageMeta::default(),
                })
            }
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Chunk, embed, and commit the replacement atomically.
    async fn store_extracted(
        &self,
        agent: &Agent,
        source: &Source,
        extracted: &Extracted,
        checksum: &str,
    ) -> Result<IngestOutcome> {
        let spans = chunk_text(&extracted.text, agent.chunk_tokens, agent.overlap_tokens);

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };

        if vectors.len() != spans.len() {
            bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                spans.len(),
                vectors.len()
            );
        }

        let metadata_json = serde_json::to_string(&extracted.meta)?;
        let tokens: i64 = spans.iter().map(|s| s.token_estimate).sum();
        let estimated_cost =
            tokens as f64 / 1_000_000.0 * self.config.embedding.price_per_million_tokens;
        let now = chrono::Utc::now().timestamp();

        // Replacement is all-or-nothing: old chunks are only gone once the
        // new set, the usage record, and the status update all commit.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(&source.id)
            .execute(&mut *tx)
            .await?;

        for (span, vector) in spans.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_id, agent_id, tenant, chunk_index, text,
                                    token_estimate, embedding, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&source.id)
            .bind(&agent.id)
            .bind(&source.tenant)
            .bind(span.index)
            .bind(&span.text)
            .bind(span.token_estimate)
            .bind(vec_to_blob(vector))
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO usage_records (id, agent_id, source_id, tokens, chunk_count,
                                       estimated_cost, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&agent.id)
        .bind(&source.id)
        .bind(tokens)
        .bind(spans.len() as i64)
        .bind(estimated_cost)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE sources SET status = 'completed', checksum = ?, error_message = NULL,
                    updated_at = ? WHERE id = ?",
        )
        .bind(checksum)
        .bind(now)
        .bind(&source.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IngestOutcome {
            source_id: source.id.clone(),
            skipped: false,
            chunk_count: spans.len() as u64,
            tokens,
            estimated_cost,
        })
    }

    async fn find_source(&self, agent_id: &str, location: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, agent_id, tenant, kind, location, content, checksum, status,
                    error_message, created_at, updated_at
             FROM sources WHERE agent_id = ? AND location = ?",
        )
        .bind(agent_id)
        .bind(location)
        .fetch_optional(&self.pool)
        .await?;

        row.map(source_from_row).transpose()
    }

    async fn mark_processing(&self, source_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE sources SET status = 'processing', error_message = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, source_id: &str, message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE sources SET status = 'failed', error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(message)
        .bind(now)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn looks_like_html(location: &str, content: &str) -> bool {
    let loc = location.to_ascii_lowercase();
    if loc.ends_with(".html") || loc.ends_with(".htm") {
        return true;
    }
    let head = content.trim_start();
    head.starts_with("<!DOCTYPE") || head.starts_with("<html")
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn source_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        tenant: row.get("tenant"),
        kind: SourceKind::parse(row.get::<String, _>("kind").as_str())?,
        location: row.get("location"),
        content: row.get("content"),
        checksum: row.get("checksum"),
        status: SourceStatus::parse(row.get::<String, _>("status").as_str())?,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
