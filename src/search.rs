//! Similarity search over an agent's chunks.
//!
//! Embeds the query, scores every chunk vector scoped to (agent, tenant)
//! with cosine similarity, filters by the agent's similarity threshold, and
//! returns the top results ordered by score descending. The result count is
//! capped at [`MAX_RESULTS`] regardless of the requested limit.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::agents;
use crate::embedding::{self, EmbeddingClient};
use crate::models::SearchHit;

/// Hard upper bound on returned hits, whatever the caller asks for.
pub const MAX_RESULTS: i64 = 20;

/// Run a similarity search for one agent.
///
/// An agent with zero chunks yields an empty result set, not an error.
/// `limit` defaults to the agent's configured top_k.
pub async fn run_search(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    agent_id: &str,
    tenant: &str,
    query: &str,
    limit: Option<i64>,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let agent = agents::get_required(pool, agent_id).await?;
    let query_vec = embedding::embed_query(embedder, query).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.source_id, c.chunk_index, c.text, c.embedding,
               s.location AS source_location
        FROM chunks c
        JOIN sources s ON s.id = c.source_id
        WHERE c.agent_id = ? AND c.tenant = ?
        "#,
    )
    .bind(&agent.id)
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .filter_map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let score = embedding::cosine_similarity(&query_vec, &vec) as f64;
            if score < agent.similarity_threshold {
                return None;
            }
            Some(SearchHit {
                chunk_id: row.get("chunk_id"),
                source_id: row.get("source_id"),
                source_location: row.get("source_location"),
                chunk_index: row.get("chunk_index"),
                score,
                text: row.get("text"),
            })
        })
        .collect();

    // Score desc, then chunk id asc for a deterministic order on ties.
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    let cap = limit.unwrap_or(agent.top_k).clamp(1, MAX_RESULTS);
    hits.truncate(cap as usize);

    Ok(hits)
}

/// CLI entry point — runs the search and prints ranked hits.
pub async fn print_search(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    agent_id: &str,
    tenant: &str,
    query: &str,
    limit: Option<i64>,
) -> Result<()> {
    let hits = run_search(pool, embedder, agent_id, tenant, query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            hit.score,
            hit.source_location,
            hit.chunk_index
        );
        let excerpt: String = hit.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
        println!("    chunk: {}", hit.chunk_id);
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::vec_to_blob;
    use crate::{agents::AgentSpec, migrate};
    use anyhow::bail;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Returns a fixed unit vector for every input.
    struct ConstantEmbedder {
        vec: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingClient for ConstantEmbedder {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            self.vec.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                bail!("no texts");
            }
            Ok(texts.iter().map(|_| self.vec.clone()).collect())
        }
    }

    async fn setup() -> (tempfile::TempDir, SqlitePool, Config) {
        let tmp = tempfile::TempDir::new().unwrap();
        let toml = format!("[db]\npath = \"{}/ragmill.sqlite\"\n", tmp.path().display());
        let path = tmp.path().join("ragmill.toml");
        std::fs::write(&path, toml).unwrap();
        let config = crate::config::load_config(&path).unwrap();
        let pool = crate::db::connect(&config.db.path).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool, config)
    }

    async fn insert_chunk(pool: &SqlitePool, source_id: &str, agent: &str, tenant: &str, index: i64, vec: &[f32]) {
        sqlx::query(
            "INSERT INTO chunks (id, source_id, agent_id, tenant, chunk_index, text,
                                 token_estimate, embedding, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, '{}')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(source_id)
        .bind(agent)
        .bind(tenant)
        .bind(index)
        .bind(format!("chunk number {}", index))
        .bind(4i64)
        .bind(vec_to_blob(vec))
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_source(pool: &SqlitePool, agent: &str, tenant: &str) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sources (id, agent_id, tenant, kind, location, status, created_at, updated_at)
             VALUES (?, ?, ?, 'text', ?, 'completed', 0, 0)",
        )
        .bind(&id)
        .bind(agent)
        .bind(tenant)
        .bind(format!("text:{}", id))
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_empty_agent_returns_empty() {
        let (_tmp, pool, config) = setup().await;
        agents::register(&pool, &config, "a1", "t", AgentSpec::default())
            .await
            .unwrap();

        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        let hits = run_search(&pool, &embedder, "a1", "t", "anything", None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_missing_agent_errors() {
        let (_tmp, pool, _config) = setup().await;
        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        assert!(run_search(&pool, &embedder, "ghost", "t", "q", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_threshold_filters_low_scores() {
        let (_tmp, pool, config) = setup().await;
        agents::register(
            &pool,
            &config,
            "a1",
            "t",
            AgentSpec {
                similarity_threshold: Some(0.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let source = insert_source(&pool, "a1", "t").await;
        // Aligned with the query vector → score 1.0.
        insert_chunk(&pool, &source, "a1", "t", 0, &[1.0, 0.0]).await;
        // Orthogonal → score 0.0, below threshold.
        insert_chunk(&pool, &source, "a1", "t", 1, &[0.0, 1.0]).await;

        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        let hits = run_search(&pool, &embedder, "a1", "t", "q", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_index, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hard_cap_of_twenty() {
        let (_tmp, pool, config) = setup().await;
        agents::register(
            &pool,
            &config,
            "a1",
            "t",
            AgentSpec {
                similarity_threshold: Some(0.0),
                top_k: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let source = insert_source(&pool, "a1", "t").await;
        for i in 0..30 {
            insert_chunk(&pool, &source, "a1", "t", i, &[1.0, 0.0]).await;
        }

        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        let hits = run_search(&pool, &embedder, "a1", "t", "q", Some(50)).await.unwrap();
        assert_eq!(hits.len() as i64, MAX_RESULTS);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let (_tmp, pool, config) = setup().await;
        agents::register(
            &pool,
            &config,
            "a1",
            "t1",
            AgentSpec {
                similarity_threshold: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let source = insert_source(&pool, "a1", "t1").await;
        insert_chunk(&pool, &source, "a1", "t1", 0, &[1.0, 0.0]).await;
        let other = insert_source(&pool, "a1", "t2").await;
        insert_chunk(&pool, &other, "a1", "t2", 0, &[1.0, 0.0]).await;

        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        let hits = run_search(&pool, &embedder, "a1", "t1", "q", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, source);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_scores_zero() {
        let (_tmp, pool, config) = setup().await;
        agents::register(
            &pool,
            &config,
            "a1",
            "t",
            AgentSpec {
                similarity_threshold: Some(0.1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let source = insert_source(&pool, "a1", "t").await;
        // Stored with three dims, queried with two: scores 0, filtered out.
        insert_chunk(&pool, &source, "a1", "t", 0, &[1.0, 0.0, 0.0]).await;

        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        let hits = run_search(&pool, &embedder, "a1", "t", "q", None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_returns_empty() {
        let (_tmp, pool, config) = setup().await;
        agents::register(&pool, &config, "a1", "t", AgentSpec::default())
            .await
            .unwrap();
        let embedder = ConstantEmbedder { vec: vec![1.0, 0.0] };
        let hits = run_search(&pool, &embedder, "a1", "t", "   ", None).await.unwrap();
        assert!(hits.is_empty());
    }
}
