//! Agent registry.
//!
//! Agents are created on first use (register is an upsert keyed by id) and
//! mutated only via configuration update. There is no hard delete — an agent
//! is taken out of service by clearing its active flag, which keeps its
//! sources, chunks, and usage history intact.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::{Config, DefaultsConfig};
use crate::models::Agent;

/// Registration request; unset knobs fall back to `[defaults]`.
#[derive(Debug, Clone, Default)]
pub struct AgentSpec {
    pub name: Option<String>,
    pub embedding_model: Option<String>,
    pub chunk_tokens: Option<usize>,
    pub overlap_tokens: Option<usize>,
    pub top_k: Option<i64>,
    pub similarity_threshold: Option<f64>,
}

/// Create or update an agent's configuration record.
pub async fn register(
    pool: &SqlitePool,
    config: &Config,
    agent_id: &str,
    tenant: &str,
    spec: AgentSpec,
) -> Result<Agent> {
    if agent_id.trim().is_empty() {
        bail!("agent id must not be empty");
    }

    let defaults: &DefaultsConfig = &config.defaults;
    let chunk_tokens = spec.chunk_tokens.unwrap_or(defaults.chunk_tokens);
    let overlap_tokens = spec.overlap_tokens.unwrap_or(defaults.overlap_tokens);
    let top_k = spec.top_k.unwrap_or(defaults.top_k);
    let similarity_threshold = spec
        .similarity_threshold
        .unwrap_or(defaults.similarity_threshold);

    // Per-agent overrides get the same boundary checks as the config file.
    if chunk_tokens == 0 {
        bail!("chunk_tokens must be > 0");
    }
    if overlap_tokens >= chunk_tokens {
        bail!(
            "overlap_tokens ({}) must be < chunk_tokens ({})",
            overlap_tokens,
            chunk_tokens
        );
    }
    if top_k < 1 {
        bail!("top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&similarity_threshold) {
        bail!("similarity_threshold must be in [0.0, 1.0]");
    }

    let embedding_model = spec
        .embedding_model
        .or_else(|| config.embedding.model.clone())
        .unwrap_or_else(|| "disabled".to_string());
    let name = spec.name.unwrap_or_else(|| agent_id.to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO agents (id, tenant, name, embedding_model, chunk_tokens, overlap_tokens,
                            top_k, similarity_threshold, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            embedding_model = excluded.embedding_model,
            chunk_tokens = excluded.chunk_tokens,
            overlap_tokens = excluded.overlap_tokens,
            top_k = excluded.top_k,
            similarity_threshold = excluded.similarity_threshold,
            active = 1,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(agent_id)
    .bind(tenant)
    .bind(&name)
    .bind(&embedding_model)
    .bind(chunk_tokens as i64)
    .bind(overlap_tokens as i64)
    .bind(top_k)
    .bind(similarity_threshold)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_required(pool, agent_id).await
}

/// Fetch an agent by id, or `None` if absent.
pub async fn get(pool: &SqlitePool, agent_id: &str) -> Result<Option<Agent>> {
    let row = sqlx::query(
        "SELECT id, tenant, name, embedding_model, chunk_tokens, overlap_tokens, top_k,
                similarity_threshold, active, created_at, updated_at
         FROM agents WHERE id = ?",
    )
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    row.map(agent_from_row).transpose()
}

/// Fetch an agent by id, erroring if absent.
pub async fn get_required(pool: &SqlitePool, agent_id: &str) -> Result<Agent> {
    match get(pool, agent_id).await? {
        Some(agent) => Ok(agent),
        None => bail!("agent not found: {}", agent_id),
    }
}

/// List all agents for a tenant, newest first.
pub async fn list(pool: &SqlitePool, tenant: &str) -> Result<Vec<Agent>> {
    let rows = sqlx::query(
        "SELECT id, tenant, name, embedding_model, chunk_tokens, overlap_tokens, top_k,
                similarity_threshold, active, created_at, updated_at
         FROM agents WHERE tenant = ? ORDER BY created_at DESC, id ASC",
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(agent_from_row).collect()
}

/// Clear the active flag. Sources and chunks are left in place.
pub async fn deactivate(pool: &SqlitePool, agent_id: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query("UPDATE agents SET active = 0, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(agent_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        bail!("agent not found: {}", agent_id);
    }
    Ok(())
}

fn agent_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Agent> {
    Ok(Agent {
        id: row.get("id"),
        tenant: row.get("tenant"),
        name: row.get("name"),
        embedding_model: row.get("embedding_model"),
        chunk_tokens: row.get::<i64, _>("chunk_tokens") as usize,
        overlap_tokens: row.get::<i64, _>("overlap_tokens") as usize,
        top_k: row.get("top_k"),
        similarity_threshold: row.get("similarity_threshold"),
        active: row.get::<i64, _>("active") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
