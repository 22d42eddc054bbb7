use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Agents: retrieval configuration per agent. Never hard-deleted; the
    // active flag is the only off switch.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            name TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            chunk_tokens INTEGER NOT NULL,
            overlap_tokens INTEGER NOT NULL,
            top_k INTEGER NOT NULL,
            similarity_threshold REAL NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sources: one row per registered document. The (agent_id, location)
    // uniqueness is what makes URL re-ingestion an update, not a duplicate.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            tenant TEXT NOT NULL,
            kind TEXT NOT NULL,
            location TEXT NOT NULL,
            content TEXT,
            checksum TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(agent_id, location),
            FOREIGN KEY (agent_id) REFERENCES agents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            tenant TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_estimate INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(source_id, chunk_index),
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Usage records are append-only; there is no update path.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_records (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            tokens INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            estimated_cost REAL NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_agent ON sources(agent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_agent_tenant ON chunks(agent_id, tenant)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_agent ON usage_records(agent_id)")
        .execute(pool)
        .await?;

    Ok(())
}
