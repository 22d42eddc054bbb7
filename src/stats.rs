//! Per-agent statistics.
//!
//! Summarizes what each agent has indexed: source counts by status, chunk
//! counts, and the token/cost totals accumulated in usage records. Used by
//! `ragmill stats` to confirm ingestion runs and spending at a glance.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::agents;

/// Aggregated numbers for one agent.
#[derive(Debug, Clone)]
pub struct AgentStats {
    pub agent_id: String,
    pub agent_name: String,
    pub active: bool,
    pub sources_total: i64,
    pub sources_completed: i64,
    pub sources_failed: i64,
    pub sources_pending: i64,
    pub chunk_count: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub last_processed: Option<i64>,
}

/// Collect statistics for one agent.
pub async fn agent_stats(pool: &SqlitePool, agent_id: &str) -> Result<AgentStats> {
    let agent = agents::get_required(pool, agent_id).await?;

    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN status IN ('pending', 'processing') THEN 1 ELSE 0 END), 0) AS pending
        FROM sources WHERE agent_id = ?
        "#,
    )
    .bind(agent_id)
    .fetch_one(pool)
    .await?;

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE agent_id = ?")
        .bind(agent_id)
        .fetch_one(pool)
        .await?;

    let usage_row = sqlx::query(
        "SELECT COALESCE(SUM(tokens), 0) AS tokens, COALESCE(SUM(estimated_cost), 0.0) AS cost,
                MAX(created_at) AS last_run
         FROM usage_records WHERE agent_id = ?",
    )
    .bind(agent_id)
    .fetch_one(pool)
    .await?;

    Ok(AgentStats {
        agent_id: agent.id,
        agent_name: agent.name,
        active: agent.active,
        sources_total: row.get("total"),
        sources_completed: row.get("completed"),
        sources_failed: row.get("failed"),
        sources_pending: row.get("pending"),
        chunk_count,
        total_tokens: usage_row.get("tokens"),
        total_cost: usage_row.get("cost"),
        last_processed: usage_row.get("last_run"),
    })
}

/// Run the stats command: print a summary for every agent of a tenant.
pub async fn run_stats(pool: &SqlitePool, tenant: &str) -> Result<()> {
    let agent_list = agents::list(pool, tenant).await?;

    if agent_list.is_empty() {
        println!("No agents registered for tenant '{}'.", tenant);
        return Ok(());
    }

    println!("ragmill — Agent Stats (tenant: {})", tenant);
    println!("{}", "=".repeat(72));
    println!();
    println!(
        "  {:<20} {:>7} {:>5} {:>7} {:>9} {:>10}   {}",
        "AGENT", "SOURCES", "FAIL", "CHUNKS", "TOKENS", "COST", "LAST RUN"
    );
    println!("  {}", "-".repeat(76));

    for agent in &agent_list {
        let s = agent_stats(pool, &agent.id).await?;
        let last = match s.last_processed {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        };
        let marker = if s.active { "" } else { " (inactive)" };
        println!(
            "  {:<20} {:>7} {:>5} {:>7} {:>9} {:>9.4}$   {}{}",
            s.agent_id, s.sources_total, s.sources_failed, s.chunk_count, s.total_tokens,
            s.total_cost, last, marker
        );
    }

    println!();
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
