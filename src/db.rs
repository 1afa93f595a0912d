use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    is_burnout, Agent, AgentUpdate, MetricRow, PerformanceRecord, StoredPerformance, Team,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let team_id: Uuid = sqlx::query(
        r#"
        INSERT INTO support_tracker.teams (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::parse_str("6f1c2a8e-4b0d-4c5e-9a43-0d6a3b2f9e11")?)
    .bind("WIEDER")
    .fetch_one(pool)
    .await?
    .get("id");

    let agents = vec![
        ("Martina Alvarez", "M. ALVAREZ"),
        ("Julian Romero", "J. ROMERO"),
        ("Daniela Mendez", "D. MENDEZ"),
    ];

    for (full_name, alias) in agents {
        sqlx::query(
            r#"
            INSERT INTO support_tracker.agents (id, team_id, full_name, excel_alias)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (team_id, excel_alias) DO UPDATE
            SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(team_id)
        .bind(full_name)
        .bind(alias)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn team_from_row(row: &PgRow) -> Team {
    Team {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn agent_from_row(row: &PgRow) -> Agent {
    Agent {
        id: row.get("id"),
        team_id: row.get("team_id"),
        full_name: row.get("full_name"),
        excel_alias: row.get("excel_alias"),
        is_active: row.get("is_active"),
    }
}

fn performance_from_row(row: &PgRow) -> StoredPerformance {
    StoredPerformance {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        date: row.get("date"),
        tickets_actual: row.get("tickets_actual"),
        tickets_goal: row.get("tickets_goal"),
        points_actual: row.get("points_actual"),
        points_goal: row.get("points_goal"),
        updated_at: row.get("updated_at"),
    }
}

/// Upper-cases an alias and collapses inner whitespace, matching how pasted rows are read.
pub fn normalize_alias(alias: &str) -> String {
    alias
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

pub async fn create_team(pool: &PgPool, name: &str) -> anyhow::Result<Team> {
    let name = name.trim();
    if name.is_empty() {
        bail!("team name is required");
    }
    if find_team_by_name(pool, name).await?.is_some() {
        bail!("team with name '{name}' already exists");
    }

    let row = sqlx::query(
        r#"
        INSERT INTO support_tracker.teams (id, name)
        VALUES ($1, $2)
        RETURNING id, name, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await
    .context("failed to insert team")?;

    Ok(team_from_row(&row))
}

async fn find_team_by_name(pool: &PgPool, name: &str) -> anyhow::Result<Option<Team>> {
    let row = sqlx::query("SELECT id, name, created_at FROM support_tracker.teams WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(team_from_row))
}

pub async fn get_team(pool: &PgPool, team_id: Uuid) -> anyhow::Result<Option<Team>> {
    let row = sqlx::query("SELECT id, name, created_at FROM support_tracker.teams WHERE id = $1")
        .bind(team_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(team_from_row))
}

pub async fn list_teams(pool: &PgPool, skip: i64, limit: i64) -> anyhow::Result<Vec<Team>> {
    let rows = sqlx::query(
        "SELECT id, name, created_at FROM support_tracker.teams ORDER BY name OFFSET $1 LIMIT $2",
    )
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(team_from_row).collect())
}

pub async fn rename_team(pool: &PgPool, team_id: Uuid, name: &str) -> anyhow::Result<Team> {
    let name = name.trim();
    if name.is_empty() {
        bail!("team name is required");
    }
    if let Some(existing) = find_team_by_name(pool, name).await? {
        if existing.id != team_id {
            bail!("team with name '{name}' already exists");
        }
    }

    let row = sqlx::query(
        r#"
        UPDATE support_tracker.teams SET name = $2
        WHERE id = $1
        RETURNING id, name, created_at
        "#,
    )
    .bind(team_id)
    .bind(name)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("team {team_id} not found"))?;

    Ok(team_from_row(&row))
}

/// Deletes a team; its agents and their performances go with it.
pub async fn delete_team(pool: &PgPool, team_id: Uuid) -> anyhow::Result<()> {
    let result = sqlx::query("DELETE FROM support_tracker.teams WHERE id = $1")
        .bind(team_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        bail!("team {team_id} not found");
    }
    Ok(())
}

async fn ensure_alias_free(
    pool: &PgPool,
    team_id: Uuid,
    alias: &str,
    except: Option<Uuid>,
) -> anyhow::Result<()> {
    let taken: Option<Uuid> = sqlx::query(
        "SELECT id FROM support_tracker.agents WHERE team_id = $1 AND excel_alias = $2",
    )
    .bind(team_id)
    .bind(alias)
    .fetch_optional(pool)
    .await?
    .map(|row| row.get("id"));

    match taken {
        Some(id) if Some(id) != except => {
            bail!("agent with excel_alias '{alias}' already exists in this team")
        }
        _ => Ok(()),
    }
}

pub async fn create_agent(
    pool: &PgPool,
    team_id: Uuid,
    full_name: &str,
    excel_alias: &str,
    is_active: bool,
) -> anyhow::Result<Agent> {
    let alias = normalize_alias(excel_alias);
    if alias.is_empty() || full_name.trim().is_empty() {
        bail!("agent full name and excel alias are required");
    }
    if get_team(pool, team_id).await?.is_none() {
        bail!("team {team_id} not found");
    }
    ensure_alias_free(pool, team_id, &alias, None).await?;

    let row = sqlx::query(
        r#"
        INSERT INTO support_tracker.agents (id, team_id, full_name, excel_alias, is_active)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, team_id, full_name, excel_alias, is_active
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(team_id)
    .bind(full_name.trim())
    .bind(&alias)
    .bind(is_active)
    .fetch_one(pool)
    .await
    .context("failed to insert agent")?;

    Ok(agent_from_row(&row))
}

pub async fn get_agent(pool: &PgPool, agent_id: Uuid) -> anyhow::Result<Option<Agent>> {
    let row = sqlx::query(
        "SELECT id, team_id, full_name, excel_alias, is_active FROM support_tracker.agents WHERE id = $1",
    )
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(agent_from_row))
}

pub async fn list_agents(
    pool: &PgPool,
    team_id: Option<Uuid>,
    is_active: Option<bool>,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<Agent>> {
    let mut query = String::from(
        "SELECT id, team_id, full_name, excel_alias, is_active \
         FROM support_tracker.agents WHERE TRUE",
    );
    let mut next = 1;

    if team_id.is_some() {
        query.push_str(&format!(" AND team_id = ${next}"));
        next += 1;
    }
    if is_active.is_some() {
        query.push_str(&format!(" AND is_active = ${next}"));
        next += 1;
    }
    query.push_str(&format!(" ORDER BY full_name OFFSET ${} LIMIT ${}", next, next + 1));

    let mut rows = sqlx::query(&query);
    if let Some(value) = team_id {
        rows = rows.bind(value);
    }
    if let Some(value) = is_active {
        rows = rows.bind(value);
    }

    let records = rows.bind(skip).bind(limit).fetch_all(pool).await?;
    Ok(records.iter().map(agent_from_row).collect())
}

pub async fn update_agent(
    pool: &PgPool,
    agent_id: Uuid,
    update: AgentUpdate,
) -> anyhow::Result<Agent> {
    let current = get_agent(pool, agent_id)
        .await?
        .with_context(|| format!("agent {agent_id} not found"))?;

    let team_id = update.team_id.unwrap_or(current.team_id);
    if update.team_id.is_some() && get_team(pool, team_id).await?.is_none() {
        bail!("team {team_id} not found");
    }

    let alias = match update.excel_alias.as_deref() {
        Some(alias) => normalize_alias(alias),
        None => current.excel_alias.clone(),
    };
    if alias.is_empty() {
        bail!("excel alias cannot be empty");
    }
    if update.team_id.is_some() || update.excel_alias.is_some() {
        ensure_alias_free(pool, team_id, &alias, Some(agent_id)).await?;
    }

    let full_name = update
        .full_name
        .map(|name| name.trim().to_string())
        .unwrap_or(current.full_name);
    if full_name.is_empty() {
        bail!("agent full name cannot be empty");
    }

    let row = sqlx::query(
        r#"
        UPDATE support_tracker.agents
        SET team_id = $2, full_name = $3, excel_alias = $4, is_active = $5
        WHERE id = $1
        RETURNING id, team_id, full_name, excel_alias, is_active
        "#,
    )
    .bind(agent_id)
    .bind(team_id)
    .bind(&full_name)
    .bind(&alias)
    .bind(update.is_active.unwrap_or(current.is_active))
    .fetch_one(pool)
    .await?;

    Ok(agent_from_row(&row))
}

pub async fn delete_agent(pool: &PgPool, agent_id: Uuid) -> anyhow::Result<()> {
    let result = sqlx::query("DELETE FROM support_tracker.agents WHERE id = $1")
        .bind(agent_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        bail!("agent {agent_id} not found");
    }
    Ok(())
}

/// Maps each alias to the active agent carrying it in the team. Unknown aliases are absent.
pub async fn resolve_aliases(
    pool: &PgPool,
    team_id: Uuid,
    aliases: &BTreeSet<String>,
) -> anyhow::Result<HashMap<String, Uuid>> {
    let wanted: Vec<String> = aliases.iter().cloned().collect();
    let rows = sqlx::query(
        r#"
        SELECT id, excel_alias FROM support_tracker.agents
        WHERE team_id = $1 AND is_active AND excel_alias = ANY($2)
        "#,
    )
    .bind(team_id)
    .bind(&wanted)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("excel_alias"), row.get("id")))
        .collect())
}

/// Inserts or updates every record keyed by (agent_id, date) in one transaction.
pub async fn bulk_upsert(
    pool: &PgPool,
    records: &[PerformanceRecord],
) -> anyhow::Result<Vec<StoredPerformance>> {
    for record in records {
        record
            .validate()
            .with_context(|| format!("refusing to store {} on {}", record.agent_id, record.date))?;
    }

    let mut tx = pool.begin().await?;
    let mut stored = Vec::with_capacity(records.len());

    for record in records {
        let row = sqlx::query(
            r#"
            INSERT INTO support_tracker.performances
            (id, agent_id, date, tickets_actual, tickets_goal, points_actual, points_goal)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (agent_id, date) DO UPDATE
            SET tickets_actual = EXCLUDED.tickets_actual,
                tickets_goal = EXCLUDED.tickets_goal,
                points_actual = EXCLUDED.points_actual,
                points_goal = EXCLUDED.points_goal,
                updated_at = now()
            RETURNING id, agent_id, date, tickets_actual, tickets_goal,
                      points_actual, points_goal, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.agent_id)
        .bind(record.date)
        .bind(record.tickets_actual)
        .bind(record.tickets_goal)
        .bind(record.points_actual)
        .bind(record.points_goal)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to upsert {} on {}", record.agent_id, record.date))?;

        stored.push(performance_from_row(&row));
    }

    tx.commit().await?;
    tracing::info!(count = stored.len(), "performances upserted");
    Ok(stored)
}

/// Loads performances from a CSV file and upserts them once every agent id is known.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<Vec<StoredPerformance>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut records = Vec::new();

    for (index, result) in reader.deserialize::<PerformanceRecord>().enumerate() {
        let record = result.with_context(|| format!("invalid CSV row {}", index + 1))?;
        record
            .validate()
            .with_context(|| format!("invalid values in CSV row {}", index + 1))?;
        records.push(record);
    }

    let agent_ids: Vec<Uuid> = records
        .iter()
        .map(|record| record.agent_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let known: HashSet<Uuid> = sqlx::query("SELECT id FROM support_tracker.agents WHERE id = ANY($1)")
        .bind(&agent_ids)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get("id"))
        .collect();

    let mut missing: Vec<String> = agent_ids
        .iter()
        .filter(|id| !known.contains(*id))
        .map(Uuid::to_string)
        .collect();
    if !missing.is_empty() {
        missing.sort();
        bail!("agents not found: {}", missing.join(", "));
    }

    bulk_upsert(pool, &records).await
}

pub async fn fetch_metrics(
    pool: &PgPool,
    team_id: Option<Uuid>,
    since_date: Option<NaiveDate>,
    limit: i64,
) -> anyhow::Result<Vec<MetricRow>> {
    let mut query = String::from(
        "SELECT p.id, p.agent_id, a.full_name, a.excel_alias, t.name AS team_name, \
         p.date, p.tickets_actual, p.tickets_goal, p.points_actual, p.points_goal \
         FROM support_tracker.performances p \
         JOIN support_tracker.agents a ON a.id = p.agent_id \
         JOIN support_tracker.teams t ON t.id = a.team_id \
         WHERE TRUE",
    );
    let mut next = 1;

    if team_id.is_some() {
        query.push_str(&format!(" AND a.team_id = ${next}"));
        next += 1;
    }
    if since_date.is_some() {
        query.push_str(&format!(" AND p.date >= ${next}"));
        next += 1;
    }
    query.push_str(&format!(" ORDER BY p.date DESC, a.full_name LIMIT ${next}"));

    let mut rows = sqlx::query(&query);
    if let Some(value) = team_id {
        rows = rows.bind(value);
    }
    if let Some(value) = since_date {
        rows = rows.bind(value);
    }

    let records = rows.bind(limit).fetch_all(pool).await?;
    let mut metrics = Vec::with_capacity(records.len());

    for row in records {
        let points_actual: f64 = row.get("points_actual");
        let points_goal: f64 = row.get("points_goal");
        metrics.push(MetricRow {
            id: row.get("id"),
            agent_id: row.get("agent_id"),
            agent_name: row.get("full_name"),
            excel_alias: row.get("excel_alias"),
            team_name: row.get("team_name"),
            date: row.get("date"),
            tickets_actual: row.get("tickets_actual"),
            tickets_goal: row.get("tickets_goal"),
            points_actual,
            points_goal,
            is_burnout: is_burnout(points_actual, points_goal),
        });
    }

    Ok(metrics)
}
