use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod ingest;
mod models;
mod parser;
mod report;

use config::Config;
use ingest::UploadRequest;
use models::AgentUpdate;

#[derive(Parser)]
#[command(name = "support-tracker")]
#[command(about = "Daily ticket and point tracking for support teams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample team with agents
    Seed,
    /// Manage teams
    #[command(subcommand)]
    Team(TeamCommand),
    /// Manage agents
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Parse text pasted from the daily spreadsheet and store it
    Upload {
        #[arg(long)]
        team_id: Uuid,
        /// Read the pasted text from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// Stamp every row with this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Year for headers that omit one; defaults to the current year
        #[arg(long)]
        base_year: Option<i32>,
        #[arg(long, value_parser = clap::value_parser!(i32).range(0..))]
        tickets_goal: Option<i32>,
        #[arg(long)]
        points_goal: Option<f64>,
        /// Parse and validate without writing
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Upsert performances from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List recent performances with burnout flags
    #[command(group(
        ArgGroup::new("output")
            .args(["csv", "json"])
            .multiple(false)
    ))]
    Metrics {
        #[arg(long)]
        team_id: Option<Uuid>,
        #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(i64).range(1..=10000))]
        limit: i64,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        team_id: Option<Uuid>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum TeamCommand {
    Create {
        #[arg(long)]
        name: String,
    },
    List {
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Show a team with its agents
    Show { id: Uuid },
    Update {
        id: Uuid,
        #[arg(long)]
        name: String,
    },
    /// Delete a team with its agents and their performances
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum AgentCommand {
    Create {
        #[arg(long)]
        team_id: Uuid,
        #[arg(long)]
        full_name: String,
        /// Name used for the agent in the spreadsheet, e.g. "M. ALVAREZ"
        #[arg(long)]
        alias: String,
        #[arg(long)]
        inactive: bool,
    },
    List {
        #[arg(long)]
        team_id: Option<Uuid>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    Show { id: Uuid },
    Update {
        id: Uuid,
        #[arg(long)]
        team_id: Option<Uuid>,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        alias: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete an agent and its performances
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Team(command) => run_team(&pool, command).await?,
        Commands::Agent(command) => run_agent(&pool, command).await?,
        Commands::Upload {
            team_id,
            file,
            date,
            base_year,
            tickets_goal,
            points_goal,
            dry_run,
            json,
        } => {
            let raw_text = match &file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut text = String::new();
                    std::io::stdin()
                        .read_to_string(&mut text)
                        .context("failed to read pasted text from stdin")?;
                    text
                }
            };
            let request = UploadRequest {
                raw_text,
                team_id,
                override_date: date,
                base_year,
                tickets_goal,
                points_goal,
            };

            if dry_run {
                let records =
                    ingest::prepare_upload(&pool, &request, config.default_goals).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    for record in &records {
                        println!(
                            "- {} on {}: {}/{} tickets, {:.1}/{:.1} points{}",
                            record.agent_id,
                            record.date,
                            record.tickets_actual,
                            record.tickets_goal,
                            record.points_actual,
                            record.points_goal,
                            if record.is_burnout() { " [burnout]" } else { "" }
                        );
                    }
                    println!("{} rows parsed, nothing written.", records.len());
                }
                return Ok(());
            }

            let stored = ingest::upload(&pool, &request, config.default_goals).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stored)?);
            } else {
                println!("Stored {} performance rows.", stored.len());
            }
        }
        Commands::Import { csv } => {
            let stored = db::import_csv(&pool, &csv).await?;
            println!("Upserted {} performances from {}.", stored.len(), csv.display());
        }
        Commands::Metrics {
            team_id,
            limit,
            csv,
            json,
        } => {
            let metrics = db::fetch_metrics(&pool, team_id, None, limit).await?;

            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report::write_metrics_csv(file, &metrics)?;
                println!("Exported {} rows to {}.", metrics.len(), path.display());
                return Ok(());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
                return Ok(());
            }
            if metrics.is_empty() {
                println!("No performance recorded yet.");
                return Ok(());
            }

            for metric in &metrics {
                println!(
                    "- {} {} ({}): {}/{} tickets, {:.1}/{:.1} points{}",
                    metric.date,
                    metric.agent_name,
                    metric.team_name,
                    metric.tickets_actual,
                    metric.tickets_goal,
                    metric.points_actual,
                    metric.points_goal,
                    if metric.is_burnout { " [burnout]" } else { "" }
                );
            }
        }
        Commands::Report {
            team_id,
            since_days,
            out,
        } => {
            let team = match team_id {
                Some(id) => Some(
                    db::get_team(&pool, id)
                        .await?
                        .with_context(|| format!("team {id} not found"))?,
                ),
                None => None,
            };
            let since_date = report::cutoff_date(since_days);
            let metrics = db::fetch_metrics(&pool, team_id, Some(since_date), i64::MAX).await?;
            let report = report::build_report(
                team.as_ref().map(|team| team.name.as_str()),
                since_days,
                since_date,
                &metrics,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn run_team(pool: &sqlx::PgPool, command: TeamCommand) -> anyhow::Result<()> {
    match command {
        TeamCommand::Create { name } => {
            let team = db::create_team(pool, &name).await?;
            println!("Created team {} ({}).", team.name, team.id);
        }
        TeamCommand::List { skip, limit } => {
            let teams = db::list_teams(pool, skip, limit).await?;
            if teams.is_empty() {
                println!("No teams yet.");
            }
            for team in teams {
                println!("- {} ({})", team.name, team.id);
            }
        }
        TeamCommand::Show { id } => {
            let team = db::get_team(pool, id)
                .await?
                .with_context(|| format!("team {id} not found"))?;
            let agents = db::list_agents(pool, Some(id), None, 0, i64::MAX).await?;
            println!("{} ({}), created {}", team.name, team.id, team.created_at);
            for agent in agents {
                print_agent(&agent);
            }
        }
        TeamCommand::Update { id, name } => {
            let team = db::rename_team(pool, id, &name).await?;
            println!("Renamed team {} to {}.", team.id, team.name);
        }
        TeamCommand::Delete { id } => {
            db::delete_team(pool, id).await?;
            println!("Deleted team {id}.");
        }
    }
    Ok(())
}

async fn run_agent(pool: &sqlx::PgPool, command: AgentCommand) -> anyhow::Result<()> {
    match command {
        AgentCommand::Create {
            team_id,
            full_name,
            alias,
            inactive,
        } => {
            let agent = db::create_agent(pool, team_id, &full_name, &alias, !inactive).await?;
            println!("Created agent {} ({}).", agent.excel_alias, agent.id);
        }
        AgentCommand::List {
            team_id,
            active,
            skip,
            limit,
        } => {
            let agents = db::list_agents(pool, team_id, active, skip, limit).await?;
            if agents.is_empty() {
                println!("No agents found.");
            }
            for agent in agents {
                print_agent(&agent);
            }
        }
        AgentCommand::Show { id } => {
            let agent = db::get_agent(pool, id)
                .await?
                .with_context(|| format!("agent {id} not found"))?;
            print_agent(&agent);
        }
        AgentCommand::Update {
            id,
            team_id,
            full_name,
            alias,
            active,
        } => {
            let update = AgentUpdate {
                team_id,
                full_name,
                excel_alias: alias,
                is_active: active,
            };
            let agent = db::update_agent(pool, id, update).await?;
            print_agent(&agent);
        }
        AgentCommand::Delete { id } => {
            db::delete_agent(pool, id).await?;
            println!("Deleted agent {id}.");
        }
    }
    Ok(())
}

fn print_agent(agent: &models::Agent) {
    println!(
        "- {} \"{}\" ({}, team {}){}",
        agent.full_name,
        agent.excel_alias,
        agent.id,
        agent.team_id,
        if agent.is_active { "" } else { " [inactive]" }
    );
}
