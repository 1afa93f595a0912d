use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::error::IngestError;
use crate::models::{Goals, PerformanceRecord, StoredPerformance};
use crate::parser::{self, ParseOptions, RawBlock};

/// Goals for one upload: explicit overrides first, then the row's own values,
/// then the configured defaults.
#[derive(Debug, Clone, Copy)]
pub struct GoalSettings {
    pub defaults: Goals,
    pub tickets_override: Option<i32>,
    pub points_override: Option<f64>,
}

impl GoalSettings {
    /// Fails when an override is negative, NaN or infinite.
    pub fn new(
        defaults: Goals,
        tickets_override: Option<i32>,
        points_override: Option<f64>,
    ) -> Result<Self, IngestError> {
        if let Some(tickets) = tickets_override.filter(|tickets| *tickets < 0) {
            return Err(IngestError::InvalidGoal {
                field: "tickets",
                value: tickets.to_string(),
            });
        }
        let bad_points = points_override.filter(|points| !points.is_finite() || *points < 0.0);
        if let Some(points) = bad_points {
            return Err(IngestError::InvalidGoal {
                field: "points",
                value: points.to_string(),
            });
        }
        Ok(Self {
            defaults,
            tickets_override,
            points_override,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub raw_text: String,
    pub team_id: Uuid,
    pub override_date: Option<NaiveDate>,
    pub base_year: Option<i32>,
    pub tickets_goal: Option<i32>,
    pub points_goal: Option<f64>,
}

pub fn collect_aliases(blocks: &[RawBlock]) -> BTreeSet<String> {
    blocks
        .iter()
        .flat_map(|block| block.rows.iter())
        .map(|row| row.alias.clone())
        .collect()
}

/// Every alias with each of its shorter word prefixes, for the alias lookup.
/// `M. ALVAREZ ABC` yields `M.`, `M. ALVAREZ` and `M. ALVAREZ ABC`.
pub fn alias_candidates(aliases: &BTreeSet<String>) -> BTreeSet<String> {
    let mut candidates = BTreeSet::new();
    for alias in aliases {
        let words: Vec<&str> = alias.split(' ').collect();
        for len in 1..=words.len() {
            candidates.insert(words[..len].join(" "));
        }
    }
    candidates
}

/// Fails on the first row whose alias is unknown but starts with a known alias.
/// The extra words are a value cell that did not parse as a number.
pub fn check_misread_cells(
    blocks: &[RawBlock],
    resolved: &HashMap<String, Uuid>,
) -> Result<(), IngestError> {
    for row in blocks.iter().flat_map(|block| block.rows.iter()) {
        if resolved.contains_key(&row.alias) {
            continue;
        }
        let known = resolved
            .keys()
            .filter(|known| {
                row.alias
                    .strip_prefix(known.as_str())
                    .is_some_and(|rest| rest.starts_with(' '))
            })
            .max_by_key(|known| known.len());
        if let Some(known) = known {
            let extra = row.alias[known.len()..].trim();
            return Err(IngestError::format(
                row.line,
                &row.content,
                format!("non-numeric value {extra:?} after agent {known}"),
            ));
        }
    }
    Ok(())
}

/// Fails with every alias that has no agent, sorted.
pub fn check_aliases(
    team: &str,
    aliases: &BTreeSet<String>,
    resolved: &HashMap<String, Uuid>,
) -> Result<(), IngestError> {
    let missing: Vec<String> = aliases
        .iter()
        .filter(|alias| !resolved.contains_key(*alias))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(IngestError::UnresolvedAgents {
            team: team.to_string(),
            aliases: missing,
        })
    }
}

/// Builds one record per (agent, date). The first row for a pair wins.
pub fn assemble(
    blocks: &[RawBlock],
    resolved: &HashMap<String, Uuid>,
    goals: &GoalSettings,
) -> Vec<PerformanceRecord> {
    let mut seen: HashSet<(Uuid, NaiveDate)> = HashSet::new();
    let mut records = Vec::new();

    for block in blocks {
        for row in &block.rows {
            let Some(agent_id) = resolved.get(&row.alias).copied() else {
                continue;
            };
            if !seen.insert((agent_id, block.date)) {
                tracing::warn!(
                    alias = %row.alias,
                    date = %block.date,
                    line = row.line,
                    header_line = block.line,
                    "duplicate row for agent and date, keeping the first"
                );
                continue;
            }

            records.push(PerformanceRecord {
                agent_id,
                date: block.date,
                tickets_actual: row.tickets_actual,
                tickets_goal: goals
                    .tickets_override
                    .or(row.tickets_goal)
                    .unwrap_or(goals.defaults.tickets),
                points_actual: row.points_actual,
                points_goal: goals
                    .points_override
                    .or(row.points_goal)
                    .unwrap_or(goals.defaults.points),
            });
        }
    }

    records
}

/// Parses and validates an upload against the team's agents without writing.
pub async fn prepare_upload(
    pool: &PgPool,
    request: &UploadRequest,
    defaults: Goals,
) -> anyhow::Result<Vec<PerformanceRecord>> {
    let goals = GoalSettings::new(defaults, request.tickets_goal, request.points_goal)?;
    let team = db::get_team(pool, request.team_id)
        .await?
        .with_context(|| format!("team {} not found", request.team_id))?;

    let options = ParseOptions::new(request.override_date, request.base_year);
    let blocks = parser::parse_raw_text(&request.raw_text, &options)?;
    if blocks.iter().all(|block| block.rows.is_empty()) {
        return Err(IngestError::NoData.into());
    }

    let aliases = collect_aliases(&blocks);
    let resolved = db::resolve_aliases(pool, team.id, &alias_candidates(&aliases)).await?;
    check_misread_cells(&blocks, &resolved)?;
    check_aliases(&team.name, &aliases, &resolved)?;

    let records = assemble(&blocks, &resolved, &goals);
    tracing::info!(
        team = %team.name,
        blocks = blocks.len(),
        records = records.len(),
        "upload parsed"
    );
    Ok(records)
}

pub async fn upload(
    pool: &PgPool,
    request: &UploadRequest,
    defaults: Goals,
) -> anyhow::Result<Vec<StoredPerformance>> {
    let records = prepare_upload(pool, request, defaults).await?;
    db::bulk_upsert(pool, &records).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RawRow;

    fn ymd(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn row(alias: &str, tickets: i32, tickets_goal: Option<i32>) -> RawRow {
        RawRow {
            line: 3,
            content: format!("{alias} {tickets} 30 0"),
            alias: alias.to_string(),
            tickets_actual: tickets,
            points_actual: 9.0,
            tickets_goal,
            points_goal: None,
        }
    }

    fn goals() -> GoalSettings {
        GoalSettings {
            defaults: Goals {
                tickets: 40,
                points: 8.0,
            },
            tickets_override: None,
            points_override: None,
        }
    }

    #[test]
    fn applies_row_goal_then_default() {
        let alvarez = Uuid::new_v4();
        let romero = Uuid::new_v4();
        let resolved = HashMap::from([
            ("M. ALVAREZ".to_string(), alvarez),
            ("J. ROMERO".to_string(), romero),
        ]);
        let blocks = vec![RawBlock {
            line: 1,
            date: ymd(1, 1),
            rows: vec![row("M. ALVAREZ", 25, Some(30)), row("J. ROMERO", 20, None)],
        }];

        let records = assemble(&blocks, &resolved, &goals());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agent_id, alvarez);
        assert_eq!(records[0].tickets_goal, 30);
        assert_eq!(records[1].tickets_goal, 40);
        assert_eq!(records[1].points_goal, 8.0);
        assert!(records[1].is_burnout());
    }

    #[test]
    fn call_overrides_beat_row_goals() {
        let alvarez = Uuid::new_v4();
        let resolved = HashMap::from([("M. ALVAREZ".to_string(), alvarez)]);
        let blocks = vec![RawBlock {
            line: 1,
            date: ymd(1, 1),
            rows: vec![row("M. ALVAREZ", 25, Some(30))],
        }];
        let settings = GoalSettings {
            tickets_override: Some(50),
            points_override: Some(9.0),
            ..goals()
        };

        let records = assemble(&blocks, &resolved, &settings);
        assert_eq!(records[0].tickets_goal, 50);
        assert_eq!(records[0].points_goal, 9.0);
        assert!(!records[0].is_burnout());
    }

    #[test]
    fn keeps_first_row_per_agent_and_date() {
        let alvarez = Uuid::new_v4();
        let resolved = HashMap::from([("M. ALVAREZ".to_string(), alvarez)]);
        let date = ymd(3, 9);
        let blocks = vec![
            RawBlock {
                line: 1,
                date,
                rows: vec![row("M. ALVAREZ", 25, None)],
            },
            RawBlock {
                line: 4,
                date,
                rows: vec![row("M. ALVAREZ", 99, None)],
            },
        ];

        let records = assemble(&blocks, &resolved, &goals());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tickets_actual, 25);
    }

    #[test]
    fn reports_every_unresolved_alias() {
        let blocks = vec![RawBlock {
            line: 1,
            date: ymd(1, 1),
            rows: vec![
                row("Z. NUNEZ", 1, None),
                row("M. ALVAREZ", 2, None),
                row("B. ORTIZ", 3, None),
            ],
        }];
        let aliases = collect_aliases(&blocks);
        let resolved = HashMap::from([("M. ALVAREZ".to_string(), Uuid::new_v4())]);

        let err = check_aliases("WIEDER", &aliases, &resolved).unwrap_err();
        assert_eq!(
            err,
            IngestError::UnresolvedAgents {
                team: "WIEDER".to_string(),
                aliases: vec!["B. ORTIZ".to_string(), "Z. NUNEZ".to_string()],
            }
        );
        assert!(err.to_string().contains("B. ORTIZ, Z. NUNEZ"));
    }

    #[test]
    fn resolved_aliases_pass_the_check() {
        let blocks = vec![RawBlock {
            line: 1,
            date: ymd(1, 1),
            rows: vec![row("M. ALVAREZ", 2, None)],
        }];
        let aliases = collect_aliases(&blocks);
        let resolved = HashMap::from([("M. ALVAREZ".to_string(), Uuid::new_v4())]);
        assert!(check_aliases("WIEDER", &aliases, &resolved).is_ok());
    }

    #[test]
    fn rejects_negative_or_non_finite_goal_overrides() {
        let defaults = Goals::default();
        assert_eq!(
            GoalSettings::new(defaults, Some(-7), None).unwrap_err(),
            IngestError::InvalidGoal {
                field: "tickets",
                value: "-7".to_string(),
            }
        );
        assert!(GoalSettings::new(defaults, None, Some(f64::NAN)).is_err());
        assert!(GoalSettings::new(defaults, None, Some(f64::INFINITY)).is_err());
        assert!(GoalSettings::new(defaults, None, Some(-0.5)).is_err());

        let settings = GoalSettings::new(defaults, Some(0), Some(9.0)).unwrap();
        assert_eq!(settings.tickets_override, Some(0));
        assert_eq!(settings.points_override, Some(9.0));
    }

    #[test]
    fn alias_candidates_include_word_prefixes() {
        let aliases = BTreeSet::from(["M. ALVAREZ ABC".to_string(), "J. ROMERO".to_string()]);
        let candidates = alias_candidates(&aliases);
        assert!(candidates.contains("M. ALVAREZ"));
        assert!(candidates.contains("M. ALVAREZ ABC"));
        assert!(candidates.contains("J."));
        assert_eq!(candidates.len(), 5);
    }

    #[test]
    fn text_after_a_known_alias_is_a_format_error() {
        let options = ParseOptions::new(None, Some(2024));
        let raw = "WIEDER 1 ene.\nT. P M. A D.M\nJ. ROMERO 20 30 10\nM. ALVAREZ abc 30 1 0";
        let blocks = parser::parse_raw_text(raw, &options).unwrap();
        let resolved = HashMap::from([
            ("M. ALVAREZ".to_string(), Uuid::new_v4()),
            ("J. ROMERO".to_string(), Uuid::new_v4()),
        ]);

        let err = check_misread_cells(&blocks, &resolved).unwrap_err();
        match err {
            IngestError::Format { line, content, reason } => {
                assert_eq!(line, 4);
                assert_eq!(content, "M. ALVAREZ abc 30 1 0");
                assert!(reason.contains("\"ABC\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_aliases_are_left_to_the_alias_check() {
        let blocks = vec![RawBlock {
            line: 1,
            date: ymd(1, 1),
            rows: vec![row("Z. NUNEZ", 1, None), row("M. ALVAREZ", 2, None)],
        }];
        let resolved = HashMap::from([("M. ALVAREZ".to_string(), Uuid::new_v4())]);
        assert!(check_misread_cells(&blocks, &resolved).is_ok());
    }

    #[test]
    fn override_date_stamps_every_record() {
        let date = ymd(6, 1);
        let options = ParseOptions::new(Some(date), Some(2024));
        let raw = "WIEDER 1 ene. 2 ene.\nT. P M. A D.M T. P M. A D.M\n\
                   M. ALVAREZ 25 30 5 32 30 2\nJ. ROMERO 20 30 10 28 30 2";
        let blocks = parser::parse_raw_text(raw, &options).unwrap();
        let resolved = HashMap::from([
            ("M. ALVAREZ".to_string(), Uuid::new_v4()),
            ("J. ROMERO".to_string(), Uuid::new_v4()),
        ]);

        let records = assemble(&blocks, &resolved, &goals());
        assert!(records.iter().all(|record| record.date == date));
        // Both days collapse onto the override date; the first day's values win.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tickets_actual, 25);
    }
}
