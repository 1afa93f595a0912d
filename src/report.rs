use std::fmt::Write;

use chrono::{Duration, NaiveDate, Utc};

use crate::models::{AgentSummary, MetricRow};

pub fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

pub fn summarize_by_agent(metrics: &[MetricRow]) -> Vec<AgentSummary> {
    let mut map: std::collections::HashMap<uuid::Uuid, AgentSummary> =
        std::collections::HashMap::new();

    for metric in metrics {
        let entry = map.entry(metric.agent_id).or_insert_with(|| AgentSummary {
            agent_name: metric.agent_name.clone(),
            excel_alias: metric.excel_alias.clone(),
            days: 0,
            tickets_actual: 0,
            tickets_goal: 0,
            points_actual: 0.0,
            burnout_days: 0,
        });
        entry.days += 1;
        entry.tickets_actual += i64::from(metric.tickets_actual);
        entry.tickets_goal += i64::from(metric.tickets_goal);
        entry.points_actual += metric.points_actual;
        if metric.is_burnout {
            entry.burnout_days += 1;
        }
    }

    let mut summaries: Vec<AgentSummary> = map.into_values().collect();
    summaries.sort_by(|a, b| {
        b.attainment()
            .unwrap_or(0.0)
            .partial_cmp(&a.attainment().unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.agent_name.cmp(&b.agent_name))
    });
    summaries
}

pub fn build_report(
    team: Option<&str>,
    since_days: i64,
    cutoff: NaiveDate,
    metrics: &[MetricRow],
) -> String {
    let summaries = summarize_by_agent(metrics);

    let mut output = String::new();
    let team_label = team.unwrap_or("all teams");

    let _ = writeln!(output, "# Support Performance Report");
    let _ = writeln!(
        output,
        "Generated for {} (last {} days, since {})",
        team_label, since_days, cutoff
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Goal Attainment");

    if summaries.is_empty() {
        let _ = writeln!(output, "No performance recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let attainment = summary
                .attainment()
                .map(|ratio| format!("{:.0}%", ratio * 100.0))
                .unwrap_or_else(|| "no goal".to_string());
            let _ = writeln!(
                output,
                "- {} ({}): {} / {} tickets ({}) over {} days, {:.1} points",
                summary.agent_name,
                summary.excel_alias,
                summary.tickets_actual,
                summary.tickets_goal,
                attainment,
                summary.days,
                summary.points_actual
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Burnout Watch");

    let mut flagged: Vec<&AgentSummary> = summaries
        .iter()
        .filter(|summary| summary.burnout_days > 0)
        .collect();
    flagged.sort_by(|a, b| b.burnout_days.cmp(&a.burnout_days));

    if flagged.is_empty() {
        let _ = writeln!(output, "No burnout days in this window.");
    } else {
        for summary in flagged {
            let _ = writeln!(
                output,
                "- {}: {} of {} days above the points goal",
                summary.agent_name, summary.burnout_days, summary.days
            );
        }
    }

    let mut recent = metrics.to_vec();
    recent.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.agent_name.cmp(&b.agent_name)));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Days");

    if recent.is_empty() {
        let _ = writeln!(output, "No performance recorded for this window.");
    } else {
        for metric in recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} on {}: {}/{} tickets, {:.1}/{:.1} points{}",
                metric.agent_name,
                metric.date,
                metric.tickets_actual,
                metric.tickets_goal,
                metric.points_actual,
                metric.points_goal,
                if metric.is_burnout { " (burnout)" } else { "" }
            );
        }
    }

    output
}

pub fn write_metrics_csv<W: std::io::Write>(
    writer: W,
    metrics: &[MetricRow],
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for metric in metrics {
        writer.serialize(metric)?;
    }
    writer.flush()?;
    Ok(())
}
