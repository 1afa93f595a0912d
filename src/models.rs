use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Points above `goal + BURNOUT_MARGIN` mark a burnout day.
pub const BURNOUT_MARGIN: f64 = 0.5;

pub fn is_burnout(points_actual: f64, points_goal: f64) -> bool {
    points_actual > points_goal + BURNOUT_MARGIN
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: Uuid,
    pub team_id: Uuid,
    pub full_name: String,
    pub excel_alias: String,
    pub is_active: bool,
}

/// Partial update for an agent; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub team_id: Option<Uuid>,
    pub full_name: Option<String>,
    pub excel_alias: Option<String>,
    pub is_active: Option<bool>,
}

/// Fallback goals applied when neither the caller nor the pasted row carries one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Goals {
    pub tickets: i32,
    pub points: f64,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            tickets: 0,
            points: 8.0,
        }
    }
}

/// One agent's measures for one day, ready for `bulk_upsert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub agent_id: Uuid,
    pub date: NaiveDate,
    pub tickets_actual: i32,
    pub tickets_goal: i32,
    pub points_actual: f64,
    pub points_goal: f64,
}

impl PerformanceRecord {
    pub fn is_burnout(&self) -> bool {
        is_burnout(self.points_actual, self.points_goal)
    }

    /// Rejects negative counts and point values that are negative, NaN or infinite.
    /// Postgres sorts NaN above every number, so the table CHECKs alone let it through.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tickets_actual < 0 || self.tickets_goal < 0 {
            bail!("ticket counts must not be negative");
        }
        for (name, value) in [
            ("points_actual", self.points_actual),
            ("points_goal", self.points_goal),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a finite, non-negative number, got {value}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredPerformance {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub date: NaiveDate,
    pub tickets_actual: i32,
    pub tickets_goal: i32,
    pub points_actual: f64,
    pub points_goal: f64,
    pub updated_at: DateTime<Utc>,
}

/// Performance joined with its agent and team, as read back for metrics and reports.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRow {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub agent_name: String,
    pub excel_alias: String,
    pub team_name: String,
    pub date: NaiveDate,
    pub tickets_actual: i32,
    pub tickets_goal: i32,
    pub points_actual: f64,
    pub points_goal: f64,
    pub is_burnout: bool,
}

#[derive(Debug, Clone)]
pub struct AgentSummary {
    pub agent_name: String,
    pub excel_alias: String,
    pub days: usize,
    pub tickets_actual: i64,
    pub tickets_goal: i64,
    pub points_actual: f64,
    pub burnout_days: usize,
}

impl AgentSummary {
    /// Share of the ticket goal reached across the window, `None` without a goal.
    pub fn attainment(&self) -> Option<f64> {
        if self.tickets_goal <= 0 {
            None
        } else {
            Some(self.tickets_actual as f64 / self.tickets_goal as f64)
        }
    }
}
