use anyhow::{bail, Context};

use crate::models::Goals;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub default_goals: Goals,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set to a Postgres instance")?;

        let max_connections = match lookup("TRACKER_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|count| *count > 0)
                .with_context(|| format!("TRACKER_MAX_CONNECTIONS must be > 0, got {value:?}"))?,
            None => 5,
        };

        let defaults = Goals::default();
        let tickets = match lookup("TRACKER_TICKETS_GOAL") {
            Some(value) => value
                .trim()
                .parse::<i32>()
                .with_context(|| format!("TRACKER_TICKETS_GOAL is not a whole number: {value:?}"))?,
            None => defaults.tickets,
        };
        let points = match lookup("TRACKER_POINTS_GOAL") {
            Some(value) => value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("TRACKER_POINTS_GOAL is not a number: {value:?}"))?,
            None => defaults.points,
        };
        if tickets < 0 || !points.is_finite() || points < 0.0 {
            bail!("default goals must be non-negative");
        }

        Ok(Self {
            database_url,
            max_connections,
            default_goals: Goals { tickets, points },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/tracker")]).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.default_goals, Goals::default());
    }

    #[test]
    fn reads_goal_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/tracker"),
            ("TRACKER_TICKETS_GOAL", "40"),
            ("TRACKER_POINTS_GOAL", " 9.5 "),
        ])
        .unwrap();
        assert_eq!(config.default_goals.tickets, 40);
        assert_eq!(config.default_goals.points, 9.5);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("DATABASE_URL", " ")]).is_err());
    }

    #[test]
    fn rejects_invalid_numbers() {
        let url = ("DATABASE_URL", "postgres://localhost/tracker");
        assert!(config_from(&[url, ("TRACKER_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config_from(&[url, ("TRACKER_TICKETS_GOAL", "-3")]).is_err());
        assert!(config_from(&[url, ("TRACKER_POINTS_GOAL", "lots")]).is_err());
    }
}
