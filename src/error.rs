use thiserror::Error;

/// Reasons a pasted blob is rejected. Every variant aborts the upload before any write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("line {line}: {reason}: {content:?}")]
    Format {
        line: usize,
        content: String,
        reason: String,
    },

    #[error("line {line}: data found before any day header: {content:?}")]
    MissingHeader { line: usize, content: String },

    #[error("line {line}: {token:?} is not a valid calendar date")]
    InvalidDate { line: usize, token: String },

    #[error("{field} goal override {value} must be a finite, non-negative number")]
    InvalidGoal { field: &'static str, value: String },

    #[error("no performance rows could be parsed from the pasted text")]
    NoData,

    #[error(
        "agents not found in team {team}: {}. Create these agents first",
        aliases.join(", ")
    )]
    UnresolvedAgents { team: String, aliases: Vec<String> },
}

impl IngestError {
    pub fn format(line: usize, content: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            line,
            content: content.to_string(),
            reason: reason.into(),
        }
    }
}
