//! Turns text pasted from the daily spreadsheet into per-day blocks of raw rows.
//!
//! The paste looks like:
//!
//! ```text
//! WIEDER 1 ene. 2 ene.
//! T. P M. A D.M T. P M. A D.M
//! M. ALVAREZ 0 0 0 401 400 1
//! J. ROMERO 0 0 0 200 200 0
//! ```
//!
//! A line carrying date tokens opens a section with one block per date. A line made
//! only of column labels sets the column layout and is otherwise skipped. Every
//! other line is a data row with one group of columns per date of the section.

use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;

use crate::error::IngestError;

static DATE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+([a-z]{3})[a-z]*\.?(?:\s+(\d{4})\b)?")
        .expect("static regex must compile")
});
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:[.,]\d+)?$").expect("static regex must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    TicketsActual,
    TicketsGoal,
    Difference,
    PointsActual,
    PointsGoal,
}

impl Column {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "T.P" => Some(Self::TicketsActual),
            "M.A" => Some(Self::TicketsGoal),
            "D.M" => Some(Self::Difference),
            "PTS" => Some(Self::PointsActual),
            "M.P" => Some(Self::PointsGoal),
            _ => None,
        }
    }
}

/// Columns of one day's group, in paste order.
const DEFAULT_LAYOUT: &[Column] = &[Column::TicketsActual, Column::PointsActual];

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub override_date: Option<NaiveDate>,
    pub base_year: i32,
}

impl ParseOptions {
    pub fn new(override_date: Option<NaiveDate>, base_year: Option<i32>) -> Self {
        Self {
            override_date,
            base_year: base_year.unwrap_or_else(|| Local::now().year()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: usize,
    /// The trimmed source line, kept for error messages.
    pub content: String,
    pub alias: String,
    pub tickets_actual: i32,
    pub points_actual: f64,
    pub tickets_goal: Option<i32>,
    pub points_goal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Line of the day header that opened this block.
    pub line: usize,
    pub date: NaiveDate,
    pub rows: Vec<RawRow>,
}

/// Parses a pasted blob into day blocks. Fails on the first malformed line.
pub fn parse_raw_text(raw: &str, options: &ParseOptions) -> Result<Vec<RawBlock>, IngestError> {
    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut section: Vec<usize> = Vec::new();
    let mut layout: Vec<Column> = DEFAULT_LAYOUT.to_vec();
    let mut explicit_layout = false;

    for (index, text) in raw.lines().enumerate() {
        let line = index + 1;
        let content = text.trim();
        if content.is_empty() {
            continue;
        }

        if let Some(dates) = parse_day_header(line, content, options)? {
            tracing::debug!(line, days = dates.len(), "day header");
            section.clear();
            for date in dates {
                section.push(blocks.len());
                blocks.push(RawBlock {
                    line,
                    date,
                    rows: Vec::new(),
                });
            }
            continue;
        }

        if let Some(columns) = parse_column_header(line, content)? {
            tracing::debug!(line, ?columns, "column header");
            layout = columns;
            explicit_layout = true;
            continue;
        }

        if section.is_empty() {
            return Err(IngestError::MissingHeader {
                line,
                content: content.to_string(),
            });
        }

        let rows = parse_row(line, text, &layout, explicit_layout, section.len())?;
        for (block, row) in section.iter().zip(rows) {
            blocks[*block].rows.push(row);
        }
    }

    Ok(blocks)
}

/// Returns the dates of a day header, or `None` when the line is not one.
/// A day header carries at least one date token and no digits outside its date tokens,
/// so a data row with a trailing month word stays a data row.
fn parse_day_header(
    line: usize,
    content: &str,
    options: &ParseOptions,
) -> Result<Option<Vec<NaiveDate>>, IngestError> {
    let tokens: Vec<_> = DATE_TOKEN_RE
        .captures_iter(content)
        .filter_map(|caps| month_number(&caps[2]).map(|month| (caps, month)))
        .collect();
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut rest = String::with_capacity(content.len());
    let mut cursor = 0;
    for (caps, _) in &tokens {
        let span = caps.get(0).map_or(cursor..cursor, |m| m.range());
        rest.push_str(&content[cursor..span.start]);
        cursor = span.end;
    }
    rest.push_str(&content[cursor..]);
    if rest.chars().any(|c| c.is_ascii_digit()) {
        return Ok(None);
    }

    let mut dates = Vec::with_capacity(tokens.len());
    for (caps, month) in &tokens {
        let day: u32 = caps[1]
            .parse()
            .map_err(|_| IngestError::format(line, content, "invalid day number"))?;
        let year = match caps.get(3) {
            Some(year) => year
                .as_str()
                .parse()
                .map_err(|_| IngestError::format(line, content, "invalid year"))?,
            None => options.base_year,
        };

        match (NaiveDate::from_ymd_opt(year, *month, day), options.override_date) {
            (_, Some(date)) => dates.push(date),
            (Some(date), None) => dates.push(date),
            (None, None) => {
                return Err(IngestError::InvalidDate {
                    line,
                    token: caps[0].trim().to_string(),
                })
            }
        }
    }

    Ok(Some(dates))
}

fn month_number(abbrev: &str) -> Option<u32> {
    let month = match abbrev.to_lowercase().as_str() {
        "ene" | "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "abr" | "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" | "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dic" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Reads a line of column labels such as `T. P M. A D.M` into one day's layout.
/// Returns `None` when the line is not made of labels only.
fn parse_column_header(line: usize, content: &str) -> Result<Option<Vec<Column>>, IngestError> {
    if content.chars().any(|c| c.is_ascii_digit()) {
        return Ok(None);
    }

    let tokens: Vec<String> = content
        .split_whitespace()
        .map(|token| token.to_uppercase())
        .collect();
    let mut columns = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if let Some(column) = Column::from_label(&tokens[i]) {
            columns.push(column);
            i += 1;
            continue;
        }
        let joined = tokens
            .get(i + 1)
            .filter(|_| tokens[i].ends_with('.'))
            .and_then(|next| Column::from_label(&format!("{}{}", tokens[i], next)));
        match joined {
            Some(column) => {
                columns.push(column);
                i += 2;
            }
            None => return Ok(None),
        }
    }

    if columns.is_empty() {
        return Ok(None);
    }

    // A header repeats its group once per date; keep the first group.
    let group_len = columns[1..]
        .iter()
        .position(|column| *column == columns[0])
        .map_or(columns.len(), |pos| pos + 1);
    columns.truncate(group_len);

    if !columns.contains(&Column::TicketsActual) {
        return Err(IngestError::format(
            line,
            content,
            "column header has no tickets column",
        ));
    }
    Ok(Some(columns))
}

/// Splits a data line into the alias and its value cells.
///
/// Tab-separated pastes keep one cell per spreadsheet column: the alias is the first
/// cell and empty cells come back as `None`. Space-separated lines take every token up
/// to the first number as the alias.
fn split_cells(text: &str) -> (String, Vec<Option<&str>>) {
    if text.contains('\t') {
        let mut cells: Vec<Option<&str>> = text
            .split('\t')
            .map(str::trim)
            .map(|cell| (!cell.is_empty()).then_some(cell))
            .skip_while(Option::is_none)
            .collect();
        while matches!(cells.last(), Some(None)) {
            cells.pop();
        }
        let alias = match cells.first() {
            Some(Some(first)) if !is_number(first) => {
                let alias = normalize_alias(first);
                cells.remove(0);
                alias
            }
            _ => String::new(),
        };
        (alias, cells)
    } else {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let first_value = tokens
            .iter()
            .position(|token| is_number(token))
            .unwrap_or(tokens.len());
        let alias = normalize_alias(&tokens[..first_value].join(" "));
        let values = tokens[first_value..].iter().copied().map(Some).collect();
        (alias, values)
    }
}

fn is_number(cell: &str) -> bool {
    NUMBER_RE.is_match(cell)
}

/// Parses one data line into a row per day of the current section.
///
/// Under a column header, space-separated rows must fill every column of every day:
/// they cannot express empty cells, so a short row means a cell was misread.
fn parse_row(
    line: usize,
    text: &str,
    layout: &[Column],
    explicit_layout: bool,
    days: usize,
) -> Result<Vec<RawRow>, IngestError> {
    let content = text.trim();
    let tabbed = text.contains('\t');
    let (alias, values) = split_cells(text);

    if !values.iter().flatten().any(|cell| is_number(cell)) {
        return Err(IngestError::format(
            line,
            content,
            "expected an agent alias followed by numeric fields",
        ));
    }
    if alias.is_empty() {
        return Err(IngestError::format(line, content, "missing agent alias"));
    }
    if values.len() < 2 {
        return Err(IngestError::format(
            line,
            content,
            "expected at least two numeric fields",
        ));
    }

    let expected = layout.len() * days;
    if explicit_layout && !tabbed && values.len() < expected {
        return Err(IngestError::format(
            line,
            content,
            format!("expected {expected} values for the column header, found {}", values.len()),
        ));
    }

    let width = layout.len();
    let mut rows = Vec::with_capacity(days);

    for day in 0..days {
        let mut row = RawRow {
            line,
            content: content.to_string(),
            alias: alias.clone(),
            tickets_actual: 0,
            points_actual: 0.0,
            tickets_goal: None,
            points_goal: None,
        };
        let mut has_tickets = false;

        for (offset, column) in layout.iter().enumerate() {
            let Some(cell) = values.get(day * width + offset) else {
                continue;
            };
            if *column == Column::TicketsActual {
                has_tickets = true;
            }
            let Some(cell) = cell else {
                continue;
            };
            if !is_number(cell) {
                return Err(IngestError::format(
                    line,
                    content,
                    format!("non-numeric value {cell:?}"),
                ));
            }
            match column {
                Column::TicketsActual => row.tickets_actual = parse_count(line, content, cell)?,
                Column::TicketsGoal => row.tickets_goal = Some(parse_count(line, content, cell)?),
                Column::PointsActual => row.points_actual = parse_points(line, content, cell)?,
                Column::PointsGoal => row.points_goal = Some(parse_points(line, content, cell)?),
                Column::Difference => {}
            }
        }

        if !has_tickets {
            return Err(IngestError::format(
                line,
                content,
                format!("missing tickets value for day {} of {days}", day + 1),
            ));
        }
        rows.push(row);
    }

    Ok(rows)
}

fn normalize_alias(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn parse_count(line: usize, content: &str, cell: &str) -> Result<i32, IngestError> {
    cell.parse::<i32>()
        .ok()
        .filter(|value| *value >= 0)
        .ok_or_else(|| {
            IngestError::format(
                line,
                content,
                format!("{cell:?} is not a whole non-negative count"),
            )
        })
}

fn parse_points(line: usize, content: &str, cell: &str) -> Result<f64, IngestError> {
    cell.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| {
            IngestError::format(
                line,
                content,
                format!("{cell:?} is not a non-negative point value"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(year: i32) -> ParseOptions {
        ParseOptions::new(None, Some(year))
    }

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn parses_single_day_with_column_header() {
        let raw = "WIEDER 1 ene.\nT. P M. A D.M\nM. ALVAREZ 25 30 1";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].date, ymd(2024, 1, 1));
        assert_eq!(blocks[0].rows.len(), 1);
        let row = &blocks[0].rows[0];
        assert_eq!(row.alias, "M. ALVAREZ");
        assert_eq!(row.tickets_actual, 25);
        assert_eq!(row.tickets_goal, Some(30));
        assert_eq!(row.points_actual, 0.0);
        assert_eq!(row.line, 3);
    }

    #[test]
    fn splits_multi_day_columns_across_blocks() {
        let raw = "WIEDER 1 ene. 2 ene.\n\
                   T. P M. A D.M T. P M. A D.M\n\
                   M. ALVAREZ 25 30 -5 32 30 2\n\
                   J. ROMERO 20 30 -10 28 30 -2";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].date, ymd(2024, 1, 2));
        assert_eq!(blocks[0].rows[0].tickets_actual, 25);
        assert_eq!(blocks[1].rows[0].tickets_actual, 32);
        assert_eq!(blocks[1].rows[1].alias, "J. ROMERO");
        assert_eq!(blocks[1].rows[1].tickets_actual, 28);
    }

    #[test]
    fn later_day_headers_open_new_sections() {
        let raw = "WIEDER 1 ene.\nT. P M. A D.M\nM. ALVAREZ 25 30 1\n\
                   WIEDER 2 ene.\nM. ALVAREZ 31 30 -1\nJ. ROMERO 12 30 18";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].rows.len(), 1);
        assert_eq!(blocks[1].rows.len(), 2);
        // The layout from the first column header still applies.
        assert_eq!(blocks[1].rows[0].tickets_goal, Some(30));
    }

    #[test]
    fn skips_blank_lines_and_repeated_column_headers() {
        let raw = "\nWIEDER 1 ene.\n\n T. P M. A D.M \nT. P M. A D.M\n\nM. ALVAREZ 25 30 5\n";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks[0].rows.len(), 1);
        assert_eq!(blocks[0].rows[0].alias, "M. ALVAREZ");
        assert_eq!(blocks[0].rows[0].line, 7);
    }

    #[test]
    fn default_layout_reads_tickets_then_points() {
        let raw = "1 feb\nm.  alvarez 40 8,5\nJ. ROMERO 38 9.25 extra note";
        let blocks = parse_raw_text(raw, &options(2025)).unwrap();

        let rows = &blocks[0].rows;
        assert_eq!(rows[0].alias, "M. ALVAREZ");
        assert_eq!(rows[0].tickets_actual, 40);
        assert_eq!(rows[0].points_actual, 8.5);
        assert_eq!(rows[0].tickets_goal, None);
        assert_eq!(rows[1].points_actual, 9.25);
    }

    #[test]
    fn header_year_wins_over_base_year() {
        let raw = "WIEDER 15 dic. 2023 2 jan\nA. LOPEZ 1 2 3 4";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks[0].date, ymd(2023, 12, 15));
        assert_eq!(blocks[1].date, ymd(2024, 1, 2));
    }

    #[test]
    fn override_date_replaces_header_dates() {
        let override_date = ymd(2024, 3, 9);
        let raw = "WIEDER 31 feb.\nM. ALVAREZ 25 30";
        let blocks =
            parse_raw_text(raw, &ParseOptions::new(Some(override_date), Some(2024))).unwrap();

        assert_eq!(blocks[0].date, override_date);
    }

    #[test]
    fn invalid_header_date_without_override_fails() {
        let err = parse_raw_text("WIEDER 31 feb.\nM. ALVAREZ 25 30", &options(2024)).unwrap_err();
        assert!(matches!(err, IngestError::InvalidDate { line: 1, .. }));
    }

    #[test]
    fn data_before_header_fails() {
        let err = parse_raw_text("\nM. ALVAREZ 25 30\nWIEDER 1 ene.", &options(2024)).unwrap_err();
        assert_eq!(
            err,
            IngestError::MissingHeader {
                line: 2,
                content: "M. ALVAREZ 25 30".to_string()
            }
        );
    }

    #[test]
    fn non_numeric_ticket_field_fails_with_line() {
        let raw = "WIEDER 1 ene.\nM. ALVAREZ abc 30";
        let err = parse_raw_text(raw, &options(2024)).unwrap_err();
        match err {
            IngestError::Format { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, "M. ALVAREZ abc 30");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_numeric_value_inside_layout_fails() {
        let raw = "WIEDER 1 ene.\nT. P M. A D.M\nM. ALVAREZ 25 x 1";
        let err = parse_raw_text(raw, &options(2024)).unwrap_err();
        assert!(matches!(err, IngestError::Format { line: 3, .. }));
    }

    #[test]
    fn row_with_trailing_month_word_stays_a_data_row() {
        let raw = "WIEDER 1 ene.\nT. P M. A D.M\nM. ALVAREZ 25 30 1 mayo\nJ. ROMERO 20 30 10";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].date, ymd(2024, 1, 1));
        assert_eq!(blocks[0].rows.len(), 2);
        assert_eq!(blocks[0].rows[0].alias, "M. ALVAREZ");
        assert_eq!(blocks[0].rows[0].tickets_actual, 25);
        assert_eq!(blocks[0].rows[1].alias, "J. ROMERO");
    }

    #[test]
    fn non_numeric_ticket_under_column_header_fails() {
        let raw = "WIEDER 1 ene.\nT. P M. A D.M\nM. ALVAREZ abc 30 1";
        let err = parse_raw_text(raw, &options(2024)).unwrap_err();
        match err {
            IngestError::Format { line, content, .. } => {
                assert_eq!(line, 3);
                assert_eq!(content, "M. ALVAREZ abc 30 1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn tab_rows_take_the_alias_from_the_first_cell() {
        let raw = "WIEDER\t1 ene.\n\tT. P\tM. A\tD.M\nM. ALVAREZ\tabc\t30\t1";
        let err = parse_raw_text(raw, &options(2024)).unwrap_err();
        assert!(matches!(err, IngestError::Format { line: 3, .. }));
    }

    #[test]
    fn fractional_tickets_are_rejected() {
        let err = parse_raw_text("1 ene\nM. ALVAREZ 2.5 3", &options(2024)).unwrap_err();
        assert!(matches!(err, IngestError::Format { .. }));
    }

    #[test]
    fn missing_day_group_fails() {
        let raw = "WIEDER 1 ene. 2 ene.\nT. P M. A D.M T. P M. A D.M\nM. ALVAREZ 25 30 5";
        let err = parse_raw_text(raw, &options(2024)).unwrap_err();
        assert!(matches!(err, IngestError::Format { line: 3, .. }));
    }

    #[test]
    fn tab_separated_cells_keep_empty_columns() {
        let raw = "WIEDER\t1 ene.\t\t\t2 ene.\n\
                   \tT. P\tM. A\tD.M\tT. P\tM. A\tD.M\n\
                   M. ALVAREZ\t\t30\t\t40\t30\t10\t";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();

        assert_eq!(blocks[0].rows[0].tickets_actual, 0);
        assert_eq!(blocks[0].rows[0].tickets_goal, Some(30));
        assert_eq!(blocks[1].rows[0].tickets_actual, 40);
    }

    #[test]
    fn column_header_without_tickets_column_fails() {
        let err = parse_raw_text("1 ene\nM. A D.M\nX 1 2", &options(2024)).unwrap_err();
        assert!(matches!(err, IngestError::Format { line: 2, .. }));
    }

    #[test]
    fn record_count_matches_data_lines_times_days() {
        let raw = "WIEDER 1 ene. 2 ene. 3 ene.\n\
                   T. P M. A D.M T. P M. A D.M T. P M. A D.M\n\
                   A 1 2 1 3 4 1 5 6 1\n\
                   B 1 2 1 3 4 1 5 6 1";
        let blocks = parse_raw_text(raw, &options(2024)).unwrap();
        let total: usize = blocks.iter().map(|block| block.rows.len()).sum();
        assert_eq!(total, 2 * 3);
    }
}
