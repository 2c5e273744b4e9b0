//! Business insights derived from query results and table schemas.
//!
//! The analysis is heuristic and keyed on the SQL text: single-row counts,
//! aggregate columns, and the top and bottom groups of a `GROUP BY`.
//! Formatted insights are stored as notes of the insight category.

use mcp_resilience_core::{Note, Transport};
use serde_json::Value;

use crate::{
    client::{AppendOptions, ResilientClient},
    error::ClientError,
    sqlite::Row,
};

const AGGREGATES: [&str; 4] = ["AVG", "SUM", "MIN", "MAX"];

/// Derive insights from the rows a query returned.
///
/// Never empty: an empty result yields a single "no data" line.
#[must_use]
pub fn analyze_query_results(query: &str, rows: &[Row]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["No data available for analysis.".to_string()];
    }

    let mut insights = vec![format!("Query returned {} rows of data.", rows.len())];
    let upper = query.to_uppercase();

    if upper.contains("COUNT") && rows.len() == 1 {
        insights.extend(
            rows[0]
                .iter()
                .filter(|(key, _)| key.to_uppercase().contains("COUNT"))
                .map(|(_, value)| format!("Total count: {}", display(value))),
        );
    } else if AGGREGATES.iter().any(|agg| upper.contains(agg)) {
        for row in rows {
            insights.extend(
                row.iter()
                    .filter(|(key, _)| {
                        let key = key.to_uppercase();
                        AGGREGATES.iter().any(|agg| key.contains(agg))
                    })
                    .map(|(key, value)| format!("{key}: {}", display(value))),
            );
        }
    } else if let Some((_, grouping)) = upper.split_once("GROUP BY") {
        if rows.len() > 1 {
            insights.extend(group_extremes(grouping, rows));
        }
    }
    insights
}

/// Top and bottom group by the first measure column.
fn group_extremes(grouping: &str, rows: &[Row]) -> Vec<String> {
    let Some((group, measure)) = split_columns(grouping, &rows[0]) else {
        return Vec::new();
    };

    let score = |row: &Row| row.get(measure).and_then(numeric);
    let mut top = &rows[0];
    let mut bottom = &rows[0];
    for row in &rows[1..] {
        if score(row).unwrap_or(0.0) > score(top).unwrap_or(0.0) {
            top = row;
        }
        if score(row).unwrap_or(f64::INFINITY) < score(bottom).unwrap_or(f64::INFINITY) {
            bottom = row;
        }
    }

    [("Top", top), ("Bottom", bottom)]
        .into_iter()
        .map(|(label, row)| {
            format!(
                "{label} {group}: {} with {measure} of {}",
                row.get(group).map_or_else(String::new, display),
                row.get(measure).map_or_else(String::new, display),
            )
        })
        .collect()
}

/// The grouped column and the first other column of a row.
fn split_columns<'a>(grouping: &str, row: &'a Row) -> Option<(&'a str, &'a str)> {
    let mut group = None;
    let mut measure = None;
    for key in row.keys() {
        if group.is_none() && grouping.contains(&key.to_uppercase()) {
            group = Some(key.as_str());
        } else if measure.is_none() {
            measure = Some(key.as_str());
        }
    }
    group.zip(measure)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format insights as a memo entry. Empty when there are no insights.
#[must_use]
pub fn format_insights_for_memo(insights: &[String], query: &str, context: Option<&str>) -> String {
    if insights.is_empty() {
        return String::new();
    }

    let heading = match context {
        Some(context) if !context.is_empty() => format!("## Business Insight: {context}"),
        _ => "## Business Insight".to_string(),
    };
    let bullets: Vec<String> = insights.iter().map(|i| format!("- {i}")).collect();
    format!("{heading}\n\n```sql\n{query}\n```\n\n{}\n", bullets.join("\n"))
}

/// Describe a table's columns as a memo entry.
///
/// Columns are grouped by declared type, in order of first appearance, and
/// likely key and date/time columns are called out.
#[must_use]
pub fn insight_from_schema(table: &str, columns: &[Row]) -> String {
    let field = |column: &Row, name: &str| {
        column
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut by_type: Vec<(String, Vec<String>)> = Vec::new();
    for column in columns {
        let kind = field(column, "type").to_uppercase();
        let name = field(column, "name");
        match by_type.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, names)) => names.push(name),
            None => by_type.push((kind, vec![name])),
        }
    }

    let mut insights = vec![format!("Table '{table}' has {} columns:", columns.len())];
    insights.extend(
        by_type
            .iter()
            .map(|(kind, names)| format!("- {} {kind} columns: {}", names.len(), names.join(", "))),
    );

    let lowered: Vec<(String, String)> = columns
        .iter()
        .map(|c| (field(c, "name").to_lowercase(), field(c, "type").to_uppercase()))
        .collect();
    let keys: Vec<&str> = lowered
        .iter()
        .filter(|(name, _)| name.contains("id") || name.contains("key"))
        .map(|(name, _)| name.as_str())
        .collect();
    if !keys.is_empty() {
        insights.push(format!("- Potential key columns: {}", keys.join(", ")));
    }
    let dates: Vec<&str> = lowered
        .iter()
        .filter(|(name, kind)| {
            name.contains("date")
                || name.contains("time")
                || kind.contains("DATE")
                || kind.contains("TIME")
        })
        .map(|(name, _)| name.as_str())
        .collect();
    if !dates.is_empty() {
        insights.push(format!("- Date/time columns: {}", dates.join(", ")));
    }

    format_insights_for_memo(
        &insights,
        &format!("DESCRIBE {table}"),
        Some(&format!("Schema Analysis for {table}")),
    )
}

impl<T: Transport + 'static> ResilientClient<T> {
    /// Analyze query results and store them as one insight note.
    pub async fn record_query_insights(
        &self,
        query: &str,
        rows: &[Row],
        context: Option<&str>,
        options: AppendOptions,
    ) -> Note {
        let insights = analyze_query_results(query, rows);
        let text = format_insights_for_memo(&insights, query, context);
        self.append_note(&text, self.insight_category(), options).await
    }

    /// Describe a table and store its schema analysis as an insight note.
    ///
    /// # Errors
    /// Returns the [`ClientError`] of the `describe_table` call.
    pub async fn record_schema_insight(
        &self,
        table: &str,
        options: AppendOptions,
    ) -> Result<Note, ClientError> {
        let columns = self.describe_table(table).await?;
        let text = insight_from_schema(table, &columns);
        Ok(self.append_note(&text, self.insight_category(), options).await)
    }
}
