//! Text renderings of query results.

use crate::models::QueryResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// How `run_query` returns its rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured rows (default)
    #[default]
    Json,
    /// ASCII table, sqlite3 `.mode box` style
    Table,
    /// Markdown table
    Markdown,
}

fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cells of `result` in column order, already rendered as text.
fn cells(result: &QueryResult) -> Vec<Vec<(String, bool)>> {
    result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .map(|col| {
                    let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
                    (format_value(value), value.is_number())
                })
                .collect()
        })
        .collect()
}

/// Pad `text` to `width` display columns.
fn pad(text: &str, width: usize, right_align: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(text.width()));
    if right_align {
        format!("{}{}", fill, text)
    } else {
        format!("{}{}", text, fill)
    }
}

fn footer(result: &QueryResult) -> String {
    let noun = if result.row_count == 1 { "row" } else { "rows" };
    let truncated = if result.truncated { " (truncated)" } else { "" };
    format!(
        "{} {}{} ({:.3} sec)",
        result.row_count,
        noun,
        truncated,
        result.execution_time_ms as f64 / 1000.0
    )
}

/// Render as a boxed ASCII table. Numbers are right aligned.
pub fn format_as_table(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return "Empty set".to_string();
    }

    let cells = cells(result);
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.name.width()).collect();
    for row in &cells {
        for (i, (text, _)) in row.iter().enumerate() {
            widths[i] = widths[i].max(text.width());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = separator.clone();
    for (col, w) in result.columns.iter().zip(&widths) {
        output.push_str(&format!("| {} ", pad(&col.name, *w, false)));
    }
    output.push_str("|\n");
    output.push_str(&separator);

    for row in &cells {
        for ((text, numeric), w) in row.iter().zip(&widths) {
            output.push_str(&format!("| {} ", pad(text, *w, *numeric)));
        }
        output.push_str("|\n");
    }
    output.push_str(&separator);
    output.push_str(&footer(result));
    output.push('\n');
    output
}

/// Render as a Markdown table. Pipes inside values are escaped.
pub fn format_as_markdown(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let escape = |s: &str| s.replace('|', "\\|");
    let mut output = String::new();

    for col in &result.columns {
        output.push_str(&format!("| {} ", escape(&col.name)));
    }
    output.push_str("|\n");
    output.push_str(&"|---".repeat(result.columns.len()));
    output.push_str("|\n");

    for row in cells(result) {
        for (text, _) in row {
            output.push_str(&format!("| {} ", escape(&text)));
        }
        output.push_str("|\n");
    }

    output.push_str(&format!("\n*{}*", footer(result)));
    output
}
