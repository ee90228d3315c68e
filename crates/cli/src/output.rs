//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render a single item
pub fn render_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            table.add_row(item.row());
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(item).unwrap_or_default(),
        OutputFormat::Plain => T::headers()
            .iter()
            .zip(item.row())
            .map(|(header, value)| format!("{}: {}", header, value))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render a list of items
pub fn render_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> String {
    if items.is_empty() && format != OutputFormat::Json {
        return "No items found.".to_string();
    }

    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_default(),
        OutputFormat::Plain => items
            .iter()
            .map(|item| render_item(item, OutputFormat::Plain))
            .collect::<Vec<_>>()
            .join("\n---\n"),
    }
}

pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    println!("{}", render_item(item, format));
}

pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    println!("{}", render_list(items, format));
}

/// Print a simple message
pub fn print_message(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "message": message })),
        _ => println!("{}", message),
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".cyan(), message);
}

/// Section banner used by longer reports
pub fn print_banner(title: &str) {
    let rule = "═".repeat(60);
    println!("{}", rule.cyan());
    println!("  {}", title.cyan());
    println!("{}", rule.cyan());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: &'static str,
        value: u32,
    }

    impl TableDisplay for Row {
        fn headers() -> Vec<&'static str> {
            vec!["NAME", "VALUE"]
        }

        fn row(&self) -> Vec<String> {
            vec![self.name.to_string(), self.value.to_string()]
        }
    }

    #[test]
    fn test_plain_output() {
        let rendered = render_item(&Row { name: "poll", value: 5 }, OutputFormat::Plain);
        assert_eq!(rendered, "NAME: poll\nVALUE: 5");

        let rendered = render_list(
            &[Row { name: "a", value: 1 }, Row { name: "b", value: 2 }],
            OutputFormat::Plain,
        );
        assert_eq!(rendered, "NAME: a\nVALUE: 1\n---\nNAME: b\nVALUE: 2");
    }

    #[test]
    fn test_json_output() {
        let rendered = render_list(&[Row { name: "a", value: 1 }], OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, serde_json::json!([{"name": "a", "value": 1}]));

        let empty: Vec<Row> = Vec::new();
        assert_eq!(render_list(&empty, OutputFormat::Json), "[]");
        assert_eq!(render_list(&empty, OutputFormat::Table), "No items found.");
    }

    #[test]
    fn test_table_output_contains_cells() {
        let rendered = render_item(&Row { name: "backoff", value: 10 }, OutputFormat::Table);
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("backoff"));
    }
}
