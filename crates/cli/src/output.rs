//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nomad_e2e::{TestResult, TestSuiteResult};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
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

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No scenarios found.");
                return;
            }
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

impl TableDisplay for TestResult {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Status", "Steps", "Reset", "Duration", "Failed At"]
    }

    fn row(&self) -> Vec<String> {
        let ran = self.steps.len();
        vec![
            self.name.clone(),
            if self.success { "✓ pass" } else { "✗ fail" }.to_string(),
            format!("{}/{}", ran, ran + self.skipped_steps),
            self.reset_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".to_string()),
            format!("{}ms", self.duration_ms),
            self.failed_step.clone().unwrap_or_default(),
        ]
    }
}

/// Print per-scenario results and the suite summary
pub fn print_suite(suite: &TestSuiteResult, format: OutputFormat) {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(suite).unwrap_or_default());
        return;
    }

    print_list(&suite.results, format);
    for result in suite.results.iter().filter(|r| !r.success) {
        if let Some(error) = &result.error {
            println!("{} {}: {}", "✗".red(), result.name.bold(), error);
        }
    }

    let summary = format!(
        "{} passed, {} failed ({} ms)",
        suite.passed, suite.failed, suite.duration_ms
    );
    if suite.success() {
        println!("{} {}", "✓".green(), summary.green());
    } else {
        println!("{} {}", "✗".red(), summary.red());
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
    println!("{} {}", "!".yellow(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_row_counts_skipped_steps() {
        let result = TestResult {
            name: "add-and-delete-card".into(),
            success: false,
            duration_ms: 1200,
            reset_ms: None,
            steps: Vec::new(),
            skipped_steps: 16,
            failed_step: Some("reset".into()),
            error: Some("Reset refused".into()),
        };
        let row = result.row();
        assert_eq!(row.len(), TestResult::headers().len());
        assert_eq!(row[1], "✗ fail");
        assert_eq!(row[2], "0/16");
        assert_eq!(row[3], "-");
        assert_eq!(row[5], "reset");
    }
}
