//! Output formatters for test results
//!
//! Provides Table, JSON, CSV and summary output for run reports.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use tracing::warn;

use crate::models::{NormalizedResult, RunReport, TestOutcome};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// One flat CSV record per result
#[derive(Serialize)]
struct CsvRow<'a> {
    test: &'a str,
    name: &'a str,
    assembly: &'a str,
    outcome: TestOutcome,
    duration_ms: u64,
    message: &'a str,
}

impl<'a> From<&'a NormalizedResult> for CsvRow<'a> {
    fn from(result: &'a NormalizedResult) -> Self {
        Self {
            test: &result.test.unique_name,
            name: &result.test.fully_qualified_name,
            assembly: result.test.source.as_str(),
            outcome: result.outcome,
            duration_ms: result.duration_ms,
            message: result.error_message.as_deref().unwrap_or(""),
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn outcome_label(&self, outcome: TestOutcome) -> String {
        let label = format!("{} {}", outcome.symbol(), outcome);
        if !self.colorize {
            return label;
        }
        let color = match outcome {
            TestOutcome::Passed => "32",
            TestOutcome::Failed => "31",
            TestOutcome::Skipped | TestOutcome::Inconclusive => "33",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_table(&self, result: &NormalizedResult) -> String {
        format!(
            "{} {:50} [{:>6}ms]",
            self.outcome_label(result.outcome),
            result.test.fully_qualified_name,
            result.duration_ms
        )
    }

    fn format_csv(&self, results: &[NormalizedResult]) -> String {
        let rows = || -> Result<String> {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for result in results {
                writer.serialize(CsvRow::from(result))?;
            }
            let data = writer.into_inner().map_err(|e| e.into_error())?;
            Ok(String::from_utf8(data)?)
        };

        rows().unwrap_or_else(|e| {
            warn!("Failed to write CSV output: {}", e);
            String::new()
        })
    }

    /// Format a full run report
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => self.format_csv(&report.results),
            OutputFormat::Summary => self.format_report_brief(report),
        }
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Test Run {:51}║\n",
            report.started_at.format("%Y-%m-%d %H:%M:%S")
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for result in &report.results {
            output.push_str(&format!("  {}\n", self.format_result_table(result)));
            if result.outcome == TestOutcome::Failed {
                if let Some(message) = &result.error_message {
                    output.push_str(&format!("      {message}\n"));
                }
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", report.passed)
        } else {
            report.passed.to_string()
        };
        let fail_str = if self.colorize && report.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", report.failed)
        } else {
            report.failed.to_string()
        };

        output.push_str(&format!(
            "  Total: {} | Pass: {} | Fail: {} | Skip: {} | Inconclusive: {}\n",
            report.total, pass_str, fail_str, report.skipped, report.inconclusive
        ));
        output.push_str(&format!(
            "  Pass Rate: {:5.1}% | Duration: {}ms\n",
            report.pass_rate(),
            report.total_duration_ms
        ));

        if !report.errors.is_empty() {
            output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            output.push_str(&format!("  Errors ({}):\n", report.errors.len()));
            for error in &report.errors {
                output.push_str(&format!("   - {error}\n"));
            }
        }
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_report_brief(&self, report: &RunReport) -> String {
        format!(
            "{}/{} passed ({:.1}%), {} failed, {} skipped, {} inconclusive in {}ms",
            report.passed,
            report.total,
            report.pass_rate(),
            report.failed,
            report.skipped,
            report.inconclusive,
            report.total_duration_ms
        )
    }
}

/// Write a report to a file, without terminal colors
pub fn write_report_to_file(path: &str, report: &RunReport, format: OutputFormat) -> Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file =
        std::fs::File::create(path).with_context(|| format!("Failed to create {path}"))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawTestResult, ResultState, TestDescriptor};
    use chrono::Utc;

    fn report() -> RunReport {
        let pass = NormalizedResult::from_raw(
            TestDescriptor::new("T1", "Suite.Adds", "Math.Tests.dll"),
            &RawTestResult::new("T1", ResultState::Success).with_duration(12),
        );
        let fail = NormalizedResult::from_raw(
            TestDescriptor::new("T2", "Suite.Divides", "Math.Tests.dll"),
            &RawTestResult::new("T2", ResultState::Failure)
                .with_duration(3)
                .with_message("expected 2, \"got\" 3"),
        );
        RunReport::new(Utc::now(), vec![pass, fail], vec!["SetUp failed".to_string()])
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_table_lists_failures_and_errors() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_report(&report());
        assert!(output.contains("✓ PASS Suite.Adds"));
        assert!(output.contains("expected 2"));
        assert!(output.contains("Total: 2 | Pass: 1 | Fail: 1"));
        assert!(output.contains("SetUp failed"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_csv_escapes_messages() {
        let output = ResultFormatter::new(OutputFormat::Csv).format_report(&report());
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "test,name,assembly,outcome,duration_ms,message");
        assert_eq!(lines[1], "T1,Suite.Adds,Math.Tests.dll,passed,12,");
        assert_eq!(
            lines[2],
            r#"T2,Suite.Divides,Math.Tests.dll,failed,3,"expected 2, ""got"" 3""#
        );
    }

    #[test]
    fn test_json_report() {
        let output = ResultFormatter::new(OutputFormat::Json).format_report(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["passed"], 1);
        assert_eq!(value["results"][1]["outcome"], "failed");
    }

    #[test]
    fn test_summary_line() {
        let output = ResultFormatter::new(OutputFormat::Summary).format_report(&report());
        assert!(output.starts_with("1/2 passed (50.0%)"));
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        write_report_to_file(path.to_str().unwrap(), &report(), OutputFormat::Csv).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("Suite.Divides"));
    }
}
