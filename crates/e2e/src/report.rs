//! Console report for a finished run

use std::io::{self, Write};

use clap::ValueEnum;
use colored::Colorize;

use crate::error::E2eResult;
use crate::runner::{Outcome, TestSuiteResult};

/// Every selected scenario passed
pub const EXIT_PASSED: i32 = 0;
/// At least one scenario failed
pub const EXIT_FAILED: i32 = 1;
/// The run could not complete (bad config, missing scenario files, server startup)
pub const EXIT_ERROR: i32 = 2;

/// Process exit code for the outcome of a run
pub fn exit_code(outcome: &E2eResult<TestSuiteResult>) -> i32 {
    match outcome {
        Ok(results) if results.success() => EXIT_PASSED,
        Ok(_) => EXIT_FAILED,
        Err(_) => EXIT_ERROR,
    }
}

/// Report format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum ReportFormat {
    /// One line per scenario, failures, summary
    #[default]
    Text,
    /// The full result document as JSON
    Json,
}

pub fn print_report(results: &TestSuiteResult, format: ReportFormat) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        ReportFormat::Text => write_text(&mut out, results),
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut out, results)?;
            writeln!(out)
        }
    }
}

/// Human-readable report: scenario lines, one entry per failure, summary count
pub fn write_text<W: Write>(out: &mut W, results: &TestSuiteResult) -> io::Result<()> {
    for result in &results.results {
        match result.outcome {
            Outcome::Passed => writeln!(
                out,
                "  {} {} {}",
                "✓".green(),
                result.full_name(),
                format!("({} ms)", result.duration_ms).dimmed()
            )?,
            Outcome::Failed => writeln!(out, "  {} {}", "✗".red(), result.full_name())?,
            Outcome::Skipped => writeln!(out, "  {} {}", "-".yellow(), result.full_name())?,
        }
    }

    let failures: Vec<_> = results
        .results
        .iter()
        .filter(|r| r.outcome == Outcome::Failed)
        .collect();

    if !failures.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "Failures:".red().bold())?;
        for (i, result) in failures.iter().enumerate() {
            writeln!(out)?;
            writeln!(out, "  {}) {}", i + 1, result.full_name())?;
            if let Some(failure) = &result.failure {
                writeln!(
                    out,
                    "     {} (after {:?})",
                    failure.kind.to_string().red(),
                    result.reached
                )?;
                for line in failure.message.lines() {
                    writeln!(out, "     {}", line)?;
                }
            }
        }
    }

    writeln!(out)?;
    let summary = format!(
        "{} passing, {} failing, {} skipped ({} ms)",
        results.passed, results.failed, results.skipped, results.duration_ms
    );
    if results.success() {
        writeln!(out, "{}", summary.green())
    } else {
        writeln!(out, "{}", summary.red())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runner::{Failure, ScenarioResult, ScenarioState};

    fn result(name: &str, outcome: Outcome, failure: Option<Failure>) -> ScenarioResult {
        ScenarioResult {
            suite: "Team".to_string(),
            name: name.to_string(),
            outcome,
            state: match outcome {
                Outcome::Passed => ScenarioState::Passed,
                Outcome::Failed => ScenarioState::Failed,
                Outcome::Skipped => ScenarioState::Init,
            },
            reached: ScenarioState::Navigated,
            duration_ms: 12,
            steps: vec![],
            failure,
        }
    }

    #[test]
    fn test_text_report_lists_each_failure() {
        colored::control::set_override(false);

        let results = TestSuiteResult {
            started_at: chrono::Utc::now(),
            total: 2,
            passed: 1,
            failed: 1,
            skipped: 0,
            duration_ms: 30,
            results: vec![
                result("allows me to edit the team", Outcome::Passed, None),
                result(
                    "shows team members",
                    Outcome::Failed,
                    Some(Failure {
                        kind: ErrorKind::Assertion,
                        message: "Assertion failed for '.govuk-table__row': element count differs\n  expected: 2\n  actual:   3".to_string(),
                    }),
                ),
            ],
        };

        let mut buf = Vec::new();
        write_text(&mut buf, &results).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("✓ Team › allows me to edit the team (12 ms)"));
        assert!(text.contains("✗ Team › shows team members"));
        assert!(text.contains("1) Team › shows team members"));
        assert!(text.contains("AssertionError (after Navigated)"));
        assert!(text.contains("expected: 2"));
        assert!(text.contains("1 passing, 1 failing, 0 skipped"));
    }
}
