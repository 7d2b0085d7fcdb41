//! Operator-facing run summary.

use super::{RunOutcome, RunReport};
use crate::utils::errors::RestoreError;
use std::fmt::Write;

const RULE: &str = "========================================================================";

/// Plain-text summary of a finished run.
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "fork-check: {}", report.outcome);
    let _ = writeln!(out, "  manifest: {}", report.manifest.display());
    let _ = writeln!(
        out,
        "  candidate: {} (branch: {})",
        report.candidate.source,
        report.candidate.branch.as_deref().unwrap_or("<default>")
    );
    for record in &report.stages {
        let _ = writeln!(
            out,
            "  [{}] {:<8} {:>7.1}s  {}",
            if record.ok { " ok " } else { "FAIL" },
            record.stage.to_string(),
            record.elapsed.as_secs_f64(),
            record.detail
        );
    }
    if let Some(failed) = report.failed_stage() {
        let _ = writeln!(out, "  failed stage: {}", failed.stage);
    }
    if report.outcome != RunOutcome::RestoreFailed {
        let _ = writeln!(out, "  manifest restored to its original content");
    }
    let _ = write!(out, "  exit code: {}", report.outcome.exit_code());
    out
}

/// Loud notice that the manifest is still mutated, with the bytes to put back.
pub fn restore_failure_banner(err: &RestoreError) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "FATAL: could not restore {}", err.path.display());
    let _ = writeln!(out, "error: {}", err.source);
    let _ = writeln!(out, "The manifest still points at the candidate fork.");
    let _ = writeln!(out, "Replace its content with the original below:");
    let _ = writeln!(out, "{RULE}");
    out.push_str(&err.original);
    if !err.original.ends_with('\n') {
        out.push('\n');
    }
    let _ = write!(out, "{RULE}");
    out
}

/// Print the summary to stdout, and the restore banner to stderr when needed.
pub fn emit(report: &RunReport) {
    println!("{}", render(report));
    if let Some(err) = &report.restore_error {
        eprintln!("{}", restore_failure_banner(err));
    }
}
