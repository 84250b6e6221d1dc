//! Invocation of the external `lcov` and `genhtml` executables.
//!
//! The pipeline never parses tracefile internals; everything it knows about
//! coverage comes from the text these tools print. Output post-processing
//! (banner stripping, list framing, percentage extraction) is kept in pure
//! helpers so it can be tested without the tools installed.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CovgateError, Result};

/// Pre-compiled regex for the summary's aggregate line figure,
/// e.g. "  lines......: 84.6% (22 of 26 lines)".
static LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lines\.*:\s*([0-9]+(?:\.[0-9]+)?)%").unwrap());

/// Handle to the external coverage tooling.
pub struct LcovCli {
    lcov: PathBuf,
    genhtml: PathBuf,
}

impl Default for LcovCli {
    fn default() -> Self {
        Self {
            lcov: PathBuf::from("lcov"),
            genhtml: PathBuf::from("genhtml"),
        }
    }
}

impl LcovCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use specific binaries instead of resolving `lcov`/`genhtml` on PATH.
    pub fn with_binaries(lcov: impl Into<PathBuf>, genhtml: impl Into<PathBuf>) -> Self {
        Self {
            lcov: lcov.into(),
            genhtml: genhtml.into(),
        }
    }

    /// Merge tracefiles into `<output_dir>/merged.info`, with branch
    /// coverage accounting enabled. Inputs are passed in order, one
    /// `--add-tracefile` each. A failing merge is fatal; there is no retry.
    pub fn merge(&self, trace_files: &[PathBuf], output_dir: &Path) -> Result<PathBuf> {
        if trace_files.is_empty() {
            return Err(CovgateError::Other("no tracefiles to merge".to_string()));
        }
        let merged = output_dir.join("merged.info");
        let mut cmd = Command::new(&self.lcov);
        for file in trace_files {
            cmd.arg("--add-tracefile").arg(file);
        }
        cmd.arg("--output-file").arg(&merged);
        cmd.arg("--rc").arg("lcov_branch_coverage=1");
        run_captured(cmd, "lcov")?;
        Ok(merged)
    }

    /// Human-readable summary of a tracefile (the `--summary` text with the
    /// "Reading tracefile" banner removed).
    pub fn summarize(&self, trace: &Path) -> Result<String> {
        let output = run_captured(self.summary_command(trace), "lcov")?;
        Ok(strip_banner(&output))
    }

    /// Per-file listing rows: a three-line column header followed by one row
    /// per file. The banner and the trailing separator/totals pair are
    /// dropped.
    pub fn list_detail(&self, trace: &Path) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.lcov);
        cmd.arg("--list")
            .arg(trace)
            .arg("--list-full-path")
            .arg("--rc")
            .arg("lcov_branch_coverage=1");
        let output = run_captured(cmd, "lcov")?;
        detail_rows(&output)
    }

    /// Aggregate line-coverage percentage of a tracefile, in [0, 100].
    pub fn total_coverage(&self, trace: &Path) -> Result<f64> {
        let output = run_captured(self.summary_command(trace), "lcov")?;
        parse_total(&output)
    }

    /// Render the HTML report into `output_dir`, running `genhtml` from
    /// `working_dir` so relative source paths inside the tracefile resolve.
    pub fn generate_html(&self, trace: &Path, output_dir: &Path, working_dir: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.genhtml);
        cmd.arg(trace)
            .arg("--output-directory")
            .arg(output_dir)
            .current_dir(working_dir);
        run_captured(cmd, "genhtml")?;
        Ok(())
    }

    fn summary_command(&self, trace: &Path) -> Command {
        let mut cmd = Command::new(&self.lcov);
        cmd.arg("--summary")
            .arg(trace)
            .arg("--rc")
            .arg("lcov_branch_coverage=1");
        cmd
    }
}

/// Run a command to completion and return its combined stdout+stderr text.
/// lcov splits its chatter across both streams depending on version.
fn run_captured(mut cmd: Command, tool: &str) -> Result<String> {
    let output = cmd.output().map_err(|e| CovgateError::Tool {
        tool: tool.to_string(),
        status: "failed to start".to_string(),
        detail: e.to_string(),
    })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(CovgateError::Tool {
            tool: tool.to_string(),
            status: output.status.to_string(),
            detail: stderr.trim().to_string(),
        });
    }
    let mut combined = stdout.into_owned();
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    Ok(combined)
}

/// Drop the first line of tool output (the "Reading tracefile ..." banner).
fn strip_banner(output: &str) -> String {
    output.lines().skip(1).collect::<Vec<_>>().join("\n")
}

/// Frame a `--list` output: drop the banner line and the separator/totals
/// pair at the end. The first three remaining lines are the column header,
/// which callers must retain.
fn detail_rows(output: &str) -> Result<Vec<String>> {
    let lines: Vec<&str> = output.lines().collect();
    // banner + 3 header lines + separator + totals = 6 lines minimum
    if lines.len() < 6 {
        return Err(CovgateError::Parse(format!(
            "unexpected lcov --list output ({} lines)",
            lines.len()
        )));
    }
    Ok(lines[1..lines.len() - 2]
        .iter()
        .map(|s| s.to_string())
        .collect())
}

/// Extract the aggregate line-coverage figure from summary output.
fn parse_total(output: &str) -> Result<f64> {
    let caps = LINES_RE.captures(output).ok_or_else(|| {
        CovgateError::Parse("no line-coverage figure in lcov summary output".to_string())
    })?;
    caps[1]
        .parse::<f64>()
        .map_err(|e| CovgateError::Parse(e.to_string()))
}
