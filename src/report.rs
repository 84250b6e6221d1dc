//! Report composition for the pull-request coverage comment.

use std::fmt::Write;

use crate::baseline::BaselineCoverage;

/// Shown in place of the per-file table when no listed file was touched by
/// the pull request.
pub const NOT_APPLICABLE: &str = "n/a";

/// Number of header lines at the top of the per-file listing.
const DETAIL_HEADER_LINES: usize = 3;

/// The comment's identity line. Deterministic per pull request: it embeds
/// the configurable title prefix but never a SHA or run id, so a re-run can
/// find the comment it wrote last time.
#[must_use]
pub fn header_marker(title_prefix: &str) -> String {
    if title_prefix.is_empty() {
        "### Coverage report".to_string()
    } else {
        format!("### {} Coverage report", title_prefix)
    }
}

/// Everything that goes into the comment body.
pub struct CoverageComment<'a> {
    pub title_prefix: &'a str,
    /// Aggregate coverage of the merged tracefile, 0-100.
    pub coverage: f64,
    pub baseline: Option<&'a BaselineCoverage>,
    /// The pull request's target branch, displayed next to the baseline.
    pub target_branch: &'a str,
    /// Trimmed summary output of the aggregation tool.
    pub summary: &'a str,
    /// Per-file listing, already filtered to changed files where possible.
    pub detail: &'a str,
    pub additional_message: &'a str,
    pub minimum: f64,
}

impl CoverageComment<'_> {
    /// Render the full markdown body. Pure string assembly, so a rendering
    /// problem can never leave a half-written comment on the PR.
    #[must_use]
    pub fn render(&self) -> String {
        let mut md = String::new();

        writeln!(md, "{}", header_marker(self.title_prefix)).unwrap();
        md.push('\n');

        match self.baseline {
            Some(b) => {
                let delta = self.coverage - b.coverage;
                let coverage = self.coverage;
                let base = b.coverage;
                let branch = self.target_branch;
                let sha = short_sha(&b.head_sha);
                let date = b.created_at.format("%Y-%m-%d");
                writeln!(
                    md,
                    "Total coverage: **{coverage:.2}%** ({delta:+.2}% vs **{base:.2}%** on `{branch}` @ {sha}, {date})"
                )
                .unwrap();
            }
            None => {
                let coverage = self.coverage;
                writeln!(md, "Total coverage: **{coverage:.2}%**").unwrap();
            }
        }

        md.push('\n');
        md.push_str("```\n");
        writeln!(md, "{}", self.summary.trim_end()).unwrap();
        md.push_str("```\n");

        md.push_str("\n<details>\n<summary>Changed files</summary>\n\n");
        md.push_str("```\n");
        writeln!(md, "{}", self.detail.trim_end()).unwrap();
        md.push_str("```\n\n</details>\n");

        if !self.additional_message.is_empty() {
            md.push('\n');
            writeln!(md, "{}", self.additional_message).unwrap();
        }

        if self.coverage < self.minimum {
            let coverage = self.coverage;
            let minimum = self.minimum;
            md.push('\n');
            writeln!(
                md,
                "> :warning: **{coverage:.2}%** is below the configured minimum of **{minimum:.2}%**."
            )
            .unwrap();
        }

        md.push_str("\n<sub>covgate</sub>\n");

        md
    }
}

/// Narrow the per-file listing to files touched by the pull request.
///
/// The first three lines are the listing header and are always kept. A data
/// row survives when its path column matches one of `changed_files`; when no
/// row survives, the sentinel [`NOT_APPLICABLE`] is returned instead of a
/// header-only table. Row order is preserved.
#[must_use]
pub fn filter_detail(detail: &[String], changed_files: &[String]) -> String {
    let mut kept: Vec<&str> = detail
        .iter()
        .take(DETAIL_HEADER_LINES)
        .map(String::as_str)
        .collect();
    let mut rows = 0;
    for line in detail.iter().skip(DETAIL_HEADER_LINES) {
        let path = row_path(line);
        if changed_files.iter().any(|c| paths_match(path, c)) {
            kept.push(line);
            rows += 1;
        }
    }
    if rows == 0 {
        return NOT_APPLICABLE.to_string();
    }
    kept.join("\n")
}

/// The path column of a listing row: everything before the first `|`.
fn row_path(line: &str) -> &str {
    line.split('|').next().unwrap_or(line).trim()
}

/// Whether a listing path and a changed-file path refer to the same file or
/// to a directory containing the other.
///
/// Plain prefix matching would let a row `foobar.c` match a changed file
/// named `foo`, so the shorter path must end at a separator boundary: the
/// paths are equal, or the shorter one is a directory prefix of the longer.
fn paths_match(row: &str, changed: &str) -> bool {
    let (short, long) = if row.len() <= changed.len() {
        (row, changed)
    } else {
        (changed, row)
    };
    if !long.starts_with(short) {
        return false;
    }
    if short.len() == long.len() {
        return true;
    }
    short.ends_with('/') || long.as_bytes()[short.len()] == b'/'
}

/// Abbreviate a commit SHA for display.
#[must_use]
pub fn short_sha(sha: &str) -> &str {
    if sha.len() > 7 {
        &sha[..7]
    } else {
        sha
    }
}
