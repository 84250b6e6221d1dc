//! Baseline coverage resolution: the total the target branch last reported.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::artifact;
use crate::github::Client;
use crate::lcov::LcovCli;

/// Coverage extracted from the target branch's most recent artifact.
pub struct BaselineCoverage {
    pub coverage: f64,
    pub run_id: u64,
    pub head_sha: String,
    pub created_at: DateTime<Utc>,
}

/// Resolve the baseline total for `branch`, degrading to `None` on any
/// failure. A missing or broken baseline downgrades the report to absolute
/// figures; it must never fail the build of the change under review.
pub fn resolve(
    client: &Client,
    lcov: &LcovCli,
    branch: &str,
    artifact_name: &str,
    dest_root: &Path,
) -> Option<BaselineCoverage> {
    let found = match artifact::find_baseline(client, branch, artifact_name, dest_root) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("Warning: baseline lookup on '{}' failed: {:#}", branch, e);
            return None;
        }
    };
    let baseline = found?;
    match lcov.total_coverage(&baseline.path) {
        Ok(coverage) => Some(BaselineCoverage {
            coverage,
            run_id: baseline.run_id,
            head_sha: baseline.head_sha,
            created_at: baseline.created_at,
        }),
        Err(e) => {
            eprintln!(
                "Warning: could not read coverage from baseline artifact: {}",
                e
            );
            None
        }
    }
}
