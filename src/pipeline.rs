//! The coverage pipeline, start to finish.
//!
//! Ordering is the contract here: the machine-readable output is written as
//! soon as the total is known, the comment and artifact uploads happen next,
//! and the minimum-coverage gate runs last, so a failing gate still leaves a
//! full report behind.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};

use crate::artifact::ArtifactUploader;
use crate::baseline::{self, BaselineCoverage};
use crate::context::RunContext;
use crate::error::CovgateError;
use crate::github::{self, Client};
use crate::lcov::LcovCli;
use crate::report::{self, CoverageComment};

/// Resolved configuration for one pipeline run.
pub struct Config {
    /// Whitespace-separated glob patterns naming the tracefiles to merge.
    pub coverage_files: String,
    pub title_prefix: String,
    pub additional_message: String,
    pub update_comment: bool,
    /// Artifact name for the merged tracefile. The same name is looked up
    /// on the target branch to find the baseline.
    pub coverage_artifact_name: String,
    pub github_token: String,
    pub minimum_coverage: f64,
    /// Directory the HTML generator resolves source paths from.
    pub working_directory: PathBuf,
    /// Artifact name for the rendered HTML report; skipped when empty.
    pub artifact_name: String,
}

/// Run the whole pipeline, returning the aggregate coverage on success.
pub fn run(config: &Config, ctx: &RunContext, lcov: &LcovCli) -> Result<f64> {
    let scratch = scratch_dir();
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("Failed to create {}", scratch.display()))?;

    let traces = expand_globs(&config.coverage_files)?;
    eprintln!("Merging {} tracefile(s)", traces.len());
    let merged = lcov.merge(&traces, &scratch)?;
    let coverage = lcov.total_coverage(&merged)?;

    ctx.set_output("total-coverage", &format!("{:.2}", coverage))?;

    let client = if config.github_token.is_empty() {
        eprintln!("No GitHub token configured, skipping pull request reporting");
        None
    } else if let Some(repo) = &ctx.repo {
        Some(Client::new(&config.github_token, &ctx.api_url, repo))
    } else {
        eprintln!("No repository in the environment, skipping pull request reporting");
        None
    };
    if ctx.pull_request.is_none() {
        eprintln!(
            "Event '{}' carries no pull request, reporting to the log only",
            ctx.event_name
        );
    }

    let baseline = resolve_baseline(config, ctx, &client, lcov, &scratch);

    let summary = lcov.summarize(&merged)?;
    let detail = lcov.list_detail(&merged)?;

    let detail_text = if let (Some(client), Some(pr)) = (&client, &ctx.pull_request) {
        let changed = client.list_pr_files(pr.number)?;
        report::filter_detail(&detail, &changed)
    } else {
        detail.join("\n")
    };

    let target_branch = ctx
        .pull_request
        .as_ref()
        .map(|pr| pr.base_ref.as_str())
        .unwrap_or_default();
    let body = CoverageComment {
        title_prefix: &config.title_prefix,
        coverage,
        baseline: baseline.as_ref(),
        target_branch,
        summary: &summary,
        detail: &detail_text,
        additional_message: &config.additional_message,
        minimum: config.minimum_coverage,
    }
    .render();

    if let (Some(client), Some(pr)) = (&client, &ctx.pull_request) {
        let marker = report::header_marker(&config.title_prefix);
        github::publish(client, pr.number, &body, &marker, config.update_comment)?;
    } else {
        println!("{}", body);
    }

    if !config.coverage_artifact_name.is_empty() {
        if config.github_token.is_empty() {
            eprintln!(
                "No GitHub token configured, not uploading '{}'",
                config.coverage_artifact_name
            );
        } else {
            upload_artifact(&config.coverage_artifact_name, &merged)?;
        }
    }

    if !config.artifact_name.is_empty() {
        let html_dir = scratch.join("html");
        lcov.generate_html(&merged, &html_dir, &config.working_directory)?;
        upload_artifact(&config.artifact_name, &html_dir)?;
    }

    if coverage < config.minimum_coverage {
        return Err(CovgateError::BelowMinimum {
            coverage,
            minimum: config.minimum_coverage,
        }
        .into());
    }

    Ok(coverage)
}

fn resolve_baseline(
    config: &Config,
    ctx: &RunContext,
    client: &Option<Client>,
    lcov: &LcovCli,
    scratch: &Path,
) -> Option<BaselineCoverage> {
    let (Some(client), Some(pr)) = (client, &ctx.pull_request) else {
        return None;
    };
    if config.coverage_artifact_name.is_empty() {
        eprintln!("No coverage artifact name configured, skipping baseline comparison");
        return None;
    }
    baseline::resolve(
        client,
        lcov,
        &pr.base_ref,
        &config.coverage_artifact_name,
        scratch,
    )
}

fn upload_artifact(name: &str, path: &Path) -> Result<()> {
    match ArtifactUploader::from_env() {
        Some(uploader) => uploader.upload(name, path),
        None => {
            eprintln!(
                "Warning: artifact service unavailable, not uploading '{}'",
                name
            );
            Ok(())
        }
    }
}

/// Expand whitespace-separated glob patterns into a sorted, deduplicated
/// list of existing tracefile paths.
fn expand_globs(patterns: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns.split_whitespace() {
        let entries =
            glob::glob(pattern).with_context(|| format!("Invalid glob pattern '{}'", pattern))?;
        for entry in entries {
            let path = entry.context("Failed to read glob entry")?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        bail!("No coverage files matched '{}'", patterns);
    }
    Ok(files)
}

/// Scratch directory for this invocation, keyed by pid so concurrent jobs
/// on the same runner cannot collide.
fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("covgate-{}", std::process::id()))
}
