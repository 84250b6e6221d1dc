//! Resolved GitHub Actions run context.
//!
//! Everything the pipeline needs to know about the run it is part of is
//! captured here once, at startup. Components receive a `&RunContext` and
//! never read process environment themselves.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

const DEFAULT_API_URL: &str = "https://api.github.com";

/// Repository identity, split from `GITHUB_REPOSITORY` (`owner/name`).
#[derive(Debug, Clone)]
pub struct Repo {
    pub owner: String,
    pub name: String,
}

/// Pull-request details taken from the event payload.
#[derive(Debug, Clone)]
pub struct PullRequestContext {
    pub number: u64,
    pub head_sha: String,
    /// Name of the target branch the PR merges into.
    pub base_ref: String,
}

/// Immutable per-run context.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub repo: Option<Repo>,
    pub event_name: String,
    pub api_url: String,
    pub pull_request: Option<PullRequestContext>,
    /// Step-output file (`GITHUB_OUTPUT`), when running under Actions.
    pub output_path: Option<PathBuf>,
}

impl RunContext {
    /// Build a context from the standard GitHub Actions environment
    /// (`GITHUB_REPOSITORY`, `GITHUB_EVENT_NAME`, `GITHUB_EVENT_PATH`,
    /// `GITHUB_API_URL`, `GITHUB_OUTPUT`). Absent variables leave the
    /// corresponding field empty rather than failing: running outside of
    /// Actions is supported, it just disables the PR-facing steps.
    pub fn from_env() -> Result<Self> {
        let repo = std::env::var("GITHUB_REPOSITORY").ok().and_then(|v| {
            let (owner, name) = v.split_once('/')?;
            Some(Repo {
                owner: owner.to_string(),
                name: name.to_string(),
            })
        });
        let event_name = std::env::var("GITHUB_EVENT_NAME").unwrap_or_default();
        let api_url =
            std::env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let pull_request = match std::env::var("GITHUB_EVENT_PATH") {
            Ok(path) => pull_request_from_payload_file(Path::new(&path))?,
            Err(_) => None,
        };
        let output_path = std::env::var("GITHUB_OUTPUT").ok().map(PathBuf::from);
        Ok(Self {
            repo,
            event_name,
            api_url,
            pull_request,
            output_path,
        })
    }

    /// Emit a step output (`name=value`). Appends to the step-output file
    /// when running under Actions, falls back to stdout otherwise.
    pub fn set_output(&self, name: &str, value: &str) -> Result<()> {
        match &self.output_path {
            Some(path) => {
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open output file {}", path.display()))?;
                writeln!(file, "{}={}", name, value)?;
            }
            None => println!("{}={}", name, value),
        }
        Ok(())
    }
}

/// A payload path that points at no file counts as no pull request; a file
/// that exists but cannot be read or parsed is an error.
fn pull_request_from_payload_file(path: &Path) -> Result<Option<PullRequestContext>> {
    if !path.exists() {
        eprintln!(
            "Warning: event payload {} does not exist, assuming no pull request",
            path.display()
        );
        return Ok(None);
    }
    let payload = fs::read_to_string(path)
        .with_context(|| format!("Failed to read event payload {}", path.display()))?;
    pull_request_from_payload(&payload).context("Failed to parse event payload")
}

/// Extract the pull-request context from an event payload, if the event
/// carries one. Events without a `pull_request` object (push, schedule, ...)
/// yield `None`; that is the expected non-PR state, not an error.
pub fn pull_request_from_payload(payload: &str) -> Result<Option<PullRequestContext>> {
    #[derive(Deserialize)]
    struct Payload {
        pull_request: Option<PayloadPullRequest>,
    }

    #[derive(Deserialize)]
    struct PayloadPullRequest {
        number: u64,
        head: PayloadHead,
        base: PayloadBase,
    }

    #[derive(Deserialize)]
    struct PayloadHead {
        sha: String,
    }

    #[derive(Deserialize)]
    struct PayloadBase {
        #[serde(rename = "ref")]
        ref_name: String,
    }

    let payload: Payload = serde_json::from_str(payload)?;
    Ok(payload.pull_request.map(|pr| PullRequestContext {
        number: pr.number,
        head_sha: pr.head.sha,
        base_ref: pr.base.ref_name,
    }))
}
