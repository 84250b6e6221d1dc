use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use covgate::context::RunContext;
use covgate::lcov::LcovCli;
use covgate::pipeline::{self, Config};

/// LCOV coverage reporting and gating for GitHub pull requests.
#[derive(Parser)]
#[command(name = "covgate", version, about)]
struct Cli {
    /// Glob pattern(s) matching the tracefiles to merge, separated by spaces.
    #[arg(long)]
    coverage_files: String,

    /// Prefix for the comment title, e.g. a job name.
    #[arg(long, default_value = "")]
    title_prefix: String,

    /// Extra markdown appended to the end of the comment.
    #[arg(long, default_value = "")]
    additional_message: String,

    /// Update the existing report comment in place instead of posting a new one.
    #[arg(long)]
    update_comment: bool,

    /// Artifact name for the merged tracefile; also used to locate the
    /// baseline artifact on the target branch.
    #[arg(long, default_value = "")]
    coverage_artifact_name: String,

    /// Token for the GitHub API. When empty, commenting and artifact
    /// operations are skipped.
    #[arg(long, default_value = "")]
    github_token: String,

    /// Fail the run when total coverage is below this percentage.
    #[arg(long, default_value_t = 0.0)]
    minimum_coverage: f64,

    /// Working directory for the HTML report generator.
    #[arg(long, default_value = ".")]
    working_directory: PathBuf,

    /// Artifact name for the rendered HTML report; empty disables it.
    #[arg(long, default_value = "")]
    artifact_name: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = RunContext::from_env()?;

    let config = Config {
        coverage_files: cli.coverage_files,
        title_prefix: cli.title_prefix,
        additional_message: cli.additional_message,
        update_comment: cli.update_comment,
        coverage_artifact_name: cli.coverage_artifact_name,
        github_token: cli.github_token,
        minimum_coverage: cli.minimum_coverage,
        working_directory: cli.working_directory,
        artifact_name: cli.artifact_name,
    };

    let coverage = pipeline::run(&config, &ctx, &LcovCli::new())?;
    println!("Total coverage: {:.2}%", coverage);
    Ok(())
}
