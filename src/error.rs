use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovgateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed ({status}): {detail}")]
    Tool {
        tool: String,
        status: String,
        detail: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Baseline artifact must contain exactly one file, found {found}")]
    ArtifactContents { found: usize },

    #[error("Total coverage {coverage:.2}% is below the minimum {minimum:.2}% required")]
    BelowMinimum { coverage: f64, minimum: f64 },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CovgateError>;
