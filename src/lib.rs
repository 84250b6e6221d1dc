pub mod artifact;
pub mod baseline;
pub mod context;
pub mod error;
pub mod github;
pub mod lcov;
pub mod pipeline;
pub mod report;
