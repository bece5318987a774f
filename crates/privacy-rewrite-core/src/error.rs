//! Error taxonomy for the rewrite and scan pipelines
//!
//! None of these messages carry sensitive literals. `SubstitutionIncomplete`
//! only reports how many values survived and which categories they belong to.

use crate::detection::PiiCategory;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "placeholder substitution incomplete: {remaining} original value(s) still present in masked text (categories: {})",
        format_categories(.categories)
    )]
    SubstitutionIncomplete {
        remaining: usize,
        categories: Vec<PiiCategory>,
    },

    #[error("text generation backend unavailable: {reason}. Check that the backend is running and reachable, or use a different endpoint")]
    BackendUnavailable { reason: String },

    #[error("text generation backend timed out after {}s. Try reducing the requested output size, shortening the input, or using a faster model", .timeout.as_secs())]
    BackendTimeout { timeout: Duration },

    #[error("malformed backend response: {0}")]
    MalformedBackendResponse(String),

    #[error("failed to build literal search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl PipelineError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
        }
    }

    /// True for the failures raised by the backend call itself.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. }
                | Self::BackendTimeout { .. }
                | Self::MalformedBackendResponse(_)
        )
    }
}

fn format_categories(categories: &[PiiCategory]) -> String {
    categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
