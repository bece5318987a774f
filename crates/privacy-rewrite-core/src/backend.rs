//! Text generation backend abstraction
//!
//! The pipelines only ever talk to a `dyn TextGenerationBackend`, which keeps
//! them independent of any particular model server and lets tests substitute
//! deterministic doubles.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub user_instruction: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[async_trait]
pub trait TextGenerationBackend: Send + Sync {
    /// Generate text for the given instructions.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError>;
}

/// Runs a backend call bounded by `timeout`.
///
/// This is the only suspension point of either pipeline. Dropping the
/// returned future cancels the in-flight request.
pub async fn generate_with_timeout(
    backend: &dyn TextGenerationBackend,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<String, PipelineError> {
    match tokio::time::timeout(timeout, backend.generate(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Backend call exceeded {:?}, giving up", timeout);
            Err(PipelineError::BackendTimeout { timeout })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{CannedBackend, SlowBackend};
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_instruction: "system".to_string(),
            user_instruction: "user".to_string(),
            temperature: 0.3,
            max_output_tokens: 100,
        }
    }

    #[tokio::test]
    async fn test_generate_within_timeout() {
        let backend = CannedBackend::answering("done");
        let result = generate_with_timeout(&backend, &request(), Duration::from_secs(5)).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(backend.last_request(), request());
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let result =
            generate_with_timeout(&SlowBackend, &request(), Duration::from_millis(20)).await;

        match result {
            Err(PipelineError::BackendTimeout { timeout }) => {
                assert_eq!(timeout, Duration::from_millis(20))
            }
            other => panic!("expected BackendTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_error_passes_through() {
        let backend = CannedBackend::failing("connection refused");
        let result = generate_with_timeout(&backend, &request(), Duration::from_secs(5)).await;

        assert!(matches!(result, Err(PipelineError::BackendUnavailable { .. })));
    }
}
