//! Backend-assisted rewriting of masked text
//!
//! The orchestrator only ever sees masked text. Its output is untrusted and
//! always goes through the leak scrubber before reaching a caller.

use crate::backend::{generate_with_timeout, GenerationRequest, TextGenerationBackend};
use crate::config::RewriteConfig;
use crate::error::PipelineError;
use crate::mapping::PlaceholderBinding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_STYLE: &str = "professional";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    Strict,
    Moderate,
    Minimal,
}

impl PrivacyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyLevel::Strict => "strict",
            PrivacyLevel::Moderate => "moderate",
            PrivacyLevel::Minimal => "minimal",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            PrivacyLevel::Strict => {
                "Suppress every residual specific detail (dates, places, organisations, amounts, \
                 distinguishing facts) that could help identify anyone. Prefer vague, generic wording."
            }
            PrivacyLevel::Moderate => {
                "Balance privacy and readability. Replace identifying details with generic terms \
                 but keep the information needed to understand the message."
            }
            PrivacyLevel::Minimal => {
                "Redact only hard identifiers (the placeholders listed above). Keep all other \
                 wording as close to the original as possible."
            }
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(PrivacyLevel::Strict),
            "moderate" => Ok(PrivacyLevel::Moderate),
            "minimal" => Ok(PrivacyLevel::Minimal),
            other => Err(format!(
                "unknown privacy level '{}', expected strict, moderate or minimal",
                other
            )),
        }
    }
}

pub struct RewriteOrchestrator {
    backend: Arc<dyn TextGenerationBackend>,
    settings: RewriteConfig,
    timeout: Duration,
}

impl RewriteOrchestrator {
    pub fn new(
        backend: Arc<dyn TextGenerationBackend>,
        settings: RewriteConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            settings,
            timeout,
        }
    }

    pub fn build_request(
        &self,
        masked_text: &str,
        bindings: &[PlaceholderBinding],
        style: &str,
        level: PrivacyLevel,
    ) -> GenerationRequest {
        GenerationRequest {
            system_instruction: system_instruction(bindings, level),
            user_instruction: user_instruction(masked_text, style),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    /// Asks the backend to rewrite `masked_text`. Backend failures are
    /// returned as-is; there is no retry and no partial result.
    pub async fn rewrite(
        &self,
        masked_text: &str,
        bindings: &[PlaceholderBinding],
        style: &str,
        level: PrivacyLevel,
    ) -> Result<String, PipelineError> {
        let request = self.build_request(masked_text, bindings, style, level);

        debug!(
            "Requesting rewrite: {} placeholder(s), level {}, {} chars",
            bindings.len(),
            level,
            masked_text.len()
        );

        let generated = generate_with_timeout(self.backend.as_ref(), &request, self.timeout).await?;

        info!("Backend returned {} chars of rewritten text", generated.len());
        Ok(generated)
    }
}

fn system_instruction(bindings: &[PlaceholderBinding], level: PrivacyLevel) -> String {
    let mut out = String::from(
        "You rewrite text for privacy. Sensitive values in the text have already been \
         replaced with placeholders in square brackets.\n\n",
    );

    if bindings.is_empty() {
        out.push_str("The text contains no placeholders.\n");
    } else {
        out.push_str("Placeholders and what each one must become:\n");
        for binding in bindings {
            out.push_str(&format!(
                "- {} → {}\n",
                binding.placeholder,
                binding.category.generic_reference()
            ));
        }
    }

    out.push_str(&format!("\nPrivacy level: {}. {}\n\n", level, level.guidance()));
    out.push_str(
        "Rules:\n\
         - Never reproduce a placeholder token in your answer.\n\
         - Never invent names, contact details, numbers or identifiers.\n\
         - Return only the rewritten text, without commentary.",
    );
    out
}

fn user_instruction(masked_text: &str, style: &str) -> String {
    let style = match style.trim() {
        "" => DEFAULT_STYLE,
        s => s,
    };

    format!(
        "Rewrite the following text in a {} style.\n\
         Replace every placeholder with a generic term as described, preserving the \
         original meaning and tone.\n\n\
         Text:\n{}",
        style, masked_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{CannedBackend, SlowBackend};
    use crate::detection::PiiCategory;

    fn bindings() -> Vec<PlaceholderBinding> {
        vec![
            PlaceholderBinding {
                placeholder: "[NAME_1]".to_string(),
                category: PiiCategory::Name,
                original: "Sarah Johnson".to_string(),
            },
            PlaceholderBinding {
                placeholder: "[EMAIL_1]".to_string(),
                category: PiiCategory::Email,
                original: "sarah@corp.io".to_string(),
            },
        ]
    }

    fn orchestrator(backend: Arc<dyn TextGenerationBackend>) -> RewriteOrchestrator {
        RewriteOrchestrator::new(backend, RewriteConfig::default(), Duration::from_secs(5))
    }

    #[test]
    fn test_privacy_level_parsing() {
        assert_eq!("strict".parse::<PrivacyLevel>().unwrap(), PrivacyLevel::Strict);
        assert_eq!(" Moderate ".parse::<PrivacyLevel>().unwrap(), PrivacyLevel::Moderate);
        assert_eq!("MINIMAL".parse::<PrivacyLevel>().unwrap(), PrivacyLevel::Minimal);
        assert!("paranoid".parse::<PrivacyLevel>().is_err());
    }

    #[test]
    fn test_system_instruction_lists_placeholders() {
        let orchestrator = orchestrator(Arc::new(CannedBackend::answering("")));
        let request = orchestrator.build_request(
            "[NAME_1] wrote [EMAIL_1]",
            &bindings(),
            "casual",
            PrivacyLevel::Strict,
        );

        assert!(request.system_instruction.contains("[NAME_1] → generic person reference"));
        assert!(request.system_instruction.contains("[EMAIL_1] → generic email reference"));
        assert!(request.system_instruction.contains("Privacy level: strict"));
        assert!(request.system_instruction.contains("Suppress every residual specific detail"));
    }

    #[test]
    fn test_instructions_never_carry_originals() {
        let orchestrator = orchestrator(Arc::new(CannedBackend::answering("")));
        let request = orchestrator.build_request(
            "[NAME_1] wrote [EMAIL_1]",
            &bindings(),
            "casual",
            PrivacyLevel::Moderate,
        );

        for binding in bindings() {
            assert!(!request.system_instruction.contains(&binding.original));
            assert!(!request.user_instruction.contains(&binding.original));
        }
    }

    #[test]
    fn test_user_instruction_carries_style_and_text() {
        let orchestrator = orchestrator(Arc::new(CannedBackend::answering("")));
        let request = orchestrator.build_request(
            "Hello [NAME_1]",
            &bindings(),
            "casual",
            PrivacyLevel::Minimal,
        );

        assert!(request.user_instruction.contains("in a casual style"));
        assert!(request.user_instruction.contains("Replace every placeholder"));
        assert!(request.user_instruction.ends_with("Hello [NAME_1]"));
        assert!(request.system_instruction.contains("Redact only hard identifiers"));
    }

    #[test]
    fn test_blank_style_defaults_to_professional() {
        let orchestrator = orchestrator(Arc::new(CannedBackend::answering("")));
        let request = orchestrator.build_request("Hi", &[], "  ", PrivacyLevel::Moderate);

        assert!(request.user_instruction.contains("in a professional style"));
        assert!(request.system_instruction.contains("no placeholders"));
    }

    #[tokio::test]
    async fn test_rewrite_uses_configured_sampling() {
        let backend = Arc::new(CannedBackend::answering("Hello, valued customer"));
        let orchestrator = orchestrator(backend.clone());

        let text = orchestrator
            .rewrite("Hello [NAME_1]", &bindings(), "friendly", PrivacyLevel::Moderate)
            .await
            .unwrap();

        assert_eq!(text, "Hello, valued customer");
        let request = backend.last_request();
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.max_output_tokens, 2000);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let orchestrator = orchestrator(Arc::new(CannedBackend::failing("connection refused")));

        let err = orchestrator
            .rewrite("Hello [NAME_1]", &bindings(), "friendly", PrivacyLevel::Strict)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_backend_timeout_propagates() {
        let orchestrator = RewriteOrchestrator::new(
            Arc::new(SlowBackend),
            RewriteConfig::default(),
            Duration::from_millis(20),
        );

        let err = orchestrator
            .rewrite("Hello [NAME_1]", &bindings(), "friendly", PrivacyLevel::Strict)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BackendTimeout { .. }));
        assert!(err.to_string().contains("shortening the input"));
    }
}
