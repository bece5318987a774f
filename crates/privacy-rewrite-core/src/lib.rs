pub mod backend;
pub mod config;
pub mod detection;
pub mod error;
pub mod mapping;
pub mod ollama;
pub mod pipeline;
pub mod prompt_loader;
pub mod rewrite;
pub mod risk;
pub mod scrubber;

pub use backend::{GenerationRequest, TextGenerationBackend};
pub use config::{Config, DetectionConfig, LlmConfig, RewriteConfig, ScanConfig};
pub use detection::{PiiCategory, SensitiveSpan, SpanDetector};
pub use error::PipelineError;
pub use mapping::{MaskedText, PlaceholderBinding, PlaceholderMapper};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use pipeline::PrivacyPipeline;
pub use prompt_loader::PromptLoader;
pub use rewrite::{PrivacyLevel, RewriteOrchestrator};
pub use risk::{RiskFinding, RiskReport, RiskScanner, Severity};
pub use scrubber::LeakScrubber;
