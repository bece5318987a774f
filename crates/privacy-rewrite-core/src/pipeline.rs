//! Entry points exposed to the tool-invocation host
//!
//! Rewrite runs `detect → mask → generate → scrub`, strictly linear; any stage
//! error aborts the call and nothing partial is returned. Scan is fail-soft
//! and always produces a report. Both are stateless per call: counters,
//! bindings and spans live on the stack of the invocation, so one pipeline can
//! serve any number of concurrent calls.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::backend::TextGenerationBackend;
use crate::config::Config;
use crate::detection::SpanDetector;
use crate::error::PipelineError;
use crate::mapping::PlaceholderMapper;
use crate::ollama::{OllamaBackend, OllamaConfig};
use crate::prompt_loader::PromptLoader;
use crate::rewrite::{PrivacyLevel, RewriteOrchestrator};
use crate::risk::{RiskReport, RiskScanner};
use crate::scrubber::LeakScrubber;

pub struct PrivacyPipeline {
    detector: SpanDetector,
    scrubber: LeakScrubber,
    orchestrator: RewriteOrchestrator,
    scanner: RiskScanner,
}

impl PrivacyPipeline {
    /// Pipeline backed by the Ollama server described in `config.llm`.
    pub fn with_ollama(config: &Config) -> Result<Self> {
        let backend = OllamaBackend::new(OllamaConfig::from(&config.llm))?;
        Self::new(config, Arc::new(backend))
    }

    /// Resolves a custom scan prompt, if configured, from the application
    /// data directory.
    pub fn new(config: &Config, backend: Arc<dyn TextGenerationBackend>) -> Result<Self> {
        let scan_prompt = match config.scan.prompt_template.as_deref() {
            Some(name) => PromptLoader::from_app_dirs()?.load_prompt(Some(name)),
            None => PromptLoader::builtin().to_string(),
        };
        Self::with_scan_prompt(config, backend, scan_prompt)
    }

    pub fn with_scan_prompt(
        config: &Config,
        backend: Arc<dyn TextGenerationBackend>,
        scan_prompt: String,
    ) -> Result<Self> {
        let detector = SpanDetector::new(&config.detection)?;
        let scrubber = LeakScrubber::new(detector.clone())?;
        let timeout = config.llm.timeout();

        let orchestrator =
            RewriteOrchestrator::new(backend.clone(), config.rewrite.clone(), timeout);
        let scanner = RiskScanner::new(
            detector.clone(),
            backend,
            scan_prompt,
            config.scan.clone(),
            timeout,
        );

        Ok(Self {
            detector,
            scrubber,
            orchestrator,
            scanner,
        })
    }

    /// Rewrites `content` in `style` without letting any detected sensitive
    /// value through, whether or not the backend cooperates.
    pub async fn secure_rewrite(
        &self,
        content: &str,
        style: &str,
        level: PrivacyLevel,
    ) -> Result<String, PipelineError> {
        let span = info_span!("secure_rewrite", call_id = %Uuid::new_v4(), level = %level);

        self.run_rewrite(content, style, level)
            .instrument(span)
            .await
            .map_err(|e| {
                error!("Secure rewrite aborted: {}", e);
                e
            })
    }

    async fn run_rewrite(
        &self,
        content: &str,
        style: &str,
        level: PrivacyLevel,
    ) -> Result<String, PipelineError> {
        if content.trim().is_empty() {
            debug!("Empty content, nothing to rewrite");
            return Ok(String::new());
        }

        let spans = self.detector.detect(content);
        debug!("Detected {} sensitive value(s)", spans.len());

        let masked = PlaceholderMapper::new().mask(content, &spans)?;
        let generated = self
            .orchestrator
            .rewrite(&masked.text, &masked.bindings, style, level)
            .await?;
        let output = self.scrubber.scrub(&generated, &spans)?;

        info!(
            "Rewrite complete: {} value(s) masked, {} chars out",
            masked.bindings.len(),
            output.len()
        );
        Ok(output)
    }

    /// Read-only risk report for `content`. Never fails.
    pub async fn scan_for_privacy_issues(&self, content: &str) -> RiskReport {
        let span = info_span!("scan_for_privacy_issues", call_id = %Uuid::new_v4());
        self.scanner.scan(content).instrument(span).await
    }
}
