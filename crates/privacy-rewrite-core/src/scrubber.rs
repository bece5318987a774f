//! Post-generation leak scrubbing
//!
//! Whatever the backend returned, the text leaving [`LeakScrubber::scrub`]
//! contains none of the original sensitive values, compared
//! case-insensitively. Nothing here depends on the backend having followed
//! its instructions.

use crate::detection::{PiiCategory, SensitiveSpan, SpanDetector, LEADING_STOPWORDS};
use crate::error::PipelineError;
use crate::mapping::literal_pattern;
use anyhow::Result;
use regex::{Captures, Regex};
use tracing::{debug, warn};

const PLACEHOLDER_PATTERN: &str = r"\[([A-Z]+(?:_[A-Z]+)*)_\d+\]";
const REDACTED: &str = "[REDACTED]";
const TITLES: &[&str] = &["Mr", "Mrs", "Ms", "Miss", "Dr", "Prof", "Sir"];

#[derive(Clone)]
pub struct LeakScrubber {
    detector: SpanDetector,
    placeholder_token: Regex,
}

impl LeakScrubber {
    pub fn new(detector: SpanDetector) -> Result<Self> {
        Ok(Self {
            detector,
            placeholder_token: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    pub fn scrub(
        &self,
        backend_text: &str,
        original_spans: &[SensitiveSpan],
    ) -> Result<String, PipelineError> {
        let mut text = self.replace_leftover_placeholders(backend_text);

        // Longest first so "Sarah Johnson" goes before a bare "sarah"
        let mut ordered: Vec<&SensitiveSpan> = original_spans.iter().collect();
        ordered.sort_by(|a, b| b.value.len().cmp(&a.value.len()));

        let mut literal_hits = 0;
        for span in &ordered {
            let pattern = literal_pattern(&span.value, true)?;
            if pattern.is_match(&text) {
                literal_hits += 1;
                text = replace_generic(&text, &pattern, span.category.generic_term());
            }
        }

        let introduced = self.detector.detect_patterns(&text);
        for span in &introduced {
            let pattern = literal_pattern(&span.value, true)?;
            text = replace_generic(&text, &pattern, span.category.generic_term());
        }

        text = self.replace_residual_first_names(&text, original_spans)?;
        text = self.enforce_no_leak(&text, original_spans)?;

        debug!(
            "Scrubbed backend output: {} original value(s) leaked through, {} new sensitive value(s) caught",
            literal_hits,
            introduced.len()
        );
        Ok(text)
    }

    fn replace_leftover_placeholders(&self, text: &str) -> String {
        self.placeholder_token
            .replace_all(text, |caps: &Captures| {
                let whole = &caps[0];
                match PiiCategory::from_placeholder_tag(&caps[1]) {
                    Some(category) => {
                        let start = caps.get(0).map_or(0, |m| m.start());
                        sentence_aware(text, start, category.generic_term())
                    }
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }

    // A model asked to drop "Sarah Johnson" will happily write "Sarah" instead
    fn replace_residual_first_names(
        &self,
        text: &str,
        spans: &[SensitiveSpan],
    ) -> Result<String, PipelineError> {
        let mut text = text.to_string();

        for span in spans.iter().filter(|s| s.category == PiiCategory::Name) {
            let Some((first, _)) = span.value.split_once(char::is_whitespace) else {
                continue;
            };
            if first.len() < 3 || LEADING_STOPWORDS.contains(&first) || TITLES.contains(&first) {
                continue;
            }

            let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(first)))?;
            text = replace_generic(&text, &pattern, PiiCategory::Name.generic_term());
        }

        Ok(text)
    }

    fn enforce_no_leak(
        &self,
        text: &str,
        spans: &[SensitiveSpan],
    ) -> Result<String, PipelineError> {
        let mut text = text.to_string();

        for span in spans {
            let pattern = literal_pattern(&span.value, true)?;
            if pattern.is_match(&text) {
                warn!(
                    "A {} value survived scrubbing, redacting it outright",
                    span.category
                );
                text = pattern.replace_all(&text, REDACTED).into_owned();
            }
        }

        Ok(text)
    }
}

fn replace_generic(text: &str, pattern: &Regex, term: &str) -> String {
    pattern
        .replace_all(text, |caps: &Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            sentence_aware(text, start, term)
        })
        .into_owned()
}

/// `term`, capitalised when it lands at the start of a sentence.
fn sentence_aware(text: &str, start: usize, term: &str) -> String {
    let opens_sentence = match text[..start].trim_end().chars().last() {
        None => true,
        Some(c) => matches!(c, '.' | '!' | '?'),
    };

    if !opens_sentence {
        return term.to_string();
    }

    let mut chars = term.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
