//! Call-scoped placeholder substitution
//!
//! Every unique sensitive value is bound to a `[CATEGORY_n]` placeholder and
//! every occurrence of it is replaced. Bindings live only as long as the call
//! that produced them and are never logged or persisted.

use crate::detection::{PiiCategory, SensitiveSpan};
use crate::error::PipelineError;
use regex::{NoExpand, Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderBinding {
    pub placeholder: String,
    pub category: PiiCategory,
    pub original: String,
}

#[derive(Debug, Clone)]
pub struct MaskedText {
    pub text: String,
    pub bindings: Vec<PlaceholderBinding>,
}

/// Hands out placeholders with a per-category counter starting at 1.
///
/// A mapper is consumed by [`mask`](Self::mask), so numbering can never leak
/// from one call into the next.
#[derive(Debug, Default)]
pub struct PlaceholderMapper {
    counters: HashMap<PiiCategory, usize>,
}

impl PlaceholderMapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_placeholder(&mut self, category: PiiCategory) -> String {
        let counter = self.counters.entry(category).or_insert(0);
        *counter += 1;
        format!("[{}_{}]", category.placeholder_tag(), counter)
    }

    pub fn mask(
        mut self,
        text: &str,
        spans: &[SensitiveSpan],
    ) -> Result<MaskedText, PipelineError> {
        let bindings: Vec<PlaceholderBinding> = spans
            .iter()
            .map(|span| PlaceholderBinding {
                placeholder: self.next_placeholder(span.category),
                category: span.category,
                original: span.value.clone(),
            })
            .collect();

        // Longest first, so a short value never splits a longer one that contains it
        let mut ordered: Vec<&PlaceholderBinding> = bindings.iter().collect();
        ordered.sort_by(|a, b| b.original.len().cmp(&a.original.len()));

        // Case-insensitive, so "SARAH JOHNSON" goes with "Sarah Johnson"
        let mut masked = text.to_string();
        for binding in ordered {
            let pattern = literal_pattern(&binding.original, true)?;
            masked = pattern
                .replace_all(&masked, NoExpand(&binding.placeholder))
                .into_owned();
        }

        let mut leftovers: Vec<&PlaceholderBinding> = Vec::new();
        for binding in &bindings {
            if literal_pattern(&binding.original, true)?.is_match(&masked) {
                leftovers.push(binding);
            }
        }

        if !leftovers.is_empty() {
            error!(
                "Masking left {} original value(s) in place, aborting",
                leftovers.len()
            );
            return Err(PipelineError::SubstitutionIncomplete {
                remaining: leftovers.len(),
                categories: leftovers.iter().map(|b| b.category).collect(),
            });
        }

        debug!(
            "Masked {} value(s): {}",
            bindings.len(),
            bindings
                .iter()
                .map(|b| b.placeholder.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(MaskedText {
            text: masked,
            bindings,
        })
    }
}

/// Regex matching `value` as a literal substring. Metacharacters in the value
/// (parentheses in phone numbers, `+` in emails, `$` in amounts) are escaped.
pub(crate) fn literal_pattern(value: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&regex::escape(value))
        .case_insensitive(case_insensitive)
        .build()
}
