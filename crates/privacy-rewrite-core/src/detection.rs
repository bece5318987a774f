//! Sensitive span detection using ordered regex matchers
//!
//! Matchers run in a fixed precedence order. Once a byte range has been
//! claimed by an earlier matcher, later matches overlapping it are dropped,
//! so an email address is never re-reported as a name and a card number is
//! never split into phone fragments.

use crate::config::DetectionConfig;
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PiiCategory {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    Account,
    Currency,
    Name,
}

impl PiiCategory {
    pub const ALL: [PiiCategory; 8] = [
        PiiCategory::Email,
        PiiCategory::Phone,
        PiiCategory::Ssn,
        PiiCategory::CreditCard,
        PiiCategory::IpAddress,
        PiiCategory::Account,
        PiiCategory::Currency,
        PiiCategory::Name,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PiiCategory::Email => "email",
            PiiCategory::Phone => "phone",
            PiiCategory::Ssn => "ssn",
            PiiCategory::CreditCard => "creditCard",
            PiiCategory::IpAddress => "ipAddress",
            PiiCategory::Account => "account",
            PiiCategory::Currency => "currency",
            PiiCategory::Name => "name",
        }
    }

    /// Upper-case tag used inside `[TAG_n]` placeholders.
    pub fn placeholder_tag(&self) -> &'static str {
        match self {
            PiiCategory::Email => "EMAIL",
            PiiCategory::Phone => "PHONE",
            PiiCategory::Ssn => "SSN",
            PiiCategory::CreditCard => "CREDIT_CARD",
            PiiCategory::IpAddress => "IP_ADDRESS",
            PiiCategory::Account => "ACCOUNT",
            PiiCategory::Currency => "CURRENCY",
            PiiCategory::Name => "NAME",
        }
    }

    pub fn from_placeholder_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.placeholder_tag() == tag)
    }

    /// Fixed wording substituted for a value of this category in final output.
    pub fn generic_term(&self) -> &'static str {
        match self {
            PiiCategory::Name => "the customer",
            PiiCategory::Email => "our support team",
            PiiCategory::Phone => "our phone number",
            PiiCategory::CreditCard => "your payment method",
            PiiCategory::Account => "your account",
            PiiCategory::Currency => "the amount",
            PiiCategory::Ssn => "the identification number",
            PiiCategory::IpAddress => "the server address",
        }
    }

    /// How the rewrite instructions describe what a placeholder must become.
    pub fn generic_reference(&self) -> &'static str {
        match self {
            PiiCategory::Name => "generic person reference (e.g. \"the customer\")",
            PiiCategory::Email => "generic email reference (e.g. \"our support team\")",
            PiiCategory::Phone => "generic phone reference (e.g. \"our phone number\")",
            PiiCategory::Ssn => "generic identifier reference (e.g. \"the identification number\")",
            PiiCategory::CreditCard => "generic payment reference (e.g. \"your payment method\")",
            PiiCategory::IpAddress => "generic network reference (e.g. \"the server address\")",
            PiiCategory::Account => "generic account reference (e.g. \"your account\")",
            PiiCategory::Currency => "generic amount reference (e.g. \"the amount\")",
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unique sensitive literal found in a text, with the byte range of its
/// first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveSpan {
    pub value: String,
    pub category: PiiCategory,
    pub start: usize,
    pub end: usize,
}

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
const CARD_CONTEXT_PATTERN: &str =
    r"(?i)\b(?:card|credit|ending|last)\b[^\d\n]{0,24}(\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4})\b";
const CARD_PLAIN_PATTERN: &str = r"\b(?:\d{4}[ -]?){3}\d{1,4}\b";
const IP_PATTERN: &str = r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b";
const ACCOUNT_PREFIXED_PATTERN: &str = r"(?i)\baccount(?:\s+(?:number|no\.?))?\s*[:#]?\s*(\d{4,})\b";
const ACCOUNT_HASH_PATTERN: &str = r"#\d{4,}\b";
const CURRENCY_PATTERN: &str = r"\$(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{2})?\b";
const PHONE_PATTERN: &str =
    r"(?:(?:\+?1[\s.-]?)?(?:\(\d{3}\)\s?|\b\d{3}[\s.-]?)\d{3}[\s.-]?\d{4}|\b\d{3}[\s.-]\d{4})\b";

const NAME_WORD_PATTERN: &str = r"\b[A-Z][a-z]+(?:-[A-Z][a-z]+)?\b";
const NAME_ALLOWLIST_PATTERN: &str =
    r"\b(?:john|jane|sarah|mike|michael|david|emily|chris|alex|maria)\b";

/// Capitalised bigrams that are greetings, sign-offs or places, never names.
const NAME_DENYLIST: &[&str] = &[
    "Thank You",
    "Thanks Again",
    "Best Regards",
    "Kind Regards",
    "Warm Regards",
    "Yours Sincerely",
    "Yours Truly",
    "Good Morning",
    "Good Afternoon",
    "Good Evening",
    "Dear Sir",
    "Dear Madam",
    "Dear Customer",
    "Happy Birthday",
    "Happy Holidays",
    "Merry Christmas",
    "Customer Service",
    "Customer Support",
    "New York",
    "Los Angeles",
    "San Francisco",
    "San Diego",
    "Las Vegas",
    "New Jersey",
    "New Orleans",
    "Hong Kong",
    "United States",
    "United Kingdom",
];

/// Words that open a sentence or a salutation. A bigram starting with one of
/// these is shifted by one word instead of being reported.
pub(crate) const LEADING_STOPWORDS: &[&str] = &[
    "Hi", "Hello", "Hey", "Dear", "Thanks", "Thank", "Please", "Call", "Contact", "Email", "Ask",
    "Tell", "From", "To", "The", "This", "That", "Our", "Your", "My", "Best", "Kind", "Warm",
    "Regards", "Sincerely", "Good", "Happy", "Welcome",
];

#[derive(Clone)]
struct Matcher {
    category: PiiCategory,
    regex: Regex,
    group: usize,
}

#[derive(Clone)]
pub struct SpanDetector {
    matchers: Vec<Matcher>,
    name_word: Regex,
    name_allowlist: Regex,
    name_denylist: HashSet<String>,
    name_heuristic: bool,
}

impl SpanDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let matchers = vec![
            compile(PiiCategory::Email, EMAIL_PATTERN, 0)?,
            compile(PiiCategory::Ssn, SSN_PATTERN, 0)?,
            compile(PiiCategory::CreditCard, CARD_CONTEXT_PATTERN, 1)?,
            compile(PiiCategory::CreditCard, CARD_PLAIN_PATTERN, 0)?,
            compile(PiiCategory::IpAddress, IP_PATTERN, 0)?,
            compile(PiiCategory::Account, ACCOUNT_PREFIXED_PATTERN, 1)?,
            compile(PiiCategory::Account, ACCOUNT_HASH_PATTERN, 0)?,
            compile(PiiCategory::Currency, CURRENCY_PATTERN, 0)?,
            compile(PiiCategory::Phone, PHONE_PATTERN, 0)?,
        ];

        let name_denylist = NAME_DENYLIST
            .iter()
            .map(|phrase| phrase.to_string())
            .chain(config.extra_name_denylist.iter().map(|phrase| normalize_phrase(phrase)))
            .collect();

        debug!(
            "Span detector ready: {} matchers, name heuristic {}",
            matchers.len(),
            if config.name_heuristic { "on" } else { "off" }
        );

        Ok(Self {
            matchers,
            name_word: Regex::new(NAME_WORD_PATTERN)?,
            name_allowlist: Regex::new(NAME_ALLOWLIST_PATTERN)?,
            name_denylist,
            name_heuristic: config.name_heuristic,
        })
    }

    /// Every unique sensitive literal in `text`, ordered by first occurrence.
    pub fn detect(&self, text: &str) -> Vec<SensitiveSpan> {
        self.scan(text, self.name_heuristic)
    }

    /// Same as [`detect`](Self::detect) but without the name heuristic. Used
    /// over generated text, where capitalised prose would trigger it constantly.
    pub fn detect_patterns(&self, text: &str) -> Vec<SensitiveSpan> {
        self.scan(text, false)
    }

    fn scan(&self, text: &str, include_names: bool) -> Vec<SensitiveSpan> {
        let mut found = Found::default();

        for matcher in &self.matchers {
            for caps in matcher.regex.captures_iter(text) {
                if let Some(m) = caps.get(matcher.group) {
                    found.record(text, matcher.category, m.start(), m.end());
                }
            }
        }

        if include_names {
            self.scan_names(text, &mut found);
        }

        let mut spans = found.spans;
        spans.sort_by_key(|s| s.start);
        spans
    }

    // Deliberately loose: any two adjacent capitalised words count, minus the
    // denylist. Lower-case names are only caught through the allow-list.
    fn scan_names(&self, text: &str, found: &mut Found) {
        let words: Vec<_> = self.name_word.find_iter(text).collect();

        let mut i = 0;
        while i + 1 < words.len() {
            let (first, second) = (words[i], words[i + 1]);
            let gap = &text[first.end()..second.start()];
            let adjacent = !gap.is_empty() && gap.chars().all(|c| c == ' ' || c == '\t');

            if !adjacent
                || LEADING_STOPWORDS.contains(&first.as_str())
                || self.is_denylisted(first.as_str(), second.as_str())
            {
                i += 1;
                continue;
            }

            if found.record(text, PiiCategory::Name, first.start(), second.end()) {
                i += 2;
            } else {
                i += 1;
            }
        }

        for m in self.name_allowlist.find_iter(text) {
            found.record(text, PiiCategory::Name, m.start(), m.end());
        }
    }

    fn is_denylisted(&self, first: &str, second: &str) -> bool {
        self.name_denylist.contains(&format!("{} {}", first, second))
    }
}

fn compile(category: PiiCategory, pattern: &str, group: usize) -> Result<Matcher> {
    match Regex::new(pattern) {
        Ok(regex) => Ok(Matcher { category, regex, group }),
        Err(e) => {
            warn!("Invalid regex pattern for '{}': {}", category, e);
            Err(anyhow::anyhow!("Invalid regex pattern for '{}': {}", category, e))
        }
    }
}

fn normalize_phrase(phrase: &str) -> String {
    phrase.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Default)]
struct Found {
    spans: Vec<SensitiveSpan>,
    claimed: Vec<(usize, usize)>,
}

impl Found {
    /// Claims `start..end` unless an earlier match already overlaps it.
    fn record(&mut self, text: &str, category: PiiCategory, start: usize, end: usize) -> bool {
        if self.claimed.iter().any(|&(s, e)| start < e && s < end) {
            return false;
        }
        self.claimed.push((start, end));

        let value = &text[start..end];
        if !self.spans.iter().any(|span| span.value == value) {
            self.spans.push(SensitiveSpan {
                value: value.to_string(),
                category,
                start,
                end,
            });
        }
        true
    }
}
