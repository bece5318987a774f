//! Read-only privacy risk scanning
//!
//! Two layers feed one report: the pattern detector, and a contextual pass by
//! the text generation backend for things regexes cannot see (names,
//! addresses, medical and financial details). The scan never fails. When the
//! contextual layer cannot be used, a conservative finding takes its place.

use crate::backend::{generate_with_timeout, GenerationRequest, TextGenerationBackend};
use crate::config::ScanConfig;
use crate::detection::{PiiCategory, SpanDetector};
use crate::error::PipelineError;
use crate::prompt_loader::PromptLoader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FALLBACK_CATEGORY: &str = "contextualAnalysis";

const PATTERN_EVIDENCE: &str = "pattern-detection";
const CONTEXTUAL_EVIDENCE: &str = "contextual-analysis";
const FALLBACK_EVIDENCE: &str = "scan-fallback";

const SCAN_SYSTEM_INSTRUCTION: &str =
    "You are a privacy analyst. Answer with a single JSON object and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    // Models are not consistent about casing or vocabulary
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" | "info" => Severity::Low,
            "high" | "critical" | "severe" => Severity::High,
            _ => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFinding {
    pub category: String,
    pub severity: Severity,
    pub description: String,
    pub evidence_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub issues: Vec<RiskFinding>,
    pub overall_risk: Severity,
    pub recommendations: Vec<String>,
}

impl RiskReport {
    pub fn from_issues(issues: Vec<RiskFinding>) -> Self {
        let overall_risk = issues
            .iter()
            .map(|issue| issue.severity)
            .max()
            .unwrap_or(Severity::Low);
        let recommendations = recommendations_for(&issues);

        Self {
            issues,
            overall_risk,
            recommendations,
        }
    }
}

/// Result of asking the backend for contextual findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextualAnalysis {
    Findings(Vec<RiskFinding>),
    Fallback(RiskFinding),
}

impl ContextualAnalysis {
    fn into_findings(self) -> Vec<RiskFinding> {
        match self {
            ContextualAnalysis::Findings(findings) => findings,
            ContextualAnalysis::Fallback(finding) => vec![finding],
        }
    }
}

const RECOMMENDATIONS: &[(&[&str], &str)] = &[
    (
        &["email", "phone"],
        "Replace direct contact details with generic support channels before sharing.",
    ),
    (
        &["ssn"],
        "Remove government identifiers; they should never leave the system of record.",
    ),
    (
        &["creditCard", "account", "currency", "financial"],
        "Financial data present: review PCI DSS and GDPR obligations before storing or sharing this content.",
    ),
    (
        &["ipAddress"],
        "Mask IP addresses; they count as personal data under GDPR.",
    ),
    (
        &["name", "address"],
        "Pseudonymize personal names and addresses, which are personal data under GDPR.",
    ),
    (
        &["medical"],
        "Health information present: apply HIPAA and GDPR special-category safeguards.",
    ),
    (
        &[FALLBACK_CATEGORY],
        "Contextual analysis was incomplete: perform a manual privacy review.",
    ),
];

fn recommendations_for(issues: &[RiskFinding]) -> Vec<String> {
    if issues.is_empty() {
        return vec!["No privacy issues detected.".to_string()];
    }

    let present: HashSet<&str> = issues.iter().map(|i| i.category.as_str()).collect();

    let mut out: Vec<String> = RECOMMENDATIONS
        .iter()
        .filter(|(categories, _)| categories.iter().any(|c| present.contains(c)))
        .map(|(_, text)| text.to_string())
        .collect();
    out.push("Run a secure rewrite to produce a privacy-safe version before sharing.".to_string());
    out
}

pub struct RiskScanner {
    detector: SpanDetector,
    backend: Arc<dyn TextGenerationBackend>,
    prompt_template: String,
    settings: ScanConfig,
    timeout: Duration,
}

impl RiskScanner {
    pub fn new(
        detector: SpanDetector,
        backend: Arc<dyn TextGenerationBackend>,
        prompt_template: String,
        settings: ScanConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            detector,
            backend,
            prompt_template,
            settings,
            timeout,
        }
    }

    pub async fn scan(&self, text: &str) -> RiskReport {
        let mut issues = self.pattern_findings(text);
        let pattern_count = issues.len();

        issues.extend(self.contextual_findings(text).await.into_findings());

        let report = RiskReport::from_issues(issues);
        info!(
            "Scan complete: {} pattern finding(s), {} contextual finding(s), overall risk {:?}",
            pattern_count,
            report.issues.len() - pattern_count,
            report.overall_risk
        );
        report
    }

    /// Layer 1: one finding per detected category. Names are left to the
    /// contextual layer, the heuristic is too noisy to report on its own.
    pub fn pattern_findings(&self, text: &str) -> Vec<RiskFinding> {
        let mut counts: BTreeMap<usize, (PiiCategory, usize)> = BTreeMap::new();
        for span in self.detector.detect_patterns(text) {
            let order = PiiCategory::ALL
                .iter()
                .position(|c| *c == span.category)
                .unwrap_or(usize::MAX);
            counts.entry(order).or_insert((span.category, 0)).1 += 1;
        }

        counts
            .into_values()
            .map(|(category, count)| RiskFinding {
                category: category.as_str().to_string(),
                severity: base_severity(category, count),
                description: describe(category, count),
                evidence_label: PATTERN_EVIDENCE.to_string(),
            })
            .collect()
    }

    /// Layer 2. Backend failures and undecodable answers degrade to a single
    /// fallback finding instead of an error.
    pub async fn contextual_findings(&self, text: &str) -> ContextualAnalysis {
        let request = GenerationRequest {
            system_instruction: SCAN_SYSTEM_INSTRUCTION.to_string(),
            user_instruction: PromptLoader::format_prompt(&self.prompt_template, text),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let decoded = generate_with_timeout(self.backend.as_ref(), &request, self.timeout)
            .await
            .and_then(|raw| decode_contextual_response(&raw));

        match decoded {
            Ok(findings) => {
                debug!("Contextual layer reported {} finding(s)", findings.len());
                ContextualAnalysis::Findings(findings)
            }
            Err(e) => {
                warn!("Contextual analysis unavailable, falling back: {}", e);
                ContextualAnalysis::Fallback(fallback_finding())
            }
        }
    }
}

fn base_severity(category: PiiCategory, count: usize) -> Severity {
    match category {
        PiiCategory::Ssn | PiiCategory::CreditCard => Severity::High,
        PiiCategory::Email | PiiCategory::Phone | PiiCategory::Account => Severity::Medium,
        PiiCategory::IpAddress if count > 1 => Severity::Medium,
        PiiCategory::IpAddress | PiiCategory::Currency | PiiCategory::Name => Severity::Low,
    }
}

fn describe(category: PiiCategory, count: usize) -> String {
    let (singular, plural) = match category {
        PiiCategory::Email => ("email address", "email addresses"),
        PiiCategory::Phone => ("phone number", "phone numbers"),
        PiiCategory::Ssn => ("Social Security number", "Social Security numbers"),
        PiiCategory::CreditCard => ("credit card number", "credit card numbers"),
        PiiCategory::IpAddress => ("IP address", "IP addresses"),
        PiiCategory::Account => ("account number", "account numbers"),
        PiiCategory::Currency => ("monetary amount", "monetary amounts"),
        PiiCategory::Name => ("personal name", "personal names"),
    };
    format!("{} {} detected", count, if count == 1 { singular } else { plural })
}

fn fallback_finding() -> RiskFinding {
    RiskFinding {
        category: FALLBACK_CATEGORY.to_string(),
        severity: Severity::Medium,
        description: "Contextual analysis unavailable; manual review required".to_string(),
        evidence_label: FALLBACK_EVIDENCE.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ContextualResponse {
    issues: Vec<ContextualIssue>,
}

#[derive(Debug, Deserialize)]
struct ContextualIssue {
    category: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    description: String,
}

const CONTEXTUAL_CATEGORIES: &[&str] = &["name", "address", "medical", "financial"];

pub fn decode_contextual_response(raw: &str) -> Result<Vec<RiskFinding>, PipelineError> {
    let json_str = extract_json_object(raw).ok_or_else(|| {
        PipelineError::MalformedBackendResponse(
            "no issues object in contextual analysis answer".to_string(),
        )
    })?;

    let response: ContextualResponse = serde_json::from_str(&json_str).map_err(|e| {
        PipelineError::MalformedBackendResponse(format!("unexpected answer shape: {}", e))
    })?;

    Ok(response
        .issues
        .into_iter()
        .map(|issue| {
            let normalized = issue.category.trim().to_ascii_lowercase();
            let category = if CONTEXTUAL_CATEGORIES.contains(&normalized.as_str()) {
                normalized
            } else {
                "other".to_string()
            };
            let description = match issue.description.trim() {
                "" => format!("Contextual {} information detected", category),
                d => d.to_string(),
            };

            RiskFinding {
                category,
                severity: Severity::parse_lenient(&issue.severity),
                description,
                evidence_label: CONTEXTUAL_EVIDENCE.to_string(),
            }
        })
        .collect())
}

/// First balanced `{...}` object in a model answer that has the `issues`
/// shape, tolerating surrounding prose (braces included) and the doubled
/// braces some templates provoke.
fn extract_json_object(response: &str) -> Option<String> {
    first_issues_object(response).or_else(|| {
        if response.contains("{{") {
            first_issues_object(&response.replace("{{", "{").replace("}}", "}"))
        } else {
            None
        }
    })
}

fn first_issues_object(text: &str) -> Option<String> {
    text.match_indices('{')
        .filter_map(|(start, _)| balanced_object_at(&text[start..]))
        .find(|candidate| serde_json::from_str::<ContextualResponse>(candidate).is_ok())
        .map(str::to_string)
}

/// The balanced object opening at the first byte of `text`, which is a `{`.
fn balanced_object_at(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[..=offset]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{CannedBackend, SlowBackend};
    use crate::config::DetectionConfig;

    fn scanner(backend: Arc<dyn TextGenerationBackend>) -> RiskScanner {
        RiskScanner::new(
            SpanDetector::new(&DetectionConfig::default()).unwrap(),
            backend,
            PromptLoader::builtin().to_string(),
            ScanConfig::default(),
            Duration::from_secs(5),
        )
    }

    fn finding(category: &str, severity: Severity) -> RiskFinding {
        RiskFinding {
            category: category.to_string(),
            severity,
            description: String::new(),
            evidence_label: String::new(),
        }
    }

    #[tokio::test]
    async fn test_contact_details_are_medium_risk() {
        let scanner = scanner(Arc::new(CannedBackend::answering(r#"{"issues": []}"#)));
        let report = scanner.scan("Contact John at john@example.com or 555-1234").await;

        let categories: Vec<_> = report.issues.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(categories, vec!["email", "phone"]);
        assert_eq!(report.issues[0].description, "1 email address detected");
        assert_eq!(report.overall_risk, Severity::Medium);
    }

    #[tokio::test]
    async fn test_clean_text_is_low_risk() {
        let scanner = scanner(Arc::new(CannedBackend::answering(r#"{"issues": []}"#)));
        let report = scanner.scan("The weather is nice today").await;

        assert!(report.issues.is_empty());
        assert_eq!(report.overall_risk, Severity::Low);
        assert_eq!(report.recommendations, vec!["No privacy issues detected."]);
    }

    #[tokio::test]
    async fn test_credit_card_is_high_risk() {
        let scanner = scanner(Arc::new(CannedBackend::answering(r#"{"issues": []}"#)));
        let report = scanner.scan("My credit card is 4532 1234 5678 9010").await;

        assert_eq!(report.overall_risk, Severity::High);
        assert!(report.recommendations.iter().any(|r| r.contains("PCI DSS")));
    }

    #[tokio::test]
    async fn test_ip_severity_depends_on_count() {
        let scanner = scanner(Arc::new(CannedBackend::answering(r#"{"issues": []}"#)));

        let one = scanner.pattern_findings("Host 10.0.0.1 is down");
        assert_eq!(one[0].severity, Severity::Low);

        let two = scanner.pattern_findings("Hosts 10.0.0.1 and 10.0.0.2 are down");
        assert_eq!(two[0].severity, Severity::Medium);
        assert_eq!(two[0].description, "2 IP addresses detected");
    }

    #[tokio::test]
    async fn test_names_not_reported_by_pattern_layer() {
        let scanner = scanner(Arc::new(CannedBackend::answering(r#"{"issues": []}"#)));
        assert!(scanner.pattern_findings("Sarah Johnson says hi").is_empty());
    }

    #[tokio::test]
    async fn test_contextual_findings_are_merged() {
        let answer = r#"Sure! Here is the analysis:
{"issues": [
  {"category": "Medical", "severity": "HIGH", "description": "Mentions a diagnosis"},
  {"category": "name", "severity": "medium", "description": ""}
]}"#;
        let backend = Arc::new(CannedBackend::answering(answer));
        let report = scanner(backend.clone())
            .scan("Sarah was diagnosed with asthma, email s@x.io")
            .await;

        let categories: Vec<_> = report.issues.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(categories, vec!["email", "medical", "name"]);
        assert_eq!(report.issues[1].severity, Severity::High);
        assert_eq!(report.issues[1].evidence_label, "contextual-analysis");
        assert_eq!(report.issues[2].description, "Contextual name information detected");
        assert_eq!(report.overall_risk, Severity::High);
        assert!(report.recommendations.iter().any(|r| r.contains("HIPAA")));

        let request = backend.last_request();
        assert!(request.user_instruction.contains("Sarah was diagnosed with asthma"));
        assert_eq!(request.temperature, 0.1);
    }

    #[tokio::test]
    async fn test_malformed_answer_falls_back() {
        let backend = CannedBackend::answering("I could not find anything sensitive.");
        let scanner = scanner(Arc::new(backend));
        let report = scanner.scan("Nothing to see here").await;

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].category, FALLBACK_CATEGORY);
        assert_eq!(report.issues[0].severity, Severity::Medium);
        assert!(report.issues[0].description.contains("manual review required"));
        assert!(report.recommendations.iter().any(|r| r.contains("manual privacy review")));
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back() {
        let scanner = scanner(Arc::new(CannedBackend::failing("connection refused")));
        let analysis = scanner.contextual_findings("anything").await;

        assert!(matches!(analysis, ContextualAnalysis::Fallback(_)));
    }

    #[tokio::test]
    async fn test_backend_timeout_falls_back() {
        let scanner = RiskScanner::new(
            SpanDetector::new(&DetectionConfig::default()).unwrap(),
            Arc::new(SlowBackend),
            PromptLoader::builtin().to_string(),
            ScanConfig::default(),
            Duration::from_millis(20),
        );

        let report = scanner.scan("SSN 123-45-6789").await;

        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].category, "ssn");
        assert_eq!(report.issues[1].category, FALLBACK_CATEGORY);
        assert_eq!(report.overall_risk, Severity::High);
    }

    #[test]
    fn test_overall_risk_is_maximum_severity() {
        let report = RiskReport::from_issues(vec![
            finding("currency", Severity::Low),
            finding("email", Severity::Medium),
        ]);
        assert_eq!(report.overall_risk, Severity::Medium);

        let report = RiskReport::from_issues(vec![]);
        assert_eq!(report.overall_risk, Severity::Low);
    }

    #[test]
    fn test_report_json_shape() {
        let report = RiskReport::from_issues(vec![RiskFinding {
            category: "email".to_string(),
            severity: Severity::Medium,
            description: "1 email address detected".to_string(),
            evidence_label: "pattern-detection".to_string(),
        }]);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["overallRisk"], "medium");
        assert_eq!(value["issues"][0]["evidenceLabel"], "pattern-detection");
        assert_eq!(value["issues"][0]["severity"], "medium");
        assert!(value["recommendations"].is_array());
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object(r#"Here: {"issues": []} done"#).as_deref(),
            Some(r#"{"issues": []}"#)
        );
        assert_eq!(
            extract_json_object(r#"{{"issues": []}}"#).as_deref(),
            Some(r#"{"issues": []}"#)
        );
        // Braces inside strings do not confuse the scanner
        let nested = r#"{"issues": [{"category": "other", "description": "uses } and {"}]}"#;
        assert_eq!(extract_json_object(nested).as_deref(), Some(nested));

        let nested_objects = r#"{"issues": [{"category": "name", "meta": {"source": "llm"}}]}"#;
        assert_eq!(extract_json_object(nested_objects).as_deref(), Some(nested_objects));

        // Prose braces ahead of the answer are skipped
        assert_eq!(
            extract_json_object(r#"Using template {text}: {"issues": []}"#).as_deref(),
            Some(r#"{"issues": []}"#)
        );
        // Objects without the issues shape are not taken for the answer
        assert_eq!(
            extract_json_object(r#"{"note": "see below"} {"issues": []}"#).as_deref(),
            Some(r#"{"issues": []}"#)
        );

        assert!(extract_json_object("No JSON here").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }

    #[tokio::test]
    async fn test_contextual_answer_after_braced_prose() {
        let scanner = scanner(Arc::new(CannedBackend::answering(
            r#"Using template {text}: {"issues": [{"category": "medical", "severity": "high", "description": "Diagnosis mentioned"}]}"#,
        )));

        let report = scanner.scan("She was treated for diabetes last spring").await;

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].category, "medical");
        assert_eq!(report.issues[0].severity, Severity::High);
        assert_eq!(report.overall_risk, Severity::High);
    }

    #[test]
    fn test_decode_requires_issues_field() {
        assert!(matches!(
            decode_contextual_response(r#"{"entities": []}"#),
            Err(PipelineError::MalformedBackendResponse(_))
        ));
        assert!(decode_contextual_response(r#"{"issues": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_contextual_category_becomes_other() {
        let findings = decode_contextual_response(
            r#"{"issues": [{"category": "biometric", "severity": "weird"}]}"#,
        )
        .unwrap();

        assert_eq!(findings[0].category, "other");
        assert_eq!(findings[0].severity, Severity::Medium);
    }
}
