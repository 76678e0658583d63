//! Request inspection detectors.
//!
//! Two independent, pure detection passes run per request:
//! - [`bots::BotClassifier`] matches the client User-Agent against an
//!   ordered signature table.
//! - [`threats::ThreatDetector`] matches path/method/headers against
//!   known attack-surface signatures.
//!
//! Both are total functions of the request: they never suspend, never
//! fail, and carry no state between calls.

pub mod bots;
pub mod threats;

pub use bots::BotClassifier;
pub use threats::ThreatDetector;

use serde::{Deserialize, Serialize};

/// Severity of a detected threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank used when reducing a threat list to a log level.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Which request attribute a threat was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatKind {
    Path,
    Method,
    Header,
    Query,
    Payload,
    Rate,
    Anomaly,
}

/// One match produced by the threat detector.
///
/// `evidence` always carries the offending substring or header value so
/// an operator can trace the match back to the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityThreat {
    #[serde(rename = "type")]
    pub kind: ThreatKind,
    pub sub_type: String,
    pub severity: Severity,
    pub description: String,
    pub evidence: String,
    pub suggested_action: String,
}

/// Bot category classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotCategory {
    /// Search engine crawler (Google, Bing, etc.)
    SearchEngine,
    /// Generic or SEO/content crawler
    Crawler,
    /// Social media link preview crawler
    SocialMedia,
    /// Security assessment tool
    SecurityTool,
    /// Port/service scanner
    Scanner,
    /// Known malicious client
    Malicious,
    /// Unclassified
    #[default]
    Unknown,
}

impl BotCategory {
    /// Categories that escalate a request to a warning even without
    /// any signature-level threat.
    pub fn is_hostile(&self) -> bool {
        matches!(
            self,
            BotCategory::SecurityTool | BotCategory::Malicious | BotCategory::Scanner
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BotCategory::SearchEngine => "search_engine",
            BotCategory::Crawler => "crawler",
            BotCategory::SocialMedia => "social_media",
            BotCategory::SecurityTool => "security_tool",
            BotCategory::Scanner => "scanner",
            BotCategory::Malicious => "malicious",
            BotCategory::Unknown => "unknown",
        }
    }
}

/// One match produced by the bot classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotDetection {
    /// Name of the matched signature (e.g. "GoogleBot", "Unknown Bot").
    pub name: String,
    pub category: BotCategory,
    /// Confidence in (0, 1]: 0.7 base, 0.9 with a captured version,
    /// 0.5 for generic matches.
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
