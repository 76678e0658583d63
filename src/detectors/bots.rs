//! Bot classifier.
//!
//! Matches the client User-Agent against an ordered signature table:
//! search engines, social crawlers, security tools, scanners, malware
//! clients, SEO/content crawlers, then two catch-all heuristics. Every
//! matching entry yields one detection, so a request can legitimately
//! match both a specific tool and the generic catch-all. Match order
//! is semantic; the table must stay an ordered list.

use super::{BotCategory, BotDetection};
use regex::Regex;
use std::sync::LazyLock;

/// One entry of the signature table.
struct BotSignature {
    name: &'static str,
    category: BotCategory,
    /// Pattern; capture group 1, when present, is a version number.
    pattern: Regex,
    description: &'static str,
    /// Generic entries are pinned to 0.5 confidence regardless of the
    /// version capture.
    generic: bool,
}

impl BotSignature {
    fn new(
        name: &'static str,
        category: BotCategory,
        pattern: &str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            category,
            pattern: Regex::new(pattern).unwrap(),
            description,
            generic: false,
        }
    }

    fn generic(
        name: &'static str,
        category: BotCategory,
        pattern: &str,
        description: &'static str,
    ) -> Self {
        Self {
            generic: true,
            ..Self::new(name, category, pattern, description)
        }
    }
}

static SIGNATURES: LazyLock<Vec<BotSignature>> = LazyLock::new(|| {
    use BotCategory::*;
    vec![
        // Search engines
        BotSignature::new("GoogleBot", SearchEngine, r"(?i)googlebot(?:/([\d.]+))?", "Google search crawler"),
        BotSignature::new("BingBot", SearchEngine, r"(?i)bingbot(?:/([\d.]+))?", "Microsoft Bing crawler"),
        BotSignature::new("DuckDuckBot", SearchEngine, r"(?i)duckduckbot(?:/([\d.]+))?", "DuckDuckGo crawler"),
        BotSignature::new("YandexBot", SearchEngine, r"(?i)yandexbot(?:/([\d.]+))?", "Yandex search crawler"),
        BotSignature::new("Applebot", SearchEngine, r"(?i)applebot(?:/([\d.]+))?", "Apple search crawler"),
        // Social media preview crawlers
        BotSignature::new("FacebookBot", SocialMedia, r"(?i)(?:facebookexternalhit|facebot)(?:/([\d.]+))?", "Facebook link preview"),
        BotSignature::new("TwitterBot", SocialMedia, r"(?i)twitterbot(?:/([\d.]+))?", "Twitter/X card crawler"),
        BotSignature::new("LinkedInBot", SocialMedia, r"(?i)linkedinbot(?:/([\d.]+))?", "LinkedIn preview crawler"),
        BotSignature::new("TelegramBot", SocialMedia, r"(?i)telegrambot", "Telegram link preview"),
        BotSignature::new("WhatsApp", SocialMedia, r"(?i)whatsapp(?:/([\d.]+))?", "WhatsApp link preview"),
        // Security assessment tools
        BotSignature::new("Nikto", SecurityTool, r"(?i)nikto(?:/([\d.]+))?", "Web server vulnerability scanner"),
        BotSignature::new("Nessus", SecurityTool, r"(?i)nessus", "Vulnerability assessment tool"),
        BotSignature::new("WPScan", SecurityTool, r"(?i)wpscan(?:/([\d.]+))?", "WordPress security scanner"),
        BotSignature::new("Burp Suite", SecurityTool, r"(?i)burp", "Web security testing proxy"),
        BotSignature::new("Nuclei", SecurityTool, r"(?i)nuclei(?:/v?([\d.]+))?", "Template-based vulnerability scanner"),
        // Port and service scanners
        BotSignature::new("Nmap", Scanner, r"(?i)nmap", "Network mapper"),
        BotSignature::new("Masscan", Scanner, r"(?i)masscan(?:/([\d.]+))?", "Mass port scanner"),
        BotSignature::new("Zgrab", Scanner, r"(?i)zgrab", "Banner grabbing scanner"),
        BotSignature::new("CensysInspect", Scanner, r"(?i)censysinspect(?:/([\d.]+))?", "Censys internet scanner"),
        BotSignature::new("Expanse", Scanner, r"(?i)expanse", "Attack surface scanner"),
        // Malicious clients
        BotSignature::new("SQLMap", Malicious, r"(?i)sqlmap(?:/([\d.]+))?", "Automatic SQL injection tool"),
        BotSignature::new("Havij", Malicious, r"(?i)havij", "SQL injection tool"),
        BotSignature::new("Commix", Malicious, r"(?i)commix", "Command injection tool"),
        // SEO and content crawlers
        BotSignature::new("AhrefsBot", Crawler, r"(?i)ahrefsbot(?:/([\d.]+))?", "Ahrefs SEO crawler"),
        BotSignature::new("SemrushBot", Crawler, r"(?i)semrushbot(?:/([\d.]+))?", "Semrush SEO crawler"),
        BotSignature::new("MJ12Bot", Crawler, r"(?i)mj12bot(?:/v?([\d.]+))?", "Majestic SEO crawler"),
        BotSignature::new("DotBot", Crawler, r"(?i)dotbot(?:/([\d.]+))?", "Moz SEO crawler"),
        BotSignature::new("GPTBot", Crawler, r"(?i)gptbot(?:/([\d.]+))?", "OpenAI content crawler"),
        BotSignature::new("CCBot", Crawler, r"(?i)ccbot(?:/([\d.]+))?", "Common Crawl crawler"),
        // Generic catch-all; co-fires with specific entries on purpose
        BotSignature::generic("Unknown Bot", Unknown, r"(?i)(?:bot|crawler|spider|scraper)", "Generic bot indicator"),
        // Regional crawlers
        BotSignature::generic("Regional Crawler", Crawler, r"(?i)(?:baiduspider|sogou|360spider|petalbot)", "Regional search crawler"),
    ]
});

/// Browser-engine tokens a real browser User-Agent carries at least one of.
const ENGINE_TOKENS: [&str; 9] = [
    "mozilla",
    "applewebkit",
    "chrome",
    "safari",
    "firefox",
    "edg",
    "opera",
    "gecko",
    "trident",
];

/// Signature-table classifier for client User-Agents.
///
/// `classify` is a pure function of its input: identical strings yield
/// identical detection lists, and no input can make it fail.
#[derive(Debug, Default)]
pub struct BotClassifier;

impl BotClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a raw User-Agent header value (may be empty).
    ///
    /// Returns every signature match plus any anomaly flags, in table
    /// order. Overlapping matches are intentional and not deduplicated.
    pub fn classify(&self, user_agent: &str) -> Vec<BotDetection> {
        let mut detections = Vec::new();

        if !user_agent.is_empty() {
            for sig in SIGNATURES.iter() {
                let Some(caps) = sig.pattern.captures(user_agent) else {
                    continue;
                };

                let mut confidence = 0.7;
                if caps
                    .get(1)
                    .map(|m| is_version_number(m.as_str()))
                    .unwrap_or(false)
                {
                    confidence = 0.9;
                }
                // Generic entries win over the version bump.
                if sig.generic {
                    confidence = 0.5;
                }

                detections.push(BotDetection {
                    name: sig.name.to_string(),
                    category: sig.category,
                    confidence,
                    description: Some(sig.description.to_string()),
                });
            }
        }

        // Anomaly flags are additive, independent of signature matches.
        if user_agent.len() < 10 {
            detections.push(BotDetection {
                name: "Suspicious User-Agent".to_string(),
                category: BotCategory::Malicious,
                confidence: 0.6,
                description: Some("User-Agent shorter than any real browser sends".to_string()),
            });
        }

        if !user_agent.is_empty() && !has_engine_token(user_agent) {
            detections.push(BotDetection {
                name: "Non-Browser Client".to_string(),
                category: BotCategory::Malicious,
                confidence: 0.5,
                description: Some("No known browser engine token present".to_string()),
            });
        }

        detections
    }
}

fn has_engine_token(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    ENGINE_TOKENS.iter().any(|token| ua.contains(token))
}

/// True when a captured group looks like a dotted version number.
fn is_version_number(s: &str) -> bool {
    !s.is_empty()
        && s.split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
