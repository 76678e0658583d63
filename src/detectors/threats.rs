//! Threat detector.
//!
//! Runs seven independent checks over one request, all unconditionally:
//! path signatures, method check, IP-spoofing headers, forwarded-host
//! trust policy, cross-origin referer anomaly, path traversal, and a
//! composite risk score. Output is in check order and never
//! deduplicated; one request can carry threats from several checks.

use super::{SecurityThreat, Severity, ThreatKind};
use crate::context::RequestContext;
use regex::Regex;
use std::sync::LazyLock;

/// One entry of the path signature table.
struct PathSignature {
    sub_type: &'static str,
    severity: Severity,
    pattern: Regex,
    description: &'static str,
    action: &'static str,
}

static PATH_SIGNATURES: LazyLock<Vec<PathSignature>> = LazyLock::new(|| {
    let sig = |sub_type, severity, pattern: &str, description, action| PathSignature {
        sub_type,
        severity,
        pattern: Regex::new(pattern).unwrap(),
        description,
        action,
    };
    vec![
        sig(
            "wordpress",
            Severity::Medium,
            r"(?i)/wp-(?:admin|login|content|includes)|/xmlrpc\.php",
            "WordPress path probing on a non-WordPress application",
            "Monitor; repeated probes warrant an IP block",
        ),
        sig(
            "database-console",
            Severity::High,
            r"(?i)/(?:phpmyadmin|adminer|dbadmin|pma)(?:/|$)",
            "Database administration console probing",
            "Block source if repeated",
        ),
        sig(
            "config-probe",
            Severity::High,
            r"(?i)/\.(?:env|git|htaccess|aws|ssh|docker)|/(?:config|credentials|secrets)\.(?:php|json|ya?ml|xml|ini)",
            "Configuration or dotfile disclosure attempt",
            "Block source; verify no such file is served",
        ),
        sig(
            "shell-upload",
            Severity::High,
            r"(?i)(?:shell|backdoor|webshell|c99|r57|eval-stdin)\.(?:php|jsp|asp)",
            "Webshell or backdoor probing",
            "Block source",
        ),
        sig(
            "extension-probe",
            Severity::Low,
            r"(?i)\.(?:php|asp|aspx|jsp|cgi)$",
            "Server-side extension probing against a JS-rendered application",
            "Monitor",
        ),
        sig(
            "actuator",
            Severity::Medium,
            r"(?i)/(?:actuator|jolokia|jmx-console|web-console|manager/html)",
            "Framework management endpoint probing",
            "Monitor; block on repetition",
        ),
        sig(
            "api",
            Severity::Medium,
            r"(?i)^/api(?:/v\d+)?/(?:users?|admin|tokens?|keys?|secrets?|internal|debug)",
            "Sensitive API surface probing",
            "Verify endpoint authorization",
        ),
    ]
});

/// Methods the dashboard never uses from a browser.
const SUSPICIOUS_METHODS: [&str; 4] = ["PUT", "DELETE", "TRACE", "CONNECT"];

/// Headers only proxies or spoofing clients set.
const SPOOF_HEADERS: [&str; 4] = [
    "x-originating-ip",
    "x-remote-addr",
    "x-remote-ip",
    "x-client-ip",
];

static INJECTION_IN_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<script|['"<>]|\.\.|//"#).unwrap());

static TRAVERSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.\./|\.\.\\|\.\.%2f|\.\.%5c|%2e%2e%2f|%2e%2e%5c|%2e%2e/").unwrap()
});

static WP_RISK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/wp-|/xmlrpc\.php").unwrap());

static SQL_EXEC_IN_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:select|union|insert|drop|exec|eval|system|sleep|benchmark)").unwrap()
});

/// Score contributions for the composite risk check.
const RISK_WP_PATH: u32 = 20;
const RISK_SUSPICIOUS_METHOD: u32 = 15;
const RISK_MISSING_USER_AGENT: u32 = 25;
const RISK_SQL_KEYWORD: u32 = 30;
const RISK_THRESHOLD: u32 = 40;

/// Trust policy for the spoofable `x-forwarded-host` header.
#[derive(Debug, Clone)]
pub struct HostTrustPolicy {
    /// The canonical serving domain; subdomains of it are trusted.
    pub canonical_domain: String,
    /// Exact hosts always considered legitimate.
    pub allowed_hosts: Vec<String>,
    /// Infrastructure and development hosts (proxies, local dev).
    pub infra_hosts: Vec<String>,
    /// Known typosquats of the canonical domain.
    pub typosquat_hosts: Vec<String>,
}

impl Default for HostTrustPolicy {
    fn default() -> Self {
        Self {
            canonical_domain: "productos-ai.com".to_string(),
            allowed_hosts: vec![
                "productos-ai.com".to_string(),
                "www.productos-ai.com".to_string(),
            ],
            infra_hosts: vec![
                "localhost".to_string(),
                "localhost:3000".to_string(),
                "127.0.0.1".to_string(),
                "0.0.0.0".to_string(),
                "76.76.21.21".to_string(),
            ],
            typosquat_hosts: vec![
                "productos-ia.com".to_string(),
                "productos-ai.co".to_string(),
                "productosai.com".to_string(),
                "produtos-ai.com".to_string(),
            ],
        }
    }
}

impl HostTrustPolicy {
    /// Whether a forwarded host is trusted, given the actual Host header.
    fn is_legitimate(&self, forwarded: &str, original_host: &str) -> bool {
        let candidate = forwarded.trim().to_lowercase();
        let bare = candidate.split(':').next().unwrap_or(candidate.as_str());

        self.allowed_hosts
            .iter()
            .any(|h| h == &candidate || h.as_str() == bare)
            || bare == self.canonical_domain.as_str()
            || bare.ends_with(&format!(".{}", self.canonical_domain))
            || self
                .infra_hosts
                .iter()
                .any(|h| h == &candidate || h.as_str() == bare)
            || candidate == original_host.to_lowercase()
    }

    fn is_typosquat(&self, forwarded: &str) -> bool {
        let bare = forwarded
            .trim()
            .to_lowercase()
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        self.typosquat_hosts.iter().any(|h| h == &bare)
    }

    /// Whether a referer points at the canonical domain or a trusted host.
    fn is_canonical_referer(&self, referer: &str) -> bool {
        let host = referer
            .split("//")
            .nth(1)
            .unwrap_or(referer)
            .split('/')
            .next()
            .unwrap_or("");
        host.is_empty() || self.is_legitimate(host, host)
    }
}

/// Attack-surface detector over path, method, and headers.
#[derive(Debug, Default)]
pub struct ThreatDetector {
    policy: HostTrustPolicy,
}

impl ThreatDetector {
    pub fn new(policy: HostTrustPolicy) -> Self {
        Self { policy }
    }

    /// Run all checks over one request. Pure: no state, no failure path.
    pub fn detect(&self, ctx: &RequestContext) -> Vec<SecurityThreat> {
        let mut threats = Vec::new();

        self.check_path_signatures(ctx, &mut threats);
        self.check_method(ctx, &mut threats);
        self.check_spoof_headers(ctx, &mut threats);
        self.check_forwarded_host(ctx, &mut threats);
        self.check_referer(ctx, &mut threats);
        self.check_traversal(ctx, &mut threats);
        self.check_risk_score(ctx, &mut threats);

        threats
    }

    fn check_path_signatures(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        for sig in PATH_SIGNATURES.iter() {
            if let Some(m) = sig.pattern.find(&ctx.path) {
                threats.push(SecurityThreat {
                    kind: ThreatKind::Path,
                    sub_type: sig.sub_type.to_string(),
                    severity: sig.severity,
                    description: sig.description.to_string(),
                    evidence: m.as_str().to_string(),
                    suggested_action: sig.action.to_string(),
                });
            }
        }
    }

    fn check_method(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        if SUSPICIOUS_METHODS.contains(&ctx.method.as_str()) {
            threats.push(SecurityThreat {
                kind: ThreatKind::Method,
                sub_type: "suspicious-method".to_string(),
                severity: Severity::Medium,
                description: format!("{} is not used by the dashboard frontend", ctx.method),
                evidence: ctx.method.clone(),
                suggested_action: "Verify the endpoint accepts this method".to_string(),
            });
        }
    }

    fn check_spoof_headers(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        for header in SPOOF_HEADERS {
            if let Some(value) = ctx.header(header) {
                threats.push(SecurityThreat {
                    kind: ThreatKind::Header,
                    sub_type: "ip-spoofing".to_string(),
                    severity: Severity::Medium,
                    description: format!("Client-set IP header {header} present"),
                    evidence: format!("{header}: {value}"),
                    suggested_action: "Ignore the header; rely on the proxy chain".to_string(),
                });
            }
        }
    }

    /// Policy-driven validation of `x-forwarded-host`, not a blind
    /// blocklist: subdomains, infra hosts, and a value equal to the
    /// real Host are all legitimate.
    fn check_forwarded_host(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        let Some(forwarded) = ctx.header("x-forwarded-host") else {
            return;
        };
        if self.policy.is_legitimate(forwarded, &ctx.host) {
            return;
        }

        let (severity, description) = if self.policy.is_typosquat(forwarded) {
            (
                Severity::High,
                "x-forwarded-host is a typosquat of the canonical domain".to_string(),
            )
        } else if INJECTION_IN_HOST.is_match(forwarded) {
            (
                Severity::High,
                "x-forwarded-host carries an injection pattern".to_string(),
            )
        } else {
            (
                Severity::Medium,
                "x-forwarded-host is not a recognized host".to_string(),
            )
        };

        threats.push(SecurityThreat {
            kind: ThreatKind::Header,
            sub_type: "x-forwarded-host-suspicious".to_string(),
            severity,
            description,
            evidence: forwarded.to_string(),
            suggested_action: "Serve the canonical host; never reflect this value".to_string(),
        });
    }

    fn check_referer(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        let Some(referer) = ctx.header("referer") else {
            return;
        };
        if self.policy.is_canonical_referer(referer) {
            return;
        }
        if !is_sensitive_path(&ctx.path) {
            return;
        }

        threats.push(SecurityThreat {
            kind: ThreatKind::Anomaly,
            sub_type: "cross-origin-referer".to_string(),
            severity: Severity::Medium,
            description: "Cross-origin referer on a sensitive path".to_string(),
            evidence: referer.to_string(),
            suggested_action: "Confirm CSRF protections cover this route".to_string(),
        });
    }

    fn check_traversal(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        if let Some(m) = TRAVERSAL.find(&ctx.path) {
            threats.push(SecurityThreat {
                kind: ThreatKind::Path,
                sub_type: "traversal".to_string(),
                severity: Severity::Critical,
                description: "Path traversal sequence in request path".to_string(),
                evidence: m.as_str().to_string(),
                suggested_action: "Block source".to_string(),
            });
        }
    }

    /// Aggregate scoring across cheap signals; independent of the
    /// per-check threats above.
    fn check_risk_score(&self, ctx: &RequestContext, threats: &mut Vec<SecurityThreat>) {
        let mut score = 0u32;
        let mut factors = Vec::new();

        if WP_RISK.is_match(&ctx.path) {
            score += RISK_WP_PATH;
            factors.push("wordpress-path");
        }
        if SUSPICIOUS_METHODS.contains(&ctx.method.as_str()) {
            score += RISK_SUSPICIOUS_METHOD;
            factors.push("suspicious-method");
        }
        if ctx.user_agent().map_or(true, |ua| ua.is_empty()) {
            score += RISK_MISSING_USER_AGENT;
            factors.push("missing-user-agent");
        }
        if SQL_EXEC_IN_PATH.is_match(&ctx.path) {
            score += RISK_SQL_KEYWORD;
            factors.push("sql-keyword-in-path");
        }

        if score >= RISK_THRESHOLD {
            threats.push(SecurityThreat {
                kind: ThreatKind::Anomaly,
                sub_type: "risk-score".to_string(),
                severity: Severity::High,
                description: format!("Composite risk score {score} exceeds threshold"),
                evidence: factors.join(", "),
                suggested_action: "Review source activity; consider blocking".to_string(),
            });
        }
    }
}

fn is_sensitive_path(path: &str) -> bool {
    path.contains("/dashboard/")
        || path.contains("/admin/")
        || path.contains("/api/")
        || path.ends_with("/dashboard")
        || path.ends_with("/admin")
}
