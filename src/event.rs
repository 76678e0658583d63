//! Security event construction and logging.
//!
//! The logger combines classifier and detector output with request
//! metadata into one [`SecurityLog`] per inspected request, derives the
//! log level and event type, emits to the console, and (when a store is
//! attached) hands the log to a bounded background writer. Logging can
//! never fail a request: enqueue failures are logged and the event is
//! dropped.

use crate::context::RequestContext;
use crate::detectors::{BotDetection, SecurityThreat, Severity};
use crate::store::SecurityLogStore;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Headers captured into a log. Cookies and authorization headers are
/// deliberately absent.
const LOGGED_HEADERS: [&str; 8] = [
    "host",
    "user-agent",
    "referer",
    "origin",
    "accept",
    "accept-language",
    "accept-encoding",
    "x-requested-with",
];

/// Log level of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Map a threat severity onto the level scale.
    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Low => LogLevel::Info,
            Severity::Medium => LogLevel::Warn,
            Severity::High => LogLevel::Error,
            Severity::Critical => LogLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

/// What kind of event a log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Request,
    SecurityThreat,
    BotDetection,
    AuthFailure,
    RateLimit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Request => "request",
            EventType::SecurityThreat => "security_threat",
            EventType::BotDetection => "bot_detection",
            EventType::AuthFailure => "auth_failure",
            EventType::RateLimit => "rate_limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
    pub is_bot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_details: Option<Vec<BotDetection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub host: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityInfo {
    pub threats: Vec<SecurityThreat>,
    pub risk_level: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Auth-cookie presence flags. Values are never decoded or verified
/// here; only presence is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub session_cookie_present: bool,
    pub refresh_cookie_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// One structured security event; the unit of persistence.
///
/// Immutable after construction. Optional sections serialize only when
/// present, so the wire form never carries null placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLog {
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub level: LogLevel,
    pub event_type: EventType,
    pub client_info: ClientInfo,
    pub request_info: RequestInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_info: Option<SecurityInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<AuthInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_info: Option<PerformanceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Detection output and extras feeding one event.
#[derive(Debug, Default)]
pub struct SecurityEventInput {
    pub bot_detections: Vec<BotDetection>,
    pub security_threats: Vec<SecurityThreat>,
    pub auth_info: Option<AuthInfo>,
    pub metadata: Option<serde_json::Value>,
}

/// Derive event type and level; first matching rule wins.
fn derive_event(threats: &[SecurityThreat], bots: &[BotDetection]) -> (EventType, LogLevel) {
    if !threats.is_empty() {
        let max = threats
            .iter()
            .map(|t| t.severity)
            .max()
            .unwrap_or(Severity::Low);
        return (EventType::SecurityThreat, LogLevel::from_severity(max));
    }
    if bots.iter().any(|b| b.category.is_hostile()) {
        return (EventType::BotDetection, LogLevel::Warn);
    }
    if !bots.is_empty() {
        return (EventType::BotDetection, LogLevel::Info);
    }
    (EventType::Request, LogLevel::Info)
}

fn recommendation_for(severity: Severity) -> String {
    match severity {
        Severity::Critical => "Block the source immediately".to_string(),
        Severity::High => "Block the source if activity continues".to_string(),
        Severity::Medium => "Monitor the source".to_string(),
        Severity::Low => "No action required".to_string(),
    }
}

fn capture_headers(ctx: &RequestContext) -> Option<HashMap<String, String>> {
    let mut captured = HashMap::new();
    for name in LOGGED_HEADERS {
        if let Some(value) = ctx.header(name) {
            captured.insert(name.to_string(), value.to_string());
        }
    }
    (!captured.is_empty()).then_some(captured)
}

/// Assembles and dispatches security events.
///
/// Construction decides the persistence mode: `console_only` for
/// development, `with_store` for production. Either way `log_event`
/// is synchronous and infallible from the caller's point of view.
pub struct SecurityEventLogger {
    sink: Option<mpsc::Sender<SecurityLog>>,
}

impl SecurityEventLogger {
    /// Console emission only; nothing is persisted.
    pub fn console_only() -> Self {
        Self { sink: None }
    }

    /// Console emission plus persistence through a bounded queue.
    ///
    /// Returns the logger and the writer task handle. The writer owns
    /// the store; a slow or failing store can only ever drop events,
    /// never delay a request.
    pub fn with_store(
        store: Arc<SecurityLogStore>,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SecurityLog>(queue_capacity);
        let handle = tokio::spawn(async move {
            while let Some(log) = rx.recv().await {
                // Failures are already logged inside the store.
                let _ = store.save(&log);
            }
        });
        (Self { sink: Some(tx) }, handle)
    }

    /// Build, emit, and (if configured) enqueue one event.
    pub fn log_event(&self, ctx: &RequestContext, input: SecurityEventInput) -> SecurityLog {
        let SecurityEventInput {
            bot_detections,
            security_threats,
            auth_info,
            metadata,
        } = input;

        let (event_type, level) = derive_event(&security_threats, &bot_detections);

        let security_info = (!security_threats.is_empty()).then(|| {
            let risk_level = security_threats
                .iter()
                .map(|t| t.severity)
                .max()
                .unwrap_or(Severity::Low);
            SecurityInfo {
                threats: security_threats,
                risk_level,
                recommendation: Some(recommendation_for(risk_level)),
            }
        });

        let is_bot = !bot_detections.is_empty();
        let log = SecurityLog {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            event_type,
            client_info: ClientInfo {
                ip: ctx.client_ip.clone(),
                user_agent: ctx.user_agent().unwrap_or_default().to_string(),
                is_bot,
                bot_details: is_bot.then_some(bot_detections),
            },
            request_info: RequestInfo {
                method: ctx.method.clone(),
                path: ctx.path.clone(),
                host: ctx.host.clone(),
                protocol: ctx.protocol.clone(),
                query: ctx.query.clone(),
                headers: capture_headers(ctx),
            },
            security_info,
            auth_info,
            performance_info: None,
            metadata,
        };

        self.dispatch(&log);
        log
    }

    /// Record a throttled request. Rate-limit events bypass the
    /// derivation rules: their type and level are fixed.
    pub fn log_rate_limit(&self, ctx: &RequestContext, limiter: &str) -> SecurityLog {
        let log = SecurityLog {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: LogLevel::Warn,
            event_type: EventType::RateLimit,
            client_info: ClientInfo {
                ip: ctx.client_ip.clone(),
                user_agent: ctx.user_agent().unwrap_or_default().to_string(),
                is_bot: false,
                bot_details: None,
            },
            request_info: RequestInfo {
                method: ctx.method.clone(),
                path: ctx.path.clone(),
                host: ctx.host.clone(),
                protocol: ctx.protocol.clone(),
                query: ctx.query.clone(),
                headers: capture_headers(ctx),
            },
            security_info: None,
            auth_info: None,
            performance_info: None,
            metadata: Some(serde_json::json!({ "limiter": limiter })),
        };

        self.dispatch(&log);
        log
    }

    /// Console always; queue when persistence is attached. A full or
    /// closed queue drops the event after an error line.
    fn dispatch(&self, log: &SecurityLog) {
        self.emit_console(log);
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.try_send(log.clone()) {
                error!(error = %e, "security log queue rejected event, dropping");
            }
        }
    }

    fn emit_console(&self, log: &SecurityLog) {
        let threats = log
            .security_info
            .as_ref()
            .map(|s| s.threats.len())
            .unwrap_or(0);
        match log.level {
            LogLevel::Info => info!(
                ip = %log.client_info.ip,
                method = %log.request_info.method,
                path = %log.request_info.path,
                event = log.event_type.as_str(),
                "security event"
            ),
            LogLevel::Warn => warn!(
                ip = %log.client_info.ip,
                method = %log.request_info.method,
                path = %log.request_info.path,
                event = log.event_type.as_str(),
                threats,
                "security event"
            ),
            LogLevel::Error | LogLevel::Critical => error!(
                ip = %log.client_info.ip,
                method = %log.request_info.method,
                path = %log.request_info.path,
                event = log.event_type.as_str(),
                threats,
                level = log.level.as_str(),
                "security event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{BotCategory, ThreatKind};
    use std::collections::HashMap as Map;

    fn make_ctx(headers: Vec<(&str, &str)>) -> RequestContext {
        let mut map = Map::new();
        for (k, v) in headers {
            map.entry(k.to_string())
                .or_insert_with(Vec::new)
                .push(v.to_string());
        }
        RequestContext::from_parts("GET", "/es/dashboard", None, map)
    }

    fn threat(severity: Severity) -> SecurityThreat {
        SecurityThreat {
            kind: ThreatKind::Path,
            sub_type: "wordpress".to_string(),
            severity,
            description: "test".to_string(),
            evidence: "/wp-admin/".to_string(),
            suggested_action: "Monitor".to_string(),
        }
    }

    fn bot(category: BotCategory) -> BotDetection {
        BotDetection {
            name: "TestBot".to_string(),
            category,
            confidence: 0.7,
            description: None,
        }
    }

    #[test]
    fn test_threats_drive_event_type_and_level() {
        let (event, level) = derive_event(&[threat(Severity::Medium)], &[bot(BotCategory::Malicious)]);
        assert_eq!(event, EventType::SecurityThreat);
        assert_eq!(level, LogLevel::Warn);

        let (event, level) = derive_event(
            &[threat(Severity::Low), threat(Severity::Critical)],
            &[],
        );
        assert_eq!(event, EventType::SecurityThreat);
        assert_eq!(level, LogLevel::Critical);
    }

    #[test]
    fn test_hostile_bot_without_threats_is_warn() {
        let (event, level) = derive_event(&[], &[bot(BotCategory::Scanner)]);
        assert_eq!(event, EventType::BotDetection);
        assert_eq!(level, LogLevel::Warn);
    }

    #[test]
    fn test_benign_bot_is_info() {
        let (event, level) = derive_event(&[], &[bot(BotCategory::SearchEngine)]);
        assert_eq!(event, EventType::BotDetection);
        assert_eq!(level, LogLevel::Info);
    }

    #[test]
    fn test_plain_request_is_info() {
        let (event, level) = derive_event(&[], &[]);
        assert_eq!(event, EventType::Request);
        assert_eq!(level, LogLevel::Info);
    }

    #[test]
    fn test_level_never_critical_without_critical_threat() {
        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            let (_, level) = derive_event(&[threat(severity)], &[]);
            assert_ne!(level, LogLevel::Critical);
        }
    }

    #[test]
    fn test_header_capture_is_allow_listed() {
        let logger = SecurityEventLogger::console_only();
        let ctx = make_ctx(vec![
            ("host", "productos-ai.com"),
            ("user-agent", "Mozilla/5.0"),
            ("cookie", "productos_session=secret"),
            ("authorization", "Bearer secret"),
            ("x-custom", "whatever"),
        ]);

        let log = logger.log_event(&ctx, SecurityEventInput::default());
        let headers = log.request_info.headers.expect("some headers captured");

        assert!(headers.contains_key("host"));
        assert!(headers.contains_key("user-agent"));
        assert!(!headers.contains_key("cookie"), "cookies must never be captured");
        assert!(!headers.contains_key("authorization"));
        assert!(!headers.contains_key("x-custom"));
    }

    #[test]
    fn test_security_info_present_only_with_threats() {
        let logger = SecurityEventLogger::console_only();
        let ctx = make_ctx(vec![("user-agent", "Mozilla/5.0")]);

        let clean = logger.log_event(&ctx, SecurityEventInput::default());
        assert!(clean.security_info.is_none());
        assert_eq!(clean.event_type, EventType::Request);

        let flagged = logger.log_event(
            &ctx,
            SecurityEventInput {
                security_threats: vec![threat(Severity::High)],
                ..Default::default()
            },
        );
        let info = flagged.security_info.expect("threats present");
        assert_eq!(info.risk_level, Severity::High);
        assert_eq!(flagged.level, LogLevel::Error);
    }

    #[test]
    fn test_wire_form_omits_absent_sections() {
        let logger = SecurityEventLogger::console_only();
        let ctx = make_ctx(vec![("user-agent", "Mozilla/5.0")]);
        let log = logger.log_event(&ctx, SecurityEventInput::default());

        let json = serde_json::to_string(&log).unwrap();
        assert!(!json.contains("securityInfo"));
        assert!(!json.contains("authInfo"));
        assert!(!json.contains("botDetails"));
        assert!(json.contains("\"eventType\":\"request\""));
        assert!(json.contains("clientInfo"));
    }
}
