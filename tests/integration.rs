//! Integration tests for the security inspection layer.
//!
//! These tests exercise the public API end to end: classification,
//! threat detection, event derivation, the log store round trip, and
//! both rate limiters.

use productos_security::config::AiLimitsConfig;
use productos_security::detectors::threats::HostTrustPolicy;
use productos_security::rate_limit::{AiLimitDecision, RateLimitOptions};
use productos_security::{
    AiEndpointLimiter, BotCategory, BotClassifier, Decision, EventType, FixedWindowLimiter,
    LogLevel, RequestContext, SecurityConfig, SecurityEventLogger, SecurityInspector,
    SecurityLogStore, Severity, ThreatDetector,
};
use productos_security::event::SecurityEventInput;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn make_ctx(method: &str, path: &str, headers: Vec<(&str, &str)>) -> RequestContext {
    let mut map = HashMap::new();
    for (k, v) in headers {
        map.entry(k.to_string())
            .or_insert_with(Vec::new)
            .push(v.to_string());
    }
    RequestContext::from_parts(method, path, None, map)
}

fn temp_db() -> sled::Db {
    sled::Config::new().temporary(true).open().unwrap()
}

// =============================================================================
// Bot Classification
// =============================================================================

#[test]
fn test_known_signatures_yield_their_names() {
    let classifier = BotClassifier::new();
    let cases = [
        ("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)", "GoogleBot"),
        ("Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)", "BingBot"),
        ("facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)", "FacebookBot"),
        ("sqlmap/1.6#stable (https://sqlmap.org)", "SQLMap"),
        ("Mozilla/5.0 (compatible; AhrefsBot/7.0; +http://ahrefs.com/robot/)", "AhrefsBot"),
        ("Mozilla/5.0 (compatible; Nmap Scripting Engine; https://nmap.org/book/nse.html)", "Nmap"),
    ];

    for (ua, expected) in cases {
        let detections = classifier.classify(ua);
        assert!(
            detections.iter().any(|d| d.name == expected),
            "{ua:?} should match {expected}, got {detections:?}"
        );
    }
}

#[test]
fn test_short_identifier_always_carries_anomaly() {
    let classifier = BotClassifier::new();
    for ua in ["Bot", "a", "curl/8.0", ""] {
        if ua.len() >= 10 {
            continue;
        }
        let detections = classifier.classify(ua);
        assert!(
            detections
                .iter()
                .any(|d| d.name == "Suspicious User-Agent" && d.category == BotCategory::Malicious),
            "short UA {ua:?} must be flagged"
        );
    }
}

#[test]
fn test_classification_idempotent() {
    let classifier = BotClassifier::new();
    let ua = "Mozilla/5.0 (compatible; SemrushBot/7~bl; +http://www.semrush.com/bot.html)";
    assert_eq!(classifier.classify(ua), classifier.classify(ua));
}

// =============================================================================
// Threat Detection
// =============================================================================

#[test]
fn test_forwarded_host_equal_to_host_never_flagged() {
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    for host in ["productos-ai.com", "some-other-host.net", "10.0.0.5:8080"] {
        let threats = detector.detect(&make_ctx(
            "GET",
            "/",
            vec![
                ("host", host),
                ("x-forwarded-host", host),
                ("user-agent", "Mozilla/5.0 Chrome/126 Safari/537.36"),
            ],
        ));
        assert!(
            !threats.iter().any(|t| t.sub_type == "x-forwarded-host-suspicious"),
            "host {host:?}"
        );
    }
}

#[test]
fn test_typosquat_forwarded_host_is_high_for_any_host() {
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    for host in ["productos-ai.com", "localhost:3000", "whatever.example"] {
        let threats = detector.detect(&make_ctx(
            "GET",
            "/",
            vec![
                ("host", host),
                ("x-forwarded-host", "productos-ia.com"),
                ("user-agent", "Mozilla/5.0 Chrome/126 Safari/537.36"),
            ],
        ));
        let threat = threats
            .iter()
            .find(|t| t.sub_type == "x-forwarded-host-suspicious")
            .expect("typosquat must be flagged");
        assert_eq!(threat.severity, Severity::High);
    }
}

#[test]
fn test_traversal_exactly_one_critical_threat() {
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    let threats = detector.detect(&make_ctx(
        "GET",
        "/static/../../../etc/passwd",
        vec![("user-agent", "Mozilla/5.0 Chrome/126 Safari/537.36")],
    ));

    let traversal: Vec<_> = threats.iter().filter(|t| t.sub_type == "traversal").collect();
    assert_eq!(traversal.len(), 1);
    assert_eq!(traversal[0].severity, Severity::Critical);
}

#[test]
fn test_detection_idempotent() {
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    let ctx = make_ctx(
        "DELETE",
        "/wp-admin/shell.php",
        vec![("x-forwarded-host", "productos-ia.com"), ("x-client-ip", "1.2.3.4")],
    );
    assert_eq!(detector.detect(&ctx), detector.detect(&ctx));
}

// =============================================================================
// Event Derivation
// =============================================================================

#[test]
fn test_level_critical_iff_critical_threat() {
    let logger = SecurityEventLogger::console_only();
    let detector = ThreatDetector::new(HostTrustPolicy::default());

    // Traversal carries a critical threat.
    let ctx = make_ctx(
        "GET",
        "/files/../../etc/passwd",
        vec![("user-agent", "Mozilla/5.0 Chrome/126 Safari/537.36")],
    );
    let log = logger.log_event(
        &ctx,
        SecurityEventInput {
            security_threats: detector.detect(&ctx),
            ..Default::default()
        },
    );
    assert_eq!(log.level, LogLevel::Critical);

    // No threats: never critical, regardless of bot detections.
    let classifier = BotClassifier::new();
    let ctx = make_ctx("GET", "/es/board", vec![("user-agent", "sqlmap/1.6")]);
    let log = logger.log_event(
        &ctx,
        SecurityEventInput {
            bot_detections: classifier.classify("sqlmap/1.6"),
            ..Default::default()
        },
    );
    assert_ne!(log.level, LogLevel::Critical);
}

// =============================================================================
// End-to-End Scenarios
// =============================================================================

/// sqlmap probing an API route: the path threat outranks the hostile
/// bot category, so the event is a security_threat at warn.
#[test]
fn test_scenario_sqlmap_against_api() {
    let classifier = BotClassifier::new();
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    let logger = SecurityEventLogger::console_only();

    let ctx = make_ctx(
        "GET",
        "/api/v1/user",
        vec![("user-agent", "sqlmap/1.6"), ("x-forwarded-for", "203.0.113.7")],
    );

    let bots = classifier.classify(ctx.user_agent().unwrap());
    assert!(bots
        .iter()
        .any(|d| d.name == "SQLMap" && d.category == BotCategory::Malicious));

    let threats = detector.detect(&ctx);
    let api: Vec<_> = threats.iter().filter(|t| t.sub_type == "api").collect();
    assert_eq!(api.len(), 1);
    assert_eq!(api[0].severity, Severity::Medium);

    let log = logger.log_event(
        &ctx,
        SecurityEventInput {
            bot_detections: bots,
            security_threats: threats,
            ..Default::default()
        },
    );
    assert_eq!(log.event_type, EventType::SecurityThreat);
    assert_eq!(log.level, LogLevel::Warn);
    assert!(log.client_info.is_bot);
}

/// Empty User-Agent, WordPress path, PUT: the risk score reaches 60 and
/// adds a high anomaly next to the medium path and method threats.
#[test]
fn test_scenario_empty_ua_wordpress_put() {
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    let logger = SecurityEventLogger::console_only();

    let ctx = make_ctx("PUT", "/wp-admin/", vec![("x-forwarded-for", "203.0.113.7")]);
    let threats = detector.detect(&ctx);

    let wp = threats.iter().find(|t| t.sub_type == "wordpress").unwrap();
    assert_eq!(wp.severity, Severity::Medium);
    let method = threats.iter().find(|t| t.sub_type == "suspicious-method").unwrap();
    assert_eq!(method.severity, Severity::Medium);
    let risk = threats.iter().find(|t| t.sub_type == "risk-score").unwrap();
    assert_eq!(risk.severity, Severity::High);
    assert!(risk.description.contains("60"));

    let log = logger.log_event(
        &ctx,
        SecurityEventInput {
            security_threats: threats,
            ..Default::default()
        },
    );
    assert_eq!(log.event_type, EventType::SecurityThreat);
    assert_eq!(log.level, LogLevel::Error);
}

// =============================================================================
// Store Round Trip
// =============================================================================

#[tokio::test]
async fn test_persisted_log_round_trips_through_date_query() {
    let db = temp_db();
    let store = Arc::new(SecurityLogStore::open(&db, 90).unwrap());
    let (logger, writer) = SecurityEventLogger::with_store(Arc::clone(&store), 16);

    let classifier = BotClassifier::new();
    let detector = ThreatDetector::new(HostTrustPolicy::default());
    let ctx = make_ctx(
        "GET",
        "/wp-admin/",
        vec![
            ("user-agent", "Mozilla/5.0 (compatible; Googlebot/2.1)"),
            ("x-forwarded-for", "203.0.113.7"),
        ],
    );

    let log = logger.log_event(
        &ctx,
        SecurityEventInput {
            bot_detections: classifier.classify(ctx.user_agent().unwrap()),
            security_threats: detector.detect(&ctx),
            ..Default::default()
        },
    );

    // Close the queue and let the writer drain it.
    drop(logger);
    writer.await.unwrap();

    let date = &log.timestamp[..10];
    let page = store.query_by_date(date, 10, None).unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.items[0].log_data, log, "stored payload deep-equals the original");
    assert_eq!(page.items[0].ip, "203.0.113.7");

    let by_ip = store.query_by_ip("203.0.113.7", 10, None).unwrap();
    assert_eq!(by_ip.count, 1);
    let by_event = store
        .query_by_event_type(EventType::SecurityThreat, None, 10, None)
        .unwrap();
    assert_eq!(by_event.count, 1);
    let by_level = store.query_by_level(log.level, 10, None).unwrap();
    assert_eq!(by_level.count, 1);
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[test]
fn test_fixed_window_spec_semantics() {
    let limiter = FixedWindowLimiter::new();
    let opts = RateLimitOptions {
        max_requests: 5,
        window: Duration::from_millis(80),
    };

    for _ in 0..5 {
        assert!(!limiter.check("key", opts).is_limited);
    }
    assert!(limiter.check("key", opts).is_limited, "6th call in the window");

    std::thread::sleep(Duration::from_millis(100));
    let fresh = limiter.check("key", opts);
    assert!(!fresh.is_limited);
    assert_eq!(fresh.remaining, 4, "reset window starts at max - 1");
}

#[test]
fn test_ai_limiter_distinct_ceilings_and_fail_open_shape() {
    let db = temp_db();
    let config = AiLimitsConfig {
        chat_max_requests: 1,
        recommendations_max_requests: 2,
        ..Default::default()
    };
    let limiter = AiEndpointLimiter::open(&db, config.clone()).unwrap();

    assert!(matches!(
        limiter.check("9.9.9.9", &config.chat_prefix),
        AiLimitDecision::Allowed { .. }
    ));
    assert_eq!(
        limiter.check("9.9.9.9", &config.chat_prefix),
        AiLimitDecision::Limited
    );
    // Shared counter, higher ceiling: recommendations still passes once.
    assert!(matches!(
        limiter.check("9.9.9.9", &config.recommendations_prefix),
        AiLimitDecision::Allowed { .. }
    ));
    // Unrelated paths never count.
    assert_eq!(
        limiter.check("9.9.9.9", "/es/dashboard"),
        AiLimitDecision::NotApplicable
    );
}

// =============================================================================
// Full Pipeline
// =============================================================================

#[tokio::test]
async fn test_inspector_full_pipeline_with_persistence() {
    let db = temp_db();
    let config = SecurityConfig::default();
    let store = Arc::new(SecurityLogStore::open(&db, config.logging.retention_days).unwrap());
    let (logger, _writer) = SecurityEventLogger::with_store(Arc::clone(&store), 64);
    let ai_limiter = AiEndpointLimiter::open(&db, config.ai_limits.clone()).unwrap();
    let inspector = SecurityInspector::new(
        &config,
        logger,
        Arc::new(FixedWindowLimiter::new()),
        Some(ai_limiter),
    );

    let ctx = make_ctx(
        "GET",
        "/wp-admin/",
        vec![
            ("user-agent", "sqlmap/1.6"),
            ("x-forwarded-for", "203.0.113.7"),
            ("host", "productos-ai.com"),
        ],
    );

    let outcome = inspector.inspect(&ctx);
    assert_eq!(outcome.decision, Decision::Allow, "inspection never blocks on threats");

    let log = outcome.log.expect("inspected requests are logged");
    assert_eq!(log.event_type, EventType::SecurityThreat);
    assert!(log.client_info.is_bot);
    let info = log.security_info.as_ref().unwrap();
    assert!(info.threats.iter().any(|t| t.sub_type == "wordpress"));

    // Give the background writer a moment to drain the queue.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let date = &log.timestamp[..10];
    let page = store.query_by_date(date, 10, None).unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.items[0].log_data, log);

    let stats = store.stats_by_date(date).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.unique_ips, 1);
    assert_eq!(stats.by_event_type.get("security_threat"), Some(&1));
}
