//! Main request inspector.
//!
//! Wires the pipeline together: throttling, bot classification, threat
//! detection, and event logging, in that order. The inspector is
//! observational for everything except rate limits: threats are
//! recorded, not blocked, and blocking policy belongs to the caller.

use crate::config::SecurityConfig;
use crate::context::{self, RequestContext};
use crate::detectors::threats::HostTrustPolicy;
use crate::detectors::{BotClassifier, BotDetection, ThreatDetector};
use crate::event::{AuthInfo, SecurityEventInput, SecurityEventLogger, SecurityLog};
use crate::rate_limit::{
    AiEndpointLimiter, AiLimitDecision, FixedWindowLimiter, RateLimitOptions,
};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the caller should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    TooManyRequests,
}

/// Result of inspecting one request.
#[derive(Debug)]
pub struct InspectionOutcome {
    pub decision: Decision,
    /// The event recorded for this request; `None` when the pipeline
    /// was bypassed entirely.
    pub log: Option<SecurityLog>,
}

/// Per-request security inspection pipeline.
pub struct SecurityInspector {
    rate_options: RateLimitOptions,
    classifier: BotClassifier,
    detector: ThreatDetector,
    logger: SecurityEventLogger,
    limiter: Arc<FixedWindowLimiter>,
    ai_limiter: Option<AiEndpointLimiter>,
    /// Classification is deterministic per User-Agent, so results are
    /// cached by the raw header value.
    classification_cache: Cache<String, Vec<BotDetection>>,
}

impl SecurityInspector {
    pub fn new(
        config: &SecurityConfig,
        logger: SecurityEventLogger,
        limiter: Arc<FixedWindowLimiter>,
        ai_limiter: Option<AiEndpointLimiter>,
    ) -> Self {
        Self {
            rate_options: RateLimitOptions {
                max_requests: config.rate_limit.max_requests,
                window: Duration::from_secs(config.rate_limit.window_seconds),
            },
            classifier: BotClassifier::new(),
            detector: ThreatDetector::new(HostTrustPolicy::from(&config.host_policy)),
            logger,
            limiter,
            ai_limiter,
            classification_cache: Cache::builder()
                .max_capacity(config.cache.classification_cache_size)
                .time_to_live(Duration::from_secs(
                    config.cache.classification_cache_ttl_seconds,
                ))
                .build(),
        }
    }

    /// Inspect one request: throttle, classify, detect, log.
    pub fn inspect(&self, ctx: &RequestContext) -> InspectionOutcome {
        // Framework internals and static assets skip the pipeline.
        if context::is_system_path(&ctx.path) {
            return InspectionOutcome {
                decision: Decision::Allow,
                log: None,
            };
        }

        let throttle = self.limiter.check(&ctx.client_ip, self.rate_options);
        if throttle.is_limited {
            debug!(ip = %ctx.client_ip, "request throttled");
            let log = self.logger.log_rate_limit(ctx, "ip");
            return InspectionOutcome {
                decision: Decision::TooManyRequests,
                log: Some(log),
            };
        }

        if let Some(ai_limiter) = &self.ai_limiter {
            if ai_limiter.check(&ctx.client_ip, &ctx.path) == AiLimitDecision::Limited {
                debug!(ip = %ctx.client_ip, path = %ctx.path, "AI endpoint throttled");
                let log = self.logger.log_rate_limit(ctx, "ai-endpoint");
                return InspectionOutcome {
                    decision: Decision::TooManyRequests,
                    log: Some(log),
                };
            }
        }

        let bot_detections = self.classify_cached(ctx.user_agent().unwrap_or(""));
        debug!(
            detections = bot_detections.len(),
            "bot classification complete"
        );

        let security_threats = self.detector.detect(ctx);
        debug!(threats = security_threats.len(), "threat detection complete");

        let auth_info = AuthInfo {
            session_cookie_present: ctx.has_session_cookie(),
            refresh_cookie_present: ctx.has_refresh_cookie(),
        };

        let log = self.logger.log_event(
            ctx,
            SecurityEventInput {
                bot_detections,
                security_threats,
                auth_info: Some(auth_info),
                metadata: None,
            },
        );

        InspectionOutcome {
            decision: Decision::Allow,
            log: Some(log),
        }
    }

    fn classify_cached(&self, user_agent: &str) -> Vec<BotDetection> {
        if let Some(hit) = self.classification_cache.get(user_agent) {
            return hit;
        }
        let detections = self.classifier.classify(user_agent);
        self.classification_cache
            .insert(user_agent.to_string(), detections.clone());
        detections
    }
}
