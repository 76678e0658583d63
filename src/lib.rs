//! Security request-inspection layer for the productos dashboard
//!
//! Classifies client agents, detects known attack signatures, records
//! structured security events into a time-partitioned log store, and
//! throttles abusive traffic, all inline with request handling.
//!
//! # Features
//!
//! - User-Agent signature classification (search engines, crawlers,
//!   security tools, scanners, malicious clients)
//! - Attack-surface detection over paths, methods, and headers, with a
//!   composite risk score
//! - Structured security events with severity-derived levels, persisted
//!   through a bounded fire-and-forget queue
//! - Date-partitioned log store with IP, event-type, and level indexes
//!   plus time-range queries and per-day stats
//! - Fixed-window IP throttling and engine-backed AI endpoint limits
//!
//! # Example
//!
//! ```ignore
//! use productos_security::{SecurityConfig, SecurityEventLogger, SecurityInspector};
//! use productos_security::rate_limit::FixedWindowLimiter;
//! use std::sync::Arc;
//!
//! let config = SecurityConfig::default();
//! let inspector = SecurityInspector::new(
//!     &config,
//!     SecurityEventLogger::console_only(),
//!     Arc::new(FixedWindowLimiter::new()),
//!     None,
//! );
//! let outcome = inspector.inspect(&ctx);
//! ```

pub mod config;
pub mod context;
pub mod detectors;
pub mod event;
pub mod inspector;
pub mod middleware;
pub mod rate_limit;
pub mod store;

pub use config::SecurityConfig;
pub use context::RequestContext;
pub use detectors::{
    BotCategory, BotClassifier, BotDetection, SecurityThreat, Severity, ThreatDetector, ThreatKind,
};
pub use event::{EventType, LogLevel, SecurityEventInput, SecurityEventLogger, SecurityLog};
pub use inspector::{Decision, InspectionOutcome, SecurityInspector};
pub use rate_limit::{AiEndpointLimiter, FixedWindowLimiter};
pub use store::{QueryPage, SecurityLogStore, StoreError};
