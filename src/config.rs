//! Configuration types for the security inspection layer.

use crate::detectors::threats::HostTrustPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the inspection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Trust policy for forwarded-host validation
    pub host_policy: HostPolicyConfig,

    /// Event logging and persistence
    pub logging: LoggingConfig,

    /// Generic per-IP throttling
    pub rate_limit: RateLimitConfig,

    /// AI endpoint throttling
    pub ai_limits: AiLimitsConfig,

    /// Classification cache settings
    pub cache: CacheConfig,

    /// Log store settings
    pub store: StoreConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            host_policy: HostPolicyConfig::default(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ai_limits: AiLimitsConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Which hosts the spoofable `x-forwarded-host` header may carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPolicyConfig {
    /// Canonical serving domain; subdomains are trusted
    pub canonical_domain: String,

    /// Exact hosts always considered legitimate
    pub allowed_hosts: Vec<String>,

    /// Infrastructure and local development hosts
    pub infra_hosts: Vec<String>,

    /// Known typosquats of the canonical domain
    pub typosquat_hosts: Vec<String>,
}

impl Default for HostPolicyConfig {
    fn default() -> Self {
        let policy = HostTrustPolicy::default();
        Self {
            canonical_domain: policy.canonical_domain,
            allowed_hosts: policy.allowed_hosts,
            infra_hosts: policy.infra_hosts,
            typosquat_hosts: policy.typosquat_hosts,
        }
    }
}

impl From<&HostPolicyConfig> for HostTrustPolicy {
    fn from(config: &HostPolicyConfig) -> Self {
        Self {
            canonical_domain: config.canonical_domain.clone(),
            allowed_hosts: config.allowed_hosts.clone(),
            infra_hosts: config.infra_hosts.clone(),
            typosquat_hosts: config.typosquat_hosts.clone(),
        }
    }
}

/// Event logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Persist events to the log store (console-only when false)
    pub persist_events: bool,

    /// Capacity of the background writer queue; events past it are dropped
    pub queue_capacity: usize,

    /// Days a persisted event lives before expiry
    pub retention_days: i64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            persist_events: false,
            queue_capacity: 1024,
            retention_days: 90,
        }
    }
}

/// Generic per-IP throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,

    /// Window length in seconds
    pub window_seconds: u64,

    /// How long an idle counter survives before the sweep drops it
    pub idle_eviction_seconds: u64,

    /// How often the sweep runs
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
            idle_eviction_seconds: 3600,
            sweep_interval_seconds: 3600,
        }
    }
}

/// AI endpoint throttling settings.
///
/// The two prefixes carry distinct ceilings within one shared window;
/// both count against the same per-IP record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiLimitsConfig {
    pub chat_prefix: String,
    pub chat_max_requests: u32,
    pub recommendations_prefix: String,
    pub recommendations_max_requests: u32,

    /// Fixed window length in seconds
    pub window_seconds: i64,
}

impl Default for AiLimitsConfig {
    fn default() -> Self {
        Self {
            chat_prefix: "/api/ai/chat".to_string(),
            chat_max_requests: 10,
            recommendations_prefix: "/api/ai/recommendations".to_string(),
            recommendations_max_requests: 20,
            window_seconds: 60,
        }
    }
}

/// User-Agent classification cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub classification_cache_size: u64,
    pub classification_cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            classification_cache_size: 10_000,
            classification_cache_ttl_seconds: 3600,
        }
    }
}

/// Log store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the embedded engine files
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("security-data"),
        }
    }
}
