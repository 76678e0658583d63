//! Request throttling.
//!
//! Two limiters coexist and do not interoperate:
//! - [`FixedWindowLimiter`]: an in-process fixed-window counter keyed
//!   by IP, used for generic throttling of all inspected traffic.
//! - [`AiEndpointLimiter`]: engine-backed per-IP counters with
//!   endpoint-specific ceilings for the AI routes, where a burst of
//!   model calls costs real money.
//!
//! The engine-backed limiter reads then increments in two separate
//! calls; concurrent bursts from one IP can under-count. Reads fail
//! open and increment failures are swallowed: throttling degrades to
//! permissive when the engine is unavailable.

use crate::config::AiLimitsConfig;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Engine tree holding the AI endpoint counters.
const RATE_TREE: &str = "ip-rate-limit";

/// Knobs for one fixed-window check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitOptions {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of one fixed-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub is_limited: bool,
    /// Requests left in the current window, saturating at zero.
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

#[derive(Debug)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// In-process fixed-window counter.
///
/// Owned by the server process and passed by reference wherever a
/// throttle decision is needed; tests instantiate isolated copies.
/// Counting never short-circuits: requests past the limit keep
/// incrementing the window counter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    entries: DashMap<String, WindowEntry>,
    idle_eviction: Duration,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::with_idle_eviction(Duration::from_secs(3600))
    }

    /// Entries untouched for longer than `idle_eviction` are dropped by
    /// [`sweep`](Self::sweep).
    pub fn with_idle_eviction(idle_eviction: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_eviction,
        }
    }

    /// Count one request against `key` and report the window state.
    pub fn check(&self, key: &str, opts: RateLimitOptions) -> RateLimitDecision {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                window_start: now,
                last_seen: now,
            });

        if now.duration_since(entry.window_start) >= opts.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        entry.last_seen = now;

        RateLimitDecision {
            is_limited: entry.count > opts.max_requests,
            remaining: opts.max_requests.saturating_sub(entry.count),
            reset_after: opts
                .window
                .saturating_sub(now.duration_since(entry.window_start)),
        }
    }

    /// Evict entries idle past the eviction horizon. Returns how many
    /// were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let horizon = self.idle_eviction;
        self.entries
            .retain(|_, entry| entry.last_seen.elapsed() <= horizon);
        before - self.entries.len()
    }

    /// Run [`sweep`](Self::sweep) on a fixed interval, bounding the
    /// map's memory independent of request traffic.
    pub fn spawn_sweeper(limiter: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, "rate limit sweep");
                }
            }
        })
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter record for one IP in the engine tree.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitRecord {
    request_count: u32,
    /// Unix seconds; a record past its ttl reads as count zero but is
    /// not deleted.
    ttl: i64,
}

/// Outcome of one AI endpoint check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiLimitDecision {
    /// The path is not an AI endpoint; no counting happened.
    NotApplicable,
    Allowed {
        remaining: u32,
    },
    Limited,
}

/// Engine-backed limiter for the AI endpoints.
///
/// Ceilings differ per endpoint prefix but share one per-IP counter
/// and one fixed window. Every increment writes a fresh ttl, so only a
/// full window of silence lets a counter expire.
pub struct AiEndpointLimiter {
    tree: sled::Tree,
    config: AiLimitsConfig,
}

impl AiEndpointLimiter {
    pub fn open(db: &sled::Db, config: AiLimitsConfig) -> Result<Self, sled::Error> {
        Ok(Self {
            tree: db.open_tree(RATE_TREE)?,
            config,
        })
    }

    fn ceiling_for(&self, path: &str) -> Option<u32> {
        if path.starts_with(&self.config.chat_prefix) {
            Some(self.config.chat_max_requests)
        } else if path.starts_with(&self.config.recommendations_prefix) {
            Some(self.config.recommendations_max_requests)
        } else {
            None
        }
    }

    /// Check and count one request from `ip` against the ceiling for
    /// `path`. Read and increment are two separate engine calls.
    pub fn check(&self, ip: &str, path: &str) -> AiLimitDecision {
        let Some(ceiling) = self.ceiling_for(path) else {
            return AiLimitDecision::NotApplicable;
        };

        // A failed read must not block legitimate traffic.
        let count = match self.read_count(ip) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, ip, "rate counter read failed, failing open");
                0
            }
        };

        if count >= ceiling {
            return AiLimitDecision::Limited;
        }

        self.increment(ip);
        AiLimitDecision::Allowed {
            remaining: ceiling.saturating_sub(count + 1),
        }
    }

    /// Point-get with a client-side expiry check; an expired record
    /// reads as zero and stays in place.
    fn read_count(&self, ip: &str) -> Result<u32, sled::Error> {
        let Some(raw) = self.tree.get(ip.as_bytes())? else {
            return Ok(0);
        };
        let now = chrono::Utc::now().timestamp();
        Ok(match serde_json::from_slice::<RateLimitRecord>(&raw) {
            Ok(record) if record.ttl > now => record.request_count,
            _ => 0,
        })
    }

    /// Upsert-with-default increment, writing a fresh ttl. Failures
    /// under-count and are swallowed.
    fn increment(&self, ip: &str) {
        let now = chrono::Utc::now().timestamp();
        let ttl = now + self.config.window_seconds;
        let result = self.tree.update_and_fetch(ip.as_bytes(), |old| {
            let count = old
                .and_then(|raw| serde_json::from_slice::<RateLimitRecord>(raw).ok())
                .map(|record| record.request_count)
                .unwrap_or(0);
            let record = RateLimitRecord {
                request_count: count + 1,
                ttl,
            };
            match serde_json::to_vec(&record) {
                Ok(value) => Some(value),
                Err(_) => old.map(|raw| raw.to_vec()),
            }
        });
        if let Err(e) = result {
            error!(error = %e, ip, "rate counter increment failed, skipping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window_limit_semantics() {
        let limiter = FixedWindowLimiter::new();
        let opts = RateLimitOptions {
            max_requests: 5,
            window: Duration::from_secs(60),
        };

        for i in 1..=5 {
            let decision = limiter.check("203.0.113.7", opts);
            assert!(!decision.is_limited, "request {i} is within the limit");
            assert_eq!(decision.remaining, 5 - i);
        }

        let sixth = limiter.check("203.0.113.7", opts);
        assert!(sixth.is_limited, "6th request in the window is limited");
        assert_eq!(sixth.remaining, 0);

        // Over-limit requests keep counting; they are not short-circuited.
        let seventh = limiter.check("203.0.113.7", opts);
        assert!(seventh.is_limited);
    }

    #[test]
    fn test_fixed_window_resets_after_window() {
        let limiter = FixedWindowLimiter::new();
        let opts = RateLimitOptions {
            max_requests: 5,
            window: Duration::from_millis(50),
        };

        for _ in 0..6 {
            limiter.check("198.51.100.4", opts);
        }
        assert!(limiter.check("198.51.100.4", opts).is_limited);

        std::thread::sleep(Duration::from_millis(60));

        let fresh = limiter.check("198.51.100.4", opts);
        assert!(!fresh.is_limited, "elapsed window starts a new count");
        assert_eq!(fresh.remaining, 4);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new();
        let opts = RateLimitOptions {
            max_requests: 1,
            window: Duration::from_secs(60),
        };

        assert!(!limiter.check("1.1.1.1", opts).is_limited);
        assert!(limiter.check("1.1.1.1", opts).is_limited);
        assert!(!limiter.check("2.2.2.2", opts).is_limited);
    }

    #[test]
    fn test_sweep_evicts_idle_entries() {
        let limiter = FixedWindowLimiter::with_idle_eviction(Duration::from_millis(20));
        limiter.check("1.1.1.1", RateLimitOptions::default());
        limiter.check("2.2.2.2", RateLimitOptions::default());

        assert_eq!(limiter.sweep(), 0, "fresh entries survive");

        std::thread::sleep(Duration::from_millis(30));
        limiter.check("2.2.2.2", RateLimitOptions::default());

        assert_eq!(limiter.sweep(), 1, "only the idle entry is evicted");
    }

    fn temp_ai_limiter(config: AiLimitsConfig) -> AiEndpointLimiter {
        let db = sled::Config::new().temporary(true).open().unwrap();
        AiEndpointLimiter::open(&db, config).unwrap()
    }

    #[test]
    fn test_ai_limiter_ignores_other_paths() {
        let limiter = temp_ai_limiter(AiLimitsConfig::default());
        assert_eq!(
            limiter.check("1.1.1.1", "/es/dashboard"),
            AiLimitDecision::NotApplicable
        );
    }

    #[test]
    fn test_ai_limiter_per_prefix_ceilings() {
        let config = AiLimitsConfig {
            chat_max_requests: 2,
            recommendations_max_requests: 3,
            ..Default::default()
        };
        let limiter = temp_ai_limiter(config.clone());

        let chat = config.chat_prefix.as_str();
        assert_eq!(
            limiter.check("1.1.1.1", chat),
            AiLimitDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check("1.1.1.1", chat),
            AiLimitDecision::Allowed { remaining: 0 }
        );
        assert_eq!(limiter.check("1.1.1.1", chat), AiLimitDecision::Limited);

        // The counter is shared per IP; the recommendations ceiling is
        // higher, so one more request still passes there.
        let recs = config.recommendations_prefix.as_str();
        assert_eq!(
            limiter.check("1.1.1.1", recs),
            AiLimitDecision::Allowed { remaining: 0 }
        );
        assert_eq!(limiter.check("1.1.1.1", recs), AiLimitDecision::Limited);
    }

    #[test]
    fn test_ai_limiter_expired_record_reads_as_zero() {
        let limiter = temp_ai_limiter(AiLimitsConfig::default());
        let stale = RateLimitRecord {
            request_count: 99,
            ttl: chrono::Utc::now().timestamp() - 10,
        };
        limiter
            .tree
            .insert("1.1.1.1", serde_json::to_vec(&stale).unwrap())
            .unwrap();

        match limiter.check("1.1.1.1", &AiLimitsConfig::default().chat_prefix) {
            AiLimitDecision::Allowed { .. } => {}
            other => panic!("expired counter must read as zero, got {other:?}"),
        }
    }
}
