//! Time-partitioned security log store.
//!
//! One logical table (`logs_front`) over an embedded ordered key-value
//! engine. Every write lands the full record under four key layouts
//! (date-partitioned primary plus IP, event-type, and level indexes),
//! so each of the four read paths is a single prefix scan with no
//! secondary lookup. Records expire 90 days after creation: reads skip
//! expired entries, `purge_expired` physically removes them.
//!
//! Unlike the event logger, the store never swallows a failure: every
//! method logs the error and returns it, and callers decide resilience.

use crate::event::{EventType, LogLevel, SecurityLog};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::error;

/// Primary tree: date partition, chronological sort.
const PRIMARY_TREE: &str = "logs_front";
/// Secondary index by client IP.
const IP_INDEX_TREE: &str = "ip-index";
/// Secondary index by event type.
const EVENT_INDEX_TREE: &str = "eventType-index";
/// Secondary index by log level.
const LEVEL_INDEX_TREE: &str = "level-index";

/// Partition and sort key are joined with this byte. It never occurs
/// inside a partition label, so prefix scans cannot bleed into a
/// neighboring partition.
const KEY_SEPARATOR: char = '|';

/// The engine writes at most this many records per batch chunk.
const MAX_BATCH: usize = 25;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage engine error: {0}")]
    Engine(#[from] sled::Error),
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("malformed timestamp in log: {0}")]
    Timestamp(String),
}

/// The persisted projection of a [`SecurityLog`], carrying all key
/// layouts redundantly alongside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredLog {
    pub date_partition: String,
    pub timeline_sort: String,
    pub ip_partition: String,
    pub ip_timestamp: String,
    pub event_partition: String,
    pub event_timestamp: String,
    pub level_partition: String,
    pub level_timestamp: String,
    /// Creation time, unix seconds.
    pub timestamp: i64,
    pub formatted_date: String,
    /// Expiry time, unix seconds.
    pub ttl: i64,
    pub level: LogLevel,
    pub event_type: EventType,
    pub ip: String,
    pub log_data: SecurityLog,
}

impl StoredLog {
    fn build(log: &SecurityLog, retention_days: i64) -> Result<Self, StoreError> {
        let created = chrono::DateTime::parse_from_rfc3339(&log.timestamp)
            .map_err(|_| StoreError::Timestamp(log.timestamp.clone()))?
            .with_timezone(&Utc);

        let ts = &log.timestamp;
        let ip = &log.client_info.ip;
        let event = log.event_type.as_str();
        let level = log.level.as_str();
        let date = created.format("%Y-%m-%d").to_string();

        Ok(Self {
            date_partition: format!("DATE#{date}"),
            timeline_sort: format!("TIME#{ts}#{ip}#{event}#{level}"),
            ip_partition: format!("IP#{ip}"),
            ip_timestamp: format!("TIME#{ts}"),
            event_partition: format!("EVENT#{event}"),
            event_timestamp: format!("TIME#{ts}#{level}"),
            level_partition: format!("LEVEL#{level}"),
            level_timestamp: format!("TIME#{ts}#{ip}"),
            timestamp: created.timestamp(),
            formatted_date: date,
            ttl: created.timestamp() + retention_days * 86_400,
            level: log.level,
            event_type: log.event_type,
            ip: ip.clone(),
            log_data: log.clone(),
        })
    }

    fn is_expired(&self, now: i64) -> bool {
        self.ttl <= now
    }
}

/// One page of query results, most recent first.
#[derive(Debug)]
pub struct QueryPage {
    pub items: Vec<StoredLog>,
    /// Cursor for the next page; `None` when the scan is exhausted.
    pub last_evaluated_key: Option<String>,
    /// Number of records scanned into this page. For level-filtered
    /// event-type queries this is the pre-filter page size, not
    /// `items.len()`.
    pub count: usize,
}

/// Aggregate over one date partition.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total: usize,
    pub by_level: HashMap<String, usize>,
    pub by_event_type: HashMap<String, usize>,
    pub unique_ips: usize,
}

/// Append-only writer and four read paths over the log table.
pub struct SecurityLogStore {
    primary: sled::Tree,
    ip_index: sled::Tree,
    event_index: sled::Tree,
    level_index: sled::Tree,
    retention_days: i64,
}

impl SecurityLogStore {
    /// Open the log trees on an existing engine handle.
    pub fn open(db: &sled::Db, retention_days: i64) -> Result<Self, StoreError> {
        Ok(Self {
            primary: db.open_tree(PRIMARY_TREE)?,
            ip_index: db.open_tree(IP_INDEX_TREE)?,
            event_index: db.open_tree(EVENT_INDEX_TREE)?,
            level_index: db.open_tree(LEVEL_INDEX_TREE)?,
            retention_days,
        })
    }

    /// Persist one log under all key layouts. One write is one record;
    /// there are no upsert semantics.
    pub fn save(&self, log: &SecurityLog) -> Result<(), StoreError> {
        self.save_inner(log).map_err(|e| {
            error!(error = %e, "failed to save security log");
            e
        })
    }

    fn save_inner(&self, log: &SecurityLog) -> Result<(), StoreError> {
        let record = StoredLog::build(log, self.retention_days)?;
        let value = serde_json::to_vec(&record)?;

        self.primary.insert(
            join_key(&record.date_partition, &record.timeline_sort),
            value.clone(),
        )?;
        self.ip_index.insert(
            join_key(&record.ip_partition, &record.ip_timestamp),
            value.clone(),
        )?;
        self.event_index.insert(
            join_key(&record.event_partition, &record.event_timestamp),
            value.clone(),
        )?;
        self.level_index.insert(
            join_key(&record.level_partition, &record.level_timestamp),
            value,
        )?;
        Ok(())
    }

    /// Persist many logs in engine-sized chunks, sequentially. The
    /// first failing chunk aborts the remainder and propagates.
    pub fn save_batch(&self, logs: &[SecurityLog]) -> Result<usize, StoreError> {
        let mut written = 0;
        for chunk in logs.chunks(MAX_BATCH) {
            for log in chunk {
                self.save_inner(log).map_err(|e| {
                    error!(error = %e, written, "batch save aborted");
                    e
                })?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Logs for one calendar date (`YYYY-MM-DD`), most recent first.
    pub fn query_by_date(
        &self,
        date: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        self.scan_partition(&self.primary, &format!("DATE#{date}"), limit, cursor)
    }

    /// Logs from one client IP, across dates.
    pub fn query_by_ip(
        &self,
        ip: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        self.scan_partition(&self.ip_index, &format!("IP#{ip}"), limit, cursor)
    }

    /// Logs of one event type, optionally post-filtered by level.
    ///
    /// The level filter is applied after the page is scanned: `count`
    /// and the pagination cursor advance over the unfiltered index, so
    /// a filtered page may hold fewer items than `count`.
    pub fn query_by_event_type(
        &self,
        event_type: EventType,
        level: Option<LogLevel>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let mut page = self.scan_partition(
            &self.event_index,
            &format!("EVENT#{}", event_type.as_str()),
            limit,
            cursor,
        )?;
        if let Some(level) = level {
            page.items.retain(|r| r.level == level);
        }
        Ok(page)
    }

    /// Logs at one severity level, across dates.
    pub fn query_by_level(
        &self,
        level: LogLevel,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        self.scan_partition(
            &self.level_index,
            &format!("LEVEL#{}", level.as_str()),
            limit,
            cursor,
        )
    }

    /// Logs within an inclusive RFC 3339 timestamp range, scoped to one
    /// date partition. The range never spans dates in a single call.
    pub fn query_by_time_range(
        &self,
        date: &str,
        start: &str,
        end: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let partition = format!("DATE#{date}");
        let lower = format!("{partition}{KEY_SEPARATOR}TIME#{start}").into_bytes();
        // The sort key continues past the timestamp with `#ip#...`, so
        // bumping the end bound past '#' keeps the range inclusive.
        let mut range_upper = format!("{partition}{KEY_SEPARATOR}TIME#{end}").into_bytes();
        range_upper.push(0xff);
        let upper = match cursor {
            Some(c) => c.as_bytes().to_vec().min(range_upper),
            None => range_upper,
        };

        self.scan_range(&self.primary, lower, upper, limit)
            .map_err(|e| {
                error!(error = %e, date, "time range query failed");
                e
            })
    }

    /// Full scan of one date partition reduced to counts. Cost is
    /// proportional to the partition size; callers bound their date
    /// ranges accordingly.
    pub fn stats_by_date(&self, date: &str) -> Result<LogStats, StoreError> {
        let result = (|| {
            let prefix = format!("DATE#{date}{KEY_SEPARATOR}");
            let now = Utc::now().timestamp();
            let mut stats = LogStats::default();
            let mut ips = HashSet::new();

            for entry in self.primary.scan_prefix(prefix.as_bytes()) {
                let (_, value) = entry?;
                let record: StoredLog = serde_json::from_slice(&value)?;
                if record.is_expired(now) {
                    continue;
                }
                stats.total += 1;
                *stats
                    .by_level
                    .entry(record.level.as_str().to_string())
                    .or_insert(0) += 1;
                *stats
                    .by_event_type
                    .entry(record.event_type.as_str().to_string())
                    .or_insert(0) += 1;
                ips.insert(record.ip);
            }

            stats.unique_ips = ips.len();
            Ok(stats)
        })();
        result.map_err(|e: StoreError| {
            error!(error = %e, date, "stats query failed");
            e
        })
    }

    /// Physically remove every expired record. Returns how many entries
    /// were deleted across all trees.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let result = (|| {
            let now = Utc::now().timestamp();
            let mut removed = 0;
            for tree in [
                &self.primary,
                &self.ip_index,
                &self.event_index,
                &self.level_index,
            ] {
                let mut stale = Vec::new();
                for entry in tree.iter() {
                    let (key, value) = entry?;
                    let record: StoredLog = serde_json::from_slice(&value)?;
                    if record.is_expired(now) {
                        stale.push(key);
                    }
                }
                for key in stale {
                    tree.remove(key)?;
                    removed += 1;
                }
            }
            Ok(removed)
        })();
        result.map_err(|e: StoreError| {
            error!(error = %e, "expiry purge failed");
            e
        })
    }

    fn scan_partition(
        &self,
        tree: &sled::Tree,
        partition: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let lower = format!("{partition}{KEY_SEPARATOR}").into_bytes();
        let upper = match cursor {
            Some(c) => c.as_bytes().to_vec(),
            None => {
                let mut u = lower.clone();
                u.push(0xff);
                u
            }
        };

        self.scan_range(tree, lower, upper, limit).map_err(|e| {
            error!(error = %e, partition, "partition query failed");
            e
        })
    }

    /// Reverse-ordered scan of `[lower, upper)`, newest key first.
    fn scan_range(
        &self,
        tree: &sled::Tree,
        lower: Vec<u8>,
        upper: Vec<u8>,
        limit: usize,
    ) -> Result<QueryPage, StoreError> {
        let now = Utc::now().timestamp();
        let mut items = Vec::new();
        let mut last_key = None;

        for entry in tree.range(lower..upper).rev() {
            let (key, value) = entry?;
            let record: StoredLog = serde_json::from_slice(&value)?;
            last_key = Some(String::from_utf8_lossy(&key).to_string());
            if record.is_expired(now) {
                continue;
            }
            items.push(record);
            if items.len() >= limit {
                break;
            }
        }

        let count = items.len();
        let last_evaluated_key = (count >= limit).then_some(last_key).flatten();
        Ok(QueryPage {
            items,
            last_evaluated_key,
            count,
        })
    }
}

fn join_key(partition: &str, sort: &str) -> Vec<u8> {
    format!("{partition}{KEY_SEPARATOR}{sort}").into_bytes()
}
