//! Minute and per-service aggregation of normalized records.

use super::normalize::{LogRecord, SeverityClass};
use chrono::{DateTime, Timelike, Utc};
use std::collections::{BTreeMap, HashMap};

/// Counters for one minute of logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeBucket {
    pub total: u64,
    pub error_count: u64,
    pub warning_count: u64,
}

impl TimeBucket {
    /// Fraction of records at error level. An empty bucket has rate 0.
    pub fn error_rate(&self) -> f64 {
        self.error_count as f64 / self.total.max(1) as f64
    }
}

/// Counters for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceBucket {
    pub total: u64,
    pub error_count: u64,
}

/// Truncate a timestamp to the start of its minute.
pub fn minute_key(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Time and service aggregates for one batch.
#[derive(Debug, Default)]
pub struct Buckets {
    time: BTreeMap<DateTime<Utc>, TimeBucket>,
    services: Vec<(String, ServiceBucket)>,
    service_index: HashMap<String, usize>,
}

impl Buckets {
    pub fn aggregate<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        let mut buckets = Self::default();
        for record in records {
            buckets.add(record);
        }
        buckets
    }

    pub fn add(&mut self, record: &LogRecord) {
        let time = self.time.entry(minute_key(record.timestamp)).or_default();
        time.total += 1;

        let idx = match self.service_index.get(&record.service) {
            Some(&idx) => idx,
            None => {
                self.services
                    .push((record.service.clone(), ServiceBucket::default()));
                self.service_index
                    .insert(record.service.clone(), self.services.len() - 1);
                self.services.len() - 1
            }
        };
        let service = &mut self.services[idx].1;
        service.total += 1;

        match record.class {
            SeverityClass::Error => {
                time.error_count += 1;
                service.error_count += 1;
            }
            SeverityClass::Warning => time.warning_count += 1,
            SeverityClass::Other => {}
        }
    }

    pub fn time_len(&self) -> usize {
        self.time.len()
    }

    pub fn service_len(&self) -> usize {
        self.services.len()
    }

    /// Minute buckets in ascending time order.
    pub fn ordered_time_buckets(&self) -> Vec<(DateTime<Utc>, TimeBucket)> {
        self.time.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Service buckets in first-seen order.
    pub fn services(&self) -> &[(String, ServiceBucket)] {
        &self.services
    }
}
