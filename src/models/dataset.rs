use crate::models::record::{normalize_symbol, Record, RecordKey};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Inclusive time window a run is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `end`.
    pub fn last_days(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - ChronoDuration::days(i64::from(days)),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Ordered records of one run.
///
/// Records are unique by (symbol, timestamp, source) and sorted in that
/// order, so each symbol's records form one contiguous slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    run_id: String,
    created_at: DateTime<Utc>,
    symbols: Vec<String>,
    window: TimeWindow,
    records: Vec<Record>,
    // 索引用于快速查找
    symbol_index: BTreeMap<String, Range<usize>>,
}

impl Dataset {
    /// Build a dataset, dropping records outside the window or for symbols
    /// that were not requested. Later duplicates replace earlier ones.
    pub fn new(
        run_id: &str,
        created_at: DateTime<Utc>,
        symbols: &[String],
        window: TimeWindow,
        records: Vec<Record>,
    ) -> Self {
        let mut requested: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            if !symbol.is_empty() && !requested.contains(&symbol) {
                requested.push(symbol);
            }
        }
        let allowed: BTreeSet<&str> = requested.iter().map(|s| s.as_str()).collect();

        let mut unique: BTreeMap<RecordKey, Record> = BTreeMap::new();
        for mut record in records {
            record.symbol = normalize_symbol(&record.symbol);
            if !allowed.contains(record.symbol.as_str()) || !window.contains(record.timestamp) {
                continue;
            }
            unique.insert(record.key(), record);
        }

        let mut dataset = Self {
            run_id: run_id.to_string(),
            created_at,
            symbols: requested,
            window,
            records: unique.into_values().collect(),
            symbol_index: BTreeMap::new(),
        };
        dataset.rebuild_index();
        dataset
    }

    /// A dataset with the same run metadata and a new record set.
    pub fn with_records(&self, records: Vec<Record>) -> Self {
        Self::new(&self.run_id, self.created_at, &self.symbols, self.window, records)
    }

    fn rebuild_index(&mut self) {
        self.symbol_index.clear();
        let mut start = 0;
        while start < self.records.len() {
            let symbol = self.records[start].symbol.clone();
            let mut end = start + 1;
            while end < self.records.len() && self.records[end].symbol == symbol {
                end += 1;
            }
            self.symbol_index.insert(symbol, start..end);
            start = end;
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Requested symbols, in request order.
    pub fn requested_symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Symbols that have at least one record, sorted.
    pub fn symbols(&self) -> Vec<&str> {
        self.symbol_index.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.symbol_index.contains_key(symbol)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_for(&self, symbol: &str) -> &[Record] {
        self.symbol_index
            .get(symbol)
            .map(|range| &self.records[range.clone()])
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).max()
    }

    /// Source with the most records for `symbol`; ties go to the smaller id.
    pub fn primary_source(&self, symbol: &str) -> Option<&str> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in self.records_for(symbol) {
            *counts.entry(record.source.as_str()).or_insert(0) += 1;
        }
        let mut best: Option<(&str, usize)> = None;
        for (source, count) in counts {
            if best.map_or(true, |(_, n)| count > n) {
                best = Some((source, count));
            }
        }
        best.map(|(source, _)| source)
    }

    /// Time-ordered records of `symbol` from its primary source.
    pub fn series(&self, symbol: &str) -> Vec<&Record> {
        match self.primary_source(symbol) {
            Some(source) => self
                .records_for(symbol)
                .iter()
                .filter(|r| r.source == source)
                .collect(),
            None => Vec::new(),
        }
    }
}
