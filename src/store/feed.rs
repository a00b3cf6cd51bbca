//! Recognized-container log feed
//!
//! Records are kept most-recent-first and never mutated. A freshly appended
//! record carries a "recent" highlight for [`HIGHLIGHT_WINDOW`]; each record
//! owns its own expiry so overlapping appends fade independently.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::data::LogRecord;

pub const HIGHLIGHT_WINDOW: Duration = Duration::from_secs(3);

/// One page of the feed, derived on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPage {
    /// 1-based page actually shown after clamping
    pub page: usize,
    pub total_pages: usize,
    pub total_records: usize,
    pub rows: Vec<FeedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedRow {
    pub record: LogRecord,
    pub highlighted: bool,
}

#[derive(Debug, Default)]
pub struct LogFeed {
    records: Vec<LogRecord>,
    ids: HashSet<String>,
    highlights: HashMap<String, Instant>,
}

impl LogFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection with a server snapshot
    pub fn seed_initial(&mut self, records: Vec<LogRecord>) {
        self.records.clear();
        self.ids.clear();
        self.highlights.clear();

        for record in records {
            if self.ids.insert(record.id.clone()) {
                self.records.push(record);
            } else {
                debug!("Skipping duplicate log id {} in snapshot", record.id);
            }
        }
    }

    /// Insert at the head and highlight it. Returns false for an id already in the feed.
    pub fn append(&mut self, record: LogRecord, now: Instant) -> bool {
        if !self.ids.insert(record.id.clone()) {
            debug!("Ignoring log {} already in feed", record.id);
            return false;
        }

        self.highlights.insert(record.id.clone(), now + HIGHLIGHT_WINDOW);
        self.records.insert(0, record);
        true
    }

    /// Drop every highlight whose own deadline has passed. Returns the ids that faded.
    pub fn expire_highlights(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .highlights
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.highlights.remove(id);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.highlights.values().min().copied()
    }

    pub fn is_highlighted(&self, id: &str) -> bool {
        self.highlights.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows `[(page-1)*size, page*size)`; out-of-range pages clamp to the nearest valid one
    pub fn page(&self, page_size: usize, page: usize) -> FeedPage {
        let page_size = page_size.max(1);
        let total_pages = total_pages(self.records.len(), page_size);
        let page = page.clamp(1, total_pages);

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(self.records.len());
        let rows = self.records[start..end]
            .iter()
            .map(|record| FeedRow {
                highlighted: self.is_highlighted(&record.id),
                record: record.clone(),
            })
            .collect();

        FeedPage {
            page,
            total_pages,
            total_records: self.records.len(),
            rows,
        }
    }
}

/// `ceil(count / page_size)`, never less than one so an empty feed still has a page
pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1)).max(1)
}
