//! Request bodies for the ingest endpoints

use serde::Serialize;

use crate::types::{EventRecord, QueueEntry};

/// Body of both ingest endpoints: `{ "events": [...] }`
#[derive(Debug, Serialize)]
pub struct EventBatch<'a> {
    pub events: &'a [EventRecord],
}

/// Unload signal sent to the batch endpoint: `{ "events": [], "flush": true }`
#[derive(Debug, Serialize)]
pub(crate) struct FlushSignal {
    pub events: [EventRecord; 0],
    pub flush: bool,
}

impl FlushSignal {
    pub fn new() -> Self {
        Self {
            events: [],
            flush: true,
        }
    }
}

/// Entries grouped for one transmission, in queue order
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub ids: Vec<i64>,
    pub records: Vec<EventRecord>,
}

impl Group {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a QueueEntry>) -> Self {
        let mut ids = Vec::new();
        let mut records = Vec::new();
        for entry in entries {
            ids.push(entry.id);
            records.push(entry.record.clone());
        }
        Self { ids, records }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
