//! Helpers shared by unit tests

use async_trait::async_trait;
use benchtap_core::TelemetryRecord;
use std::sync::Mutex;

use crate::stream::{SinkError, TelemetrySink};

/// Sink that keeps every record in memory
#[derive(Default)]
pub(crate) struct RecordingSink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl RecordingSink {
    pub(crate) fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Concatenated text payloads of one source, in emission order
    pub(crate) fn text_of(&self, source: &str) -> String {
        self.records()
            .iter()
            .filter(|r| r.source == source)
            .filter_map(|r| r.payload.as_text().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
