//! Injected sink for timing and count samples.
//!
//! The core only produces samples. Aggregation, resampling and transport
//! belong to whatever sink the embedder injects.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One measurement, with its values (`fields`) and the dimensions it is keyed by (`tags`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub measurement: String,
    pub fields: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
}

impl Sample {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Adds the `ns` field every timing sample carries.
    pub fn elapsed(self, duration: Duration) -> Self {
        self.field("ns", duration.as_nanos())
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

pub trait MetricsSink: Send + Sync {
    fn push(&self, sample: Sample);
}

/// Emits every sample as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn push(&self, sample: Sample) {
        tracing::debug!(
            measurement = %sample.measurement,
            fields = ?sample.fields,
            tags = ?sample.tags,
            "metric sample"
        );
    }
}

/// Keeps every sample in memory until drained.
#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Mutex<Vec<Sample>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.samples.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn measurements(&self, measurement: &str) -> Vec<Sample> {
        self.samples()
            .into_iter()
            .filter(|sample| sample.measurement == measurement)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn push(&self, sample: Sample) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.push(Sample::new("Script").field("ns", 10).tag("Script", "nw_c2_default1"));
        sink.push(Sample::new("Closures").elapsed(Duration::from_micros(2)));

        let samples = sink.drain();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].get_tag("Script"), Some("nw_c2_default1"));
        assert_eq!(samples[1].get_field("ns"), Some("2000"));
        assert!(sink.samples().is_empty());
    }
}
