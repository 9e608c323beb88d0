//! Output sinks
//!
//! A [`Sink`] owns the broker connection. Paths are resolved once per output
//! node at startup into opaque handles; unresolved paths are dropped from
//! emission without retry. Publish failures are logged by the driver and
//! never stop processing.
//!
//! [`LogSink`] stands in for the broker client: it resolves every path and
//! writes each publish through `tracing`, which is also the dry-run mode of
//! the feeder binary.

use tracing::info;

use crate::processor::VssSignal;

/// Error returned by a failed publish.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Contract between the driver loop and a broker client.
pub trait Sink {
    /// Opaque pre-resolved token for one output path.
    type Handle;

    /// Resolve a path in the broker tree. `None` means the path does not
    /// exist; the node's emissions are then dropped.
    fn resolve(&mut self, path: &str) -> Option<Self::Handle>;

    /// Publish one emission through a previously resolved handle.
    fn publish(&mut self, handle: &Self::Handle, signal: &VssSignal) -> Result<(), SinkError>;
}

/// Sink that accepts every path and logs publishes.
#[derive(Debug, Default)]
pub struct LogSink {
    published: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publishes so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl Sink for LogSink {
    type Handle = String;

    fn resolve(&mut self, path: &str) -> Option<String> {
        Some(path.to_string())
    }

    fn publish(&mut self, handle: &String, signal: &VssSignal) -> Result<(), SinkError> {
        self.published += 1;
        info!("publish {} = {}", handle, signal.value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{QualifiedValue, Value};

    #[test]
    fn test_log_sink_resolves_and_counts() {
        let mut sink = LogSink::new();
        let handle = sink.resolve("Vehicle.Speed").unwrap();
        let signal = VssSignal {
            path: "Vehicle.Speed".to_string(),
            value: QualifiedValue::new(Value::Float(42.0)),
        };
        sink.publish(&handle, &signal).unwrap();
        sink.publish(&handle, &signal).unwrap();
        assert_eq!(sink.published(), 2);
    }
}
