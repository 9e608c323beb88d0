//! Cooperative driver loop
//!
//! Wires an [`InputSource`], the [`SignalProcessor`] and a [`Sink`] into the
//! single-threaded poll/process/publish cycle. Non-empty batches are
//! processed as soon as they arrive; an empty periodic tick (default every
//! 50 ms) keeps time-triggered nodes firing through input silence; the loop
//! sleeps up to a fine-grained interval (default 10 ms) between polls.
//!
//! Shutdown is a single atomic flag observed at tick boundaries: once it
//! clears, the loop drains one final tick, stops the source and returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::processor::{SignalProcessor, VssSignal};
use crate::sink::Sink;
use crate::source::InputSource;

/// Loop cadence knobs.
#[derive(Debug, Clone, Copy)]
pub struct FeederConfig {
    /// Sleep granularity between polls.
    pub poll_interval: Duration,
    /// Cadence of the empty periodic tick.
    pub periodic_interval: Duration,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            periodic_interval: Duration::from_millis(50),
        }
    }
}

/// The driver: owns the processor, the source transport and the sink
/// handles for the lifetime of the run.
pub struct Feeder<S: InputSource, K: Sink> {
    processor: SignalProcessor,
    source: S,
    sink: K,
    handles: HashMap<String, K::Handle>,
    config: FeederConfig,
}

impl<S: InputSource, K: Sink> Feeder<S, K> {
    pub fn new(processor: SignalProcessor, source: S, sink: K) -> Self {
        Self {
            processor,
            source,
            sink,
            handles: HashMap::new(),
            config: FeederConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FeederConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until `running` clears, then drain one tick and shut down.
    ///
    /// Initializes the source, hands it the required-input set and
    /// pre-resolves one sink handle per output node before the first tick.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), crate::VssDagError> {
        self.source.initialize()?;
        self.source
            .required_inputs(self.processor.required_input_signals());

        let names: Vec<String> = self.processor.node_names().map(str::to_string).collect();
        for name in names {
            match self.sink.resolve(&name) {
                Some(handle) => {
                    self.handles.insert(name, handle);
                }
                None => {
                    warn!("'{}' not in the broker tree; emissions dropped", name);
                }
            }
        }
        info!("pre-resolved {} output handles", self.handles.len());

        let mut last_periodic = Instant::now();
        while running.load(Ordering::Relaxed) {
            let loop_start = Instant::now();

            let updates = self.source.poll();
            if !updates.is_empty() {
                debug!("processing {} signal updates", updates.len());
                let emissions = self.processor.process(&updates, loop_start);
                self.publish_all(&emissions);
            }

            let now = Instant::now();
            if now.duration_since(last_periodic) >= self.config.periodic_interval {
                let emissions = self.processor.process(&[], now);
                if !emissions.is_empty() {
                    debug!("periodic tick produced {} emissions", emissions.len());
                }
                self.publish_all(&emissions);
                last_periodic = now;
            }

            let elapsed = loop_start.elapsed();
            if elapsed < self.config.poll_interval {
                std::thread::sleep(self.config.poll_interval - elapsed);
            }
        }

        // Drain whatever arrived since the last poll, then shut down.
        let updates = self.source.poll();
        let emissions = self.processor.process(&updates, Instant::now());
        self.publish_all(&emissions);
        self.source.stop();
        info!("feeder stopped");
        Ok(())
    }

    fn publish_all(&mut self, emissions: &[VssSignal]) {
        for signal in emissions {
            match self.handles.get(&signal.path) {
                Some(handle) => {
                    if let Err(err) = self.sink.publish(handle, signal) {
                        error!("failed to publish {}: {}", signal.path, err);
                    }
                }
                None => debug!("skipping {} (no broker handle)", signal.path),
            }
        }
    }

    /// The processor, e.g. for inspecting node state after a run.
    pub fn processor(&self) -> &SignalProcessor {
        &self.processor
    }
}
