//! Input signal sources
//!
//! An [`InputSource`] delivers batches of decoded, named signal updates to
//! the driver loop. Sources own their transport: acquisition may run on a
//! worker thread, but `poll()` is always non-blocking and is the only way
//! updates enter the cooperative core.
//!
//! [`ChannelSource`] is the transport-agnostic building block: any producer
//! thread feeds it through a [`SignalInjector`], and `poll()` drains what
//! has accumulated. The candump replay source (see [`crate::can`]) and the
//! driver tests are both built on it.

use std::collections::BTreeSet;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::value::QualifiedValue;

/// One decoded input update: an external signal name, its value with
/// validity, and the source's capture timestamp.
#[derive(Debug, Clone)]
pub struct SignalUpdate {
    pub name: String,
    pub value: QualifiedValue,
    pub timestamp: Instant,
}

/// Transport error reported by a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Contract between the driver loop and an input transport.
pub trait InputSource {
    /// Open the transport. Called once before the first `poll()`.
    fn initialize(&mut self) -> Result<(), SourceError>;

    /// The set of input names the processor needs. Consumed once; the
    /// source need only deliver updates for these.
    fn required_inputs(&mut self, names: &BTreeSet<String>);

    /// Drain pending updates. Non-blocking; may return an empty batch.
    /// Duplicates within a batch are permitted (last wins in the tick).
    fn poll(&mut self) -> Vec<SignalUpdate>;

    /// Shut the transport down. Idempotent.
    fn stop(&mut self);
}

/// Producer-side handle of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct SignalInjector {
    tx: Sender<SignalUpdate>,
}

impl SignalInjector {
    /// Queue an update for the next `poll()`. Returns `false` once the
    /// source has been stopped.
    pub fn send(&self, update: SignalUpdate) -> bool {
        self.tx.send(update).is_ok()
    }
}

/// An [`InputSource`] fed by producer threads through a crossbeam channel.
pub struct ChannelSource {
    tx: Option<Sender<SignalUpdate>>,
    rx: Option<Receiver<SignalUpdate>>,
    required: Option<BTreeSet<String>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx: Some(tx),
            rx: Some(rx),
            required: None,
        }
    }

    /// A producer handle. May be cloned freely across threads.
    ///
    /// # Panics
    /// Panics if the source has already been stopped.
    pub fn injector(&self) -> SignalInjector {
        SignalInjector {
            tx: self
                .tx
                .as_ref()
                .expect("injector() called on a stopped source")
                .clone(),
        }
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for ChannelSource {
    fn initialize(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn required_inputs(&mut self, names: &BTreeSet<String>) {
        debug!("channel source filtering to {} inputs", names.len());
        self.required = Some(names.clone());
    }

    fn poll(&mut self) -> Vec<SignalUpdate> {
        let Some(rx) = &self.rx else {
            return Vec::new();
        };
        let updates = rx.try_iter();
        match &self.required {
            Some(required) => updates.filter(|u| required.contains(&u.name)).collect(),
            None => updates.collect(),
        }
    }

    fn stop(&mut self) {
        // Dropping the receiver makes every outstanding injector's send
        // fail; dropping twice is a no-op.
        self.tx.take();
        self.rx.take();
    }
}
