//! CAN-to-VSS signal DAG processing
//!
//! This library decodes vehicle CAN traffic into named physical signals,
//! runs them through a user-declared DAG of derivations, and hands the
//! resulting typed values to a KUKSA-compatible broker sink.
//!
//! # Architecture
//!
//! - **SignalProcessor**: a topologically ordered DAG of signal nodes with
//!   per-node state, evaluated tick by tick
//! - **Expression engine**: C-style transform expressions, parsed once at
//!   initialization, evaluated per tick over dependency values
//! - **InputSource / Sink**: transport seams; a candump/DBC replay source
//!   and a logging sink ship with the crate
//! - **Feeder**: the single-threaded cooperative driver loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use vssdag::{load_mappings, ChannelSource, Feeder, LogSink, SignalProcessor};
//!
//! let mappings = load_mappings("mappings.yaml")?;
//! let processor = SignalProcessor::new(mappings)?;
//! let mut feeder = Feeder::new(processor, ChannelSource::new(), LogSink::new());
//! let running = AtomicBool::new(true);
//! feeder.run(&running)?;
//! # Ok::<(), vssdag::VssDagError>(())
//! ```

use thiserror::Error;

pub mod can;
pub mod expr;
pub mod feeder;
pub mod mapping;
pub mod processor;
pub mod sink;
pub mod source;
pub mod value;

// Re-export the value model
pub use value::{CoercionError, QualifiedValue, StructValue, Value, ValueType};

// Re-export the expression engine surface
pub use expr::{Environment, EvalFault, Expr};

// Re-export mapping configuration
pub use mapping::{
    load_mappings, parse_mappings, ConfigError, SignalMapping, SignalSource, Transform,
    UpdateTrigger,
};

// Re-export the processor core
pub use processor::{NodeId, SignalNode, SignalProcessor, VssSignal};

// Re-export the collaborator seams
pub use feeder::{Feeder, FeederConfig};
pub use sink::{LogSink, Sink, SinkError};
pub use source::{ChannelSource, InputSource, SignalInjector, SignalUpdate, SourceError};

#[derive(Error, Debug)]
pub enum VssDagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mapping file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DBC error: {0}")]
    Dbc(#[from] can::DbcError),

    #[error("candump log error: {0}")]
    Candump(#[from] can::CandumpError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, VssDagError>;
