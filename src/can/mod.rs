//! CAN collaborator: DBC decoding and candump replay
//!
//! The core never touches frames; it consumes named physical values. This
//! module supplies the recorded-capture transport behind the
//! [`InputSource`](crate::source::InputSource) seam: a DBC subset parser
//! ([`dbc`]) turns raw frames into scaled signal values, and a candump text
//! log replays through it on a worker thread ([`candump`]). Live SocketCAN
//! capture stays outside this crate.

pub mod candump;
pub mod dbc;

pub use candump::{CandumpError, CandumpReplaySource};
pub use dbc::{DbcDatabase, DbcError, DbcMessage, DbcSignal};
