//! Candump log replay source
//!
//! Replays a recorded candump text log (`(timestamp) iface ID#HEXDATA`, the
//! format `candump -l` writes and `canplayer` consumes) through a DBC
//! database. A worker thread paces frames by their log timestamps and feeds
//! decoded signal updates into a [`ChannelSource`]; `poll()` drains whatever
//! has accumulated since the last tick.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::source::{ChannelSource, InputSource, SignalInjector, SignalUpdate, SourceError};
use crate::value::{QualifiedValue, Value};

use super::dbc::DbcDatabase;

/// Error raised while reading a candump log.
#[derive(Debug, thiserror::Error)]
pub enum CandumpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: malformed candump record")]
    Parse { line: usize },
}

/// One raw frame from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct CandumpEntry {
    /// Log timestamp in seconds.
    pub timestamp: f64,
    pub can_id: u32,
    pub data: Vec<u8>,
}

/// Parse candump log text. Remote frames (`#R`) are skipped.
pub fn parse_log(text: &str) -> Result<Vec<CandumpEntry>, CandumpError> {
    let line_re = Regex::new(r"^\((\d+\.\d+)\)\s+\S+\s+([0-9A-Fa-f]+)#([0-9A-Fa-f]*)(\s|$)")
        .expect("candump pattern");

    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains("#R") {
            continue;
        }
        let caps = line_re.captures(line).ok_or(CandumpError::Parse {
            line: number + 1,
        })?;

        let timestamp: f64 = caps[1].parse().map_err(|_| CandumpError::Parse {
            line: number + 1,
        })?;
        let can_id = u32::from_str_radix(&caps[2], 16).map_err(|_| CandumpError::Parse {
            line: number + 1,
        })?;

        let hex = &caps[3];
        if hex.len() % 2 != 0 {
            return Err(CandumpError::Parse { line: number + 1 });
        }
        let data = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| CandumpError::Parse { line: number + 1 })?;

        entries.push(CandumpEntry {
            timestamp,
            can_id,
            data,
        });
    }
    Ok(entries)
}

/// An [`InputSource`] that replays a candump log through a DBC database.
///
/// Construction parses both files, so configuration problems surface before
/// the loop starts. `initialize()` spawns the replay thread; it owns the
/// log, decodes each frame, and pushes updates through the shared channel.
/// The thread stops at end of log or when `stop()` raises the shutdown flag.
pub struct CandumpReplaySource {
    entries: Option<Vec<CandumpEntry>>,
    dbc: Option<DbcDatabase>,
    inner: ChannelSource,
    injector: SignalInjector,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CandumpReplaySource {
    /// Parse the log and DBC files and prepare a replay.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        log_path: P,
        dbc_path: Q,
    ) -> crate::Result<Self> {
        let dbc = DbcDatabase::from_file(dbc_path)?;
        let text = std::fs::read_to_string(log_path)?;
        let entries = parse_log(&text)?;
        info!(
            "candump replay ready: {} frames, {} DBC messages",
            entries.len(),
            dbc.len()
        );

        let inner = ChannelSource::new();
        let injector = inner.injector();
        Ok(Self {
            entries: Some(entries),
            dbc: Some(dbc),
            inner,
            injector,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn replay(
        entries: Vec<CandumpEntry>,
        dbc: DbcDatabase,
        injector: SignalInjector,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut previous_ts: Option<f64> = None;
        let mut delivered = 0usize;

        for entry in entries {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Some(previous) = previous_ts {
                let delta = entry.timestamp - previous;
                if delta > 0.0 {
                    std::thread::sleep(Duration::from_secs_f64(delta));
                }
            }
            previous_ts = Some(entry.timestamp);

            let now = Instant::now();
            for decoded in dbc.decode_frame(entry.can_id, &entry.data) {
                let update = SignalUpdate {
                    name: decoded.name,
                    value: QualifiedValue::new(Value::Double(decoded.value)),
                    timestamp: now,
                };
                if !injector.send(update) {
                    debug!("replay channel closed, stopping");
                    return;
                }
                delivered += 1;
            }
        }

        info!("candump replay finished: {} updates delivered", delivered);
    }
}

impl InputSource for CandumpReplaySource {
    fn initialize(&mut self) -> Result<(), SourceError> {
        let entries = self.entries.take().ok_or_else(|| {
            SourceError::Transport("replay source initialized twice".to_string())
        })?;
        let dbc = self.dbc.take().expect("database present until initialize");
        let injector = self.injector.clone();
        let shutdown = Arc::clone(&self.shutdown);

        self.worker = Some(std::thread::spawn(move || {
            Self::replay(entries, dbc, injector, shutdown);
        }));
        Ok(())
    }

    fn required_inputs(&mut self, names: &BTreeSet<String>) {
        self.inner.required_inputs(names);
    }

    fn poll(&mut self) -> Vec<SignalUpdate> {
        self.inner.poll()
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("candump replay thread panicked");
            }
        }
        self.inner.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_lines() {
        let log = "(1436509052.249713) vcan0 0E6#6B9DF95E2CA10A30\n\
                   (1436509052.449813) vcan0 12C#D7\n";
        let entries = parse_log(log).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].can_id, 0x0E6);
        assert_eq!(entries[0].data.len(), 8);
        assert_eq!(entries[0].data[0], 0x6B);
        assert_eq!(entries[1].can_id, 0x12C);
        assert_eq!(entries[1].data, vec![0xD7]);
    }

    #[test]
    fn test_parse_skips_remote_frames_and_blanks() {
        let log = "\n(1.0) can0 100#R\n(2.0) can0 101#0102\n";
        let entries = parse_log(log).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].can_id, 0x101);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_log("not a candump line\n").unwrap_err();
        assert!(matches!(err, CandumpError::Parse { line: 1 }));
    }

    #[test]
    fn test_parse_rejects_odd_hex() {
        let err = parse_log("(1.0) can0 100#ABC\n").unwrap_err();
        assert!(matches!(err, CandumpError::Parse { line: 1 }));
    }

    #[test]
    fn test_replay_delivers_decoded_updates() {
        let dir = std::env::temp_dir().join("vssdag_candump_test");
        std::fs::create_dir_all(&dir).unwrap();
        let dbc_path = dir.join("test.dbc");
        let log_path = dir.join("test.log");

        std::fs::write(
            &dbc_path,
            "BO_ 256 Speed: 8 X\n SG_ RawSpeed : 0|8@1+ (2,0) [0|510] \"\" R\n",
        )
        .unwrap();
        // Two frames 1 ms apart.
        std::fs::write(
            &log_path,
            "(100.000000) vcan0 100#15\n(100.001000) vcan0 100#2A\n",
        )
        .unwrap();

        let mut source = CandumpReplaySource::new(&log_path, &dbc_path).unwrap();
        source.initialize().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut values = Vec::new();
        while values.len() < 2 && Instant::now() < deadline {
            for update in source.poll() {
                assert_eq!(update.name, "RawSpeed");
                values.push(update.value.value.clone());
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        source.stop();

        assert_eq!(
            values,
            vec![Value::Double(42.0), Value::Double(84.0)]
        );
    }
}
