//! DBC subset parser and frame decoder
//!
//! Parses the `BO_` (message) and `SG_` (signal) definitions of a DBC file
//! and decodes raw frame payloads into scaled physical values. Supported per
//! signal: start bit, bit length, byte order (`@1` Intel little-endian, `@0`
//! Motorola big-endian), sign, factor and offset. Multiplexed signals and
//! value tables are skipped.

use std::path::Path;

use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Error raised while reading a DBC file.
#[derive(Debug, thiserror::Error)]
pub enum DbcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Signal byte order. DBC `@1` is Intel (little-endian), `@0` Motorola
/// (big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// One signal definition within a message.
#[derive(Debug, Clone)]
pub struct DbcSignal {
    pub name: String,
    pub start_bit: u16,
    pub length: u16,
    pub byte_order: ByteOrder,
    pub signed: bool,
    pub factor: f64,
    pub offset: f64,
}

impl DbcSignal {
    /// Extract and scale this signal from a frame payload.
    ///
    /// Returns `None` when the payload is too short for the signal's bit
    /// range.
    pub fn decode(&self, data: &[u8]) -> Option<f64> {
        let raw = match self.byte_order {
            ByteOrder::LittleEndian => self.extract_little_endian(data)?,
            ByteOrder::BigEndian => self.extract_big_endian(data)?,
        };

        let value = if self.signed
            && (1..64).contains(&self.length)
            && raw & (1u64 << (self.length - 1)) != 0
        {
            // Sign-extend from `length` bits.
            let shift = 64 - self.length;
            (((raw << shift) as i64) >> shift) as f64
        } else {
            raw as f64
        };

        Some(value * self.factor + self.offset)
    }

    fn extract_little_endian(&self, data: &[u8]) -> Option<u64> {
        let mut raw = 0u64;
        for i in 0..u64::from(self.length) {
            let pos = u64::from(self.start_bit) + i;
            let byte = data.get(usize::try_from(pos / 8).ok()?)?;
            let bit = u64::from(byte >> (pos % 8)) & 1;
            raw |= bit << i;
        }
        Some(raw)
    }

    /// Motorola bit walk: the start bit is the MSB; positions descend within
    /// a byte and jump to bit 7 of the next byte.
    fn extract_big_endian(&self, data: &[u8]) -> Option<u64> {
        let mut raw = 0u64;
        let mut pos = u64::from(self.start_bit);
        for _ in 0..self.length {
            let byte = data.get(usize::try_from(pos / 8).ok()?)?;
            let bit = u64::from(byte >> (pos % 8)) & 1;
            raw = (raw << 1) | bit;
            if pos % 8 == 0 {
                pos += 15;
            } else {
                pos -= 1;
            }
        }
        Some(raw)
    }
}

/// One `BO_` message with its signals.
#[derive(Debug, Clone)]
pub struct DbcMessage {
    pub id: u32,
    pub name: String,
    pub dlc: usize,
    pub signals: Vec<DbcSignal>,
}

/// A decoded physical value from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    pub name: String,
    pub value: f64,
}

/// Parsed DBC database keyed by CAN id.
#[derive(Debug, Default)]
pub struct DbcDatabase {
    messages: HashMap<u32, DbcMessage>,
}

// DBC extended-id flag; frame ids never carry it.
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

impl DbcDatabase {
    /// Load and parse a DBC file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DbcError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse DBC text.
    pub fn parse(text: &str) -> Result<Self, DbcError> {
        let message_re = Regex::new(r"^BO_ (\d+) (\w+)\s*: (\d+) \w+").expect("message pattern");
        // Signal name may be followed by a multiplexer indicator (M, m0, m1…).
        let signal_re = Regex::new(concat!(
            r"^\s*SG_ (\w+)\s*(M|m\d+)?\s*: ",
            r"(\d+)\|(\d+)@([01])([+-]) ",
            r"\(([^,]+),([^)]+)\)",
        ))
        .expect("signal pattern");

        let mut messages: HashMap<u32, DbcMessage> = HashMap::new();
        let mut current: Option<u32> = None;

        for (number, line) in text.lines().enumerate() {
            let line_number = number + 1;
            if let Some(caps) = message_re.captures(line) {
                let id: u32 = caps[1].parse().map_err(|_| DbcError::Parse {
                    line: line_number,
                    message: format!("bad message id '{}'", &caps[1]),
                })?;
                let id = id & !EXTENDED_ID_FLAG;
                let dlc: usize = caps[3].parse().map_err(|_| DbcError::Parse {
                    line: line_number,
                    message: format!("bad message length '{}'", &caps[3]),
                })?;
                messages.insert(
                    id,
                    DbcMessage {
                        id,
                        name: caps[2].to_string(),
                        dlc,
                        signals: Vec::new(),
                    },
                );
                current = Some(id);
            } else if line.trim_start().starts_with("SG_") {
                let Some(caps) = signal_re.captures(line) else {
                    return Err(DbcError::Parse {
                        line: line_number,
                        message: "malformed signal definition".to_string(),
                    });
                };
                if caps.get(2).is_some() {
                    debug!("skipping multiplexed signal '{}'", &caps[1]);
                    continue;
                }
                let message_id = current.ok_or(DbcError::Parse {
                    line: line_number,
                    message: "signal definition outside a message".to_string(),
                })?;

                let parse_num = |index: usize| -> Result<f64, DbcError> {
                    caps[index].trim().parse().map_err(|_| DbcError::Parse {
                        line: line_number,
                        message: format!("bad number '{}'", &caps[index]),
                    })
                };

                let signal = DbcSignal {
                    name: caps[1].to_string(),
                    start_bit: caps[3].parse().map_err(|_| DbcError::Parse {
                        line: line_number,
                        message: format!("bad start bit '{}'", &caps[3]),
                    })?,
                    length: caps[4].parse().map_err(|_| DbcError::Parse {
                        line: line_number,
                        message: format!("bad bit length '{}'", &caps[4]),
                    })?,
                    byte_order: if &caps[5] == "1" {
                        ByteOrder::LittleEndian
                    } else {
                        ByteOrder::BigEndian
                    },
                    signed: &caps[6] == "-",
                    factor: parse_num(7)?,
                    offset: parse_num(8)?,
                };
                messages
                    .get_mut(&message_id)
                    .expect("current message exists")
                    .signals
                    .push(signal);
            }
        }

        debug!("parsed {} messages from DBC", messages.len());
        Ok(Self { messages })
    }

    pub fn message(&self, id: u32) -> Option<&DbcMessage> {
        self.messages.get(&(id & !EXTENDED_ID_FLAG))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Decode every signal of the message with the given id. Unknown ids
    /// yield an empty list.
    pub fn decode_frame(&self, id: u32, data: &[u8]) -> Vec<DecodedSignal> {
        let Some(message) = self.message(id) else {
            return Vec::new();
        };
        message
            .signals
            .iter()
            .filter_map(|signal| {
                signal.decode(data).map(|value| DecodedSignal {
                    name: signal.name.clone(),
                    value,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
VERSION ""

BO_ 599 DI_speed: 8 DI
 SG_ DI_vehicleSpeed : 12|12@1+ (0.05,-25) [-25|179.75] "KPH"  Receiver
 SG_ DI_gear m2 : 0|3@1+ (1,0) [0|7] ""  Receiver

BO_ 280 DI_torque: 8 DI
 SG_ DI_motorRPM : 24|16@1- (1,0) [-32768|32767] "RPM"  Receiver
 SG_ DI_bigEndian : 7|8@0+ (1,0) [0|255] ""  Receiver
"#;

    #[test]
    fn test_parse_messages_and_signals() {
        let db = DbcDatabase::parse(SAMPLE).unwrap();
        assert_eq!(db.len(), 2);

        let speed = db.message(599).unwrap();
        assert_eq!(speed.name, "DI_speed");
        assert_eq!(speed.dlc, 8);
        // The multiplexed gear signal is skipped.
        assert_eq!(speed.signals.len(), 1);

        let signal = &speed.signals[0];
        assert_eq!(signal.start_bit, 12);
        assert_eq!(signal.length, 12);
        assert_eq!(signal.byte_order, ByteOrder::LittleEndian);
        assert!(!signal.signed);
        assert_eq!(signal.factor, 0.05);
        assert_eq!(signal.offset, -25.0);
    }

    #[test]
    fn test_little_endian_decode_with_scaling() {
        let db = DbcDatabase::parse(SAMPLE).unwrap();
        // Raw 1000 at bits 12..24: bytes 1..3 carry 1000 << 4.
        let raw: u64 = 1000 << 12;
        let data = raw.to_le_bytes();
        let decoded = db.decode_frame(599, &data);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "DI_vehicleSpeed");
        assert!((decoded[0].value - (1000.0 * 0.05 - 25.0)).abs() < 1e-9);
    }

    #[test]
    fn test_signed_decode() {
        let db = DbcDatabase::parse(SAMPLE).unwrap();
        // -100 in 16 bits at bit 24 (bytes 3..5, little-endian).
        let raw = (-100i16 as u16) as u64;
        let data = (raw << 24).to_le_bytes();
        let decoded = db.decode_frame(280, &data);
        let rpm = decoded.iter().find(|s| s.name == "DI_motorRPM").unwrap();
        assert_eq!(rpm.value, -100.0);
    }

    #[test]
    fn test_big_endian_decode() {
        let db = DbcDatabase::parse(SAMPLE).unwrap();
        // Start bit 7, length 8, Motorola: the whole first byte, MSB first.
        let data = [0xA5u8, 0, 0, 0, 0, 0, 0, 0];
        let decoded = db.decode_frame(280, &data);
        let sig = decoded.iter().find(|s| s.name == "DI_bigEndian").unwrap();
        assert_eq!(sig.value, 165.0);
    }

    #[test]
    fn test_short_payload_skips_signal() {
        let db = DbcDatabase::parse(SAMPLE).unwrap();
        let decoded = db.decode_frame(599, &[0x00]);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_unknown_id_decodes_nothing() {
        let db = DbcDatabase::parse(SAMPLE).unwrap();
        assert!(db.decode_frame(0x7FF, &[0; 8]).is_empty());
    }

    #[test]
    fn test_extended_id_flag_masked() {
        let text = "BO_ 2566848512 Ext: 8 X\n SG_ S : 0|8@1+ (1,0) [0|255] \"\" R\n";
        let db = DbcDatabase::parse(text).unwrap();
        // 2566848512 = 0x18FF_0000 with the extended flag set
        assert!(db.message(0x18FF_0000).is_some());
        let decoded = db.decode_frame(0x18FF_0000, &[42, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decoded[0].value, 42.0);
    }

    #[test]
    fn test_malformed_signal_is_an_error() {
        let text = "BO_ 1 M: 8 X\n SG_ Broken : nonsense\n";
        let err = DbcDatabase::parse(text).unwrap_err();
        assert!(matches!(err, DbcError::Parse { line: 2, .. }));
    }
}
