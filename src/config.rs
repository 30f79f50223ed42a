// Line speed, turnaround timing, reply policy and segment routing
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::LineSettings;
use crate::error::{BusError, Result};
use crate::protocol::MAX_DEVICE_ID;

// AX-12 factory line speed
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;

// Baud generator clock of the reference controller board
pub const DEFAULT_CLOCK_HZ: u32 = 16_000_000;

// Turnaround hold after the last byte, in bit periods
pub const DEFAULT_SETTLE_BITS: u32 = 20;
pub const SETTLE_BITS_RANGE: std::ops::RangeInclusive<u32> = 15..=25;

// Budget for each reply byte to show up in the capture buffer
pub const DEFAULT_BYTE_TIMEOUT_MS: u64 = 20;

// Capture buffer size; one reply never needs more than this
pub const CAPTURE_CAPACITY: usize = 64;

/// What a plain (non-deferred) write does after the packet is on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteReplyPolicy {
    /// Switch back to receive and leave any reply in the capture buffer
    #[default]
    Ignore,
    /// Read the device's status packet and record its error byte
    Await,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub baudrate: u32,
    pub clock_hz: u32,
    pub settle_bits: u32,
    pub byte_timeout_ms: u64,
    pub write_reply: WriteReplyPolicy,
    /// IDs wired to the secondary segment of a split bus; empty for a single segment
    pub secondary_segment: Vec<u8>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baudrate: DEFAULT_BAUDRATE,
            clock_hz: DEFAULT_CLOCK_HZ,
            settle_bits: DEFAULT_SETTLE_BITS,
            byte_timeout_ms: DEFAULT_BYTE_TIMEOUT_MS,
            write_reply: WriteReplyPolicy::default(),
            secondary_segment: Vec::new(),
        }
    }
}

impl BusConfig {
    pub fn with_baudrate(baudrate: u32) -> Self {
        Self {
            baudrate,
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: BusConfig =
            serde_json::from_str(&text).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baudrate == 0 {
            return Err(BusError::Config("baudrate must be non-zero".into()));
        }
        if !SETTLE_BITS_RANGE.contains(&self.settle_bits) {
            return Err(BusError::Config(format!(
                "settle_bits {} outside {:?}",
                self.settle_bits, SETTLE_BITS_RANGE
            )));
        }
        if self.byte_timeout_ms == 0 {
            return Err(BusError::Config("byte_timeout_ms must be non-zero".into()));
        }
        if let Some(id) = self.secondary_segment.iter().find(|&&id| id > MAX_DEVICE_ID) {
            return Err(BusError::Config(format!(
                "segment table entry {} is not a device ID",
                id
            )));
        }
        Ok(())
    }

    /// Baud generator divisor in double-speed mode: clock / (8 * baud) - 1
    pub fn baud_divisor(&self) -> u16 {
        let per_tick = 8 * u64::from(self.baudrate);
        (u64::from(self.clock_hz) / per_tick)
            .saturating_sub(1)
            .min(u64::from(u16::MAX)) as u16
    }

    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baudrate: self.baudrate,
            divisor: self.baud_divisor(),
            double_speed: true,
        }
    }

    pub fn bit_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.baudrate.max(1)))
    }

    /// Hold between the transmit register draining and flipping to receive
    pub fn settle_delay(&self) -> Duration {
        self.bit_period() * self.settle_bits
    }

    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.write_reply, WriteReplyPolicy::Ignore);
    }

    #[test]
    fn test_baud_divisor() {
        // 16 MHz / (8 * 1M) - 1 = 1
        assert_eq!(BusConfig::default().baud_divisor(), 1);
        // 16 MHz / (8 * 115200) - 1 = 16
        assert_eq!(BusConfig::with_baudrate(115_200).baud_divisor(), 16);
        // Faster than the clock allows saturates instead of wrapping
        assert_eq!(BusConfig::with_baudrate(4_000_000).baud_divisor(), 0);
    }

    #[test]
    fn test_settle_delay() {
        let config = BusConfig::default();
        assert_eq!(config.bit_period(), Duration::from_micros(1));
        assert_eq!(config.settle_delay(), Duration::from_micros(20));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = BusConfig::with_baudrate(0);
        assert!(config.validate().is_err());

        config = BusConfig {
            settle_bits: 40,
            ..BusConfig::default()
        };
        assert!(config.validate().is_err());

        config = BusConfig {
            secondary_segment: vec![3, 0xFE],
            ..BusConfig::default()
        };
        assert!(matches!(config.validate(), Err(BusError::Config(_))));
    }

    #[test]
    fn test_json_partial_fields() {
        let json = r#"{"baudrate": 57600, "write_reply": "await", "secondary_segment": [7, 8]}"#;
        let config: BusConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.baudrate, 57_600);
        assert_eq!(config.write_reply, WriteReplyPolicy::Await);
        assert_eq!(config.secondary_segment, vec![7, 8]);
        assert_eq!(config.settle_bits, DEFAULT_SETTLE_BITS);
    }
}
