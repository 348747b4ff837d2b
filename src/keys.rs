//! Dynamic decryption keys for the correction stream.
//!
//! The position receiver holds one active and one pending key. Both records
//! are compiled into the deployment; rotation means shipping a new pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LENGTH_BYTES: usize = 16;
pub const MAX_KEY_LENGTH_BYTES: usize = 32;
pub const SECONDS_PER_WEEK: u32 = 604_800;

static_assertions::const_assert!(KEY_LENGTH_BYTES <= MAX_KEY_LENGTH_BYTES);

/// GPS week number plus time of week in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GpsTime {
    pub week: u16,
    pub tow: u32,
}

impl GpsTime {
    pub fn new(week: u16, tow: u32) -> Self {
        Self { week, tow }
    }
}

impl core::fmt::Display for GpsTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "week {} tow {}", self.week, self.tow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySlot {
    Current,
    Next,
}

impl core::fmt::Display for KeySlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KeySlot::Current => f.write_str("current"),
            KeySlot::Next => f.write_str("next"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("{slot} key declares {declared} bytes but holds {actual}")]
    LengthMismatch {
        slot: KeySlot,
        declared: usize,
        actual: usize,
    },
    #[error("{slot} key is empty or longer than {max} bytes ({length})", max = MAX_KEY_LENGTH_BYTES)]
    InvalidLength { slot: KeySlot, length: usize },
    #[error("{slot} key time of week {tow} is not below {limit}", limit = SECONDS_PER_WEEK)]
    InvalidTimeOfWeek { slot: KeySlot, tow: u32 },
    #[error("{slot} key is not valid hex: {reason}")]
    InvalidHex { slot: KeySlot, reason: String },
    #[error("next key validity ({next}) must start after current key validity ({current})")]
    ValidityOrder { current: GpsTime, next: GpsTime },
}

/// One time-bounded key. Key bytes are wiped when the record is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    length_bytes: usize,
    gps_week: u16,
    gps_tow: u32,
    key_bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Build a record without checking it; `KeyStore::new` validates both slots.
    pub fn new(length_bytes: usize, gps_week: u16, gps_tow: u32, key_bytes: Vec<u8>) -> Self {
        Self {
            length_bytes,
            gps_week,
            gps_tow,
            key_bytes,
        }
    }

    pub fn from_hex(
        slot: KeySlot,
        length_bytes: usize,
        gps_week: u16,
        gps_tow: u32,
        key_hex: &str,
    ) -> Result<Self, KeyError> {
        let key_bytes = hex::decode(key_hex.trim()).map_err(|e| KeyError::InvalidHex {
            slot,
            reason: e.to_string(),
        })?;
        Ok(Self::new(length_bytes, gps_week, gps_tow, key_bytes))
    }

    pub fn length_bytes(&self) -> usize {
        self.length_bytes
    }

    pub fn gps_week(&self) -> u16 {
        self.gps_week
    }

    pub fn gps_tow(&self) -> u32 {
        self.gps_tow
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    pub fn valid_from(&self) -> GpsTime {
        GpsTime::new(self.gps_week, self.gps_tow)
    }

    fn validate(&self, slot: KeySlot) -> Result<(), KeyError> {
        if self.length_bytes != self.key_bytes.len() {
            return Err(KeyError::LengthMismatch {
                slot,
                declared: self.length_bytes,
                actual: self.key_bytes.len(),
            });
        }
        if self.length_bytes == 0 || self.length_bytes > MAX_KEY_LENGTH_BYTES {
            return Err(KeyError::InvalidLength {
                slot,
                length: self.length_bytes,
            });
        }
        if self.gps_tow >= SECONDS_PER_WEEK {
            return Err(KeyError::InvalidTimeOfWeek {
                slot,
                tow: self.gps_tow,
            });
        }
        Ok(())
    }
}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("length_bytes", &self.length_bytes)
            .field("gps_week", &self.gps_week)
            .field("gps_tow", &self.gps_tow)
            .field("key_bytes", &"<redacted>")
            .finish()
    }
}

/// Validity windows of the two installed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchedule {
    pub current_from: GpsTime,
    pub next_from: GpsTime,
}

/// Holds exactly the current and next key.
#[derive(Debug, Clone)]
pub struct KeyStore {
    current: KeyMaterial,
    next: KeyMaterial,
}

impl KeyStore {
    pub fn new(current: KeyMaterial, next: KeyMaterial) -> Result<Self, KeyError> {
        current.validate(KeySlot::Current)?;
        next.validate(KeySlot::Next)?;

        if next.valid_from() <= current.valid_from() {
            return Err(KeyError::ValidityOrder {
                current: current.valid_from(),
                next: next.valid_from(),
            });
        }

        Ok(Self { current, next })
    }

    pub fn current(&self) -> &KeyMaterial {
        &self.current
    }

    pub fn next(&self) -> &KeyMaterial {
        &self.next
    }

    pub fn schedule(&self) -> KeySchedule {
        KeySchedule {
            current_from: self.current.valid_from(),
            next_from: self.next.valid_from(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(week: u16, tow: u32) -> KeyMaterial {
        KeyMaterial::new(KEY_LENGTH_BYTES, week, tow, vec![0xA5; KEY_LENGTH_BYTES])
    }

    #[test]
    fn test_gps_time_ordering() {
        assert!(GpsTime::new(2224, 518_400) < GpsTime::new(2228, 518_400));
        assert!(GpsTime::new(2224, 100) < GpsTime::new(2224, 200));
        assert!(GpsTime::new(2225, 0) > GpsTime::new(2224, 604_799));
    }

    #[test]
    fn test_store_accepts_increasing_validity() {
        let store = KeyStore::new(key(2224, 518_400), key(2228, 518_400)).unwrap();
        let schedule = store.schedule();
        assert_eq!(schedule.current_from, GpsTime::new(2224, 518_400));
        assert_eq!(schedule.next_from, GpsTime::new(2228, 518_400));
    }

    #[test]
    fn test_store_rejects_equal_validity() {
        let result = KeyStore::new(key(2224, 518_400), key(2224, 518_400));
        assert!(matches!(result, Err(KeyError::ValidityOrder { .. })));
    }

    #[test]
    fn test_store_rejects_length_mismatch() {
        let short = KeyMaterial::new(16, 2228, 0, vec![1; 15]);
        let result = KeyStore::new(key(2224, 0), short);
        assert_eq!(
            result.unwrap_err(),
            KeyError::LengthMismatch {
                slot: KeySlot::Next,
                declared: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_store_rejects_out_of_range_tow() {
        let result = KeyStore::new(key(2224, SECONDS_PER_WEEK), key(2228, 0));
        assert!(matches!(
            result,
            Err(KeyError::InvalidTimeOfWeek { slot: KeySlot::Current, .. })
        ));
    }

    #[test]
    fn test_from_hex() {
        let material =
            KeyMaterial::from_hex(KeySlot::Current, 16, 2224, 518_400, "000102030405060708090a0b0c0d0e0f")
                .unwrap();
        assert_eq!(material.key_bytes()[15], 0x0f);

        let bad = KeyMaterial::from_hex(KeySlot::Next, 16, 2228, 0, "zz");
        assert!(matches!(bad, Err(KeyError::InvalidHex { slot: KeySlot::Next, .. })));
    }

    #[test]
    fn test_debug_redacts_key_bytes() {
        let rendered = format!("{:?}", key(2224, 0));
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("165"));
    }
}
