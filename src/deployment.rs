//! Compiled-in deployment: bus addresses, regional frequency, link rates,
//! NMEA output selection and the two correction keys.
//!
//! Changing any of this means rebuilding and redeploying. The key records
//! below are placeholders for the pair issued by the correction provider,
//! which rotates keys every four weeks.

use crate::config::{push_item, ConfigItem, ConfigKey, ConfigSet};
use crate::device::DeviceAddress;
use crate::keys::{KeyError, KeyMaterial, KeySlot, KeyStore, KEY_LENGTH_BYTES};
use serde::{Deserialize, Serialize};

pub const INTER_DEVICE_BAUD: u32 = 38_400;
pub const HOST_OUTPUT_BAUD: u32 = 115_200;

// L-Band demodulator parameters for the correction service
pub const PMP_SEARCH_WINDOW_HZ: u64 = 2_200;
pub const PMP_USE_SERVICE_ID: u64 = 0;
pub const PMP_SERVICE_ID: u64 = 21_845;
pub const PMP_DATA_RATE_BPS: u64 = 2_400;
pub const PMP_USE_DESCRAMBLER: u64 = 1;
pub const PMP_DESCRAMBLER_INIT: u64 = 26_969;
pub const PMP_USE_PRESCRAMBLING: u64 = 0;
pub const PMP_UNIQUE_WORD: u64 = 16_238_547_128_276_412_563;

pub const DGNSS_MODE_RTK_FIXED: u64 = 3;
pub const SPARTN_SOURCE_LBAND: u64 = 1;

pub const CURRENT_KEY_WEEK: u16 = 2224;
pub const CURRENT_KEY_TOW: u32 = 518_400;
pub const CURRENT_KEY_HEX: &str = "6b2f5ed4a07c3e19d8a41c0be7922f53";
pub const NEXT_KEY_WEEK: u16 = 2228;
pub const NEXT_KEY_TOW: u32 = 518_400;
pub const NEXT_KEY_HEX: &str = "c1e08b3f74d2a6590e4bb81d37fa6c02";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    Us,
    Eu,
}

impl Region {
    pub fn center_frequency_hz(self) -> u64 {
        match self {
            Region::Us => 1_556_290_000,
            Region::Eu => 1_545_260_000,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Some(Region::Us),
            "eu" => Some(Region::Eu),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NmeaSentence {
    Gga,
    Gsa,
    Gsv,
    Rmc,
    Vtg,
    Gll,
    Gst,
}

impl NmeaSentence {
    pub fn output_key(self) -> ConfigKey {
        match self {
            NmeaSentence::Gga => ConfigKey::MsgOutNmeaGgaUart1,
            NmeaSentence::Gsa => ConfigKey::MsgOutNmeaGsaUart1,
            NmeaSentence::Gsv => ConfigKey::MsgOutNmeaGsvUart1,
            NmeaSentence::Rmc => ConfigKey::MsgOutNmeaRmcUart1,
            NmeaSentence::Vtg => ConfigKey::MsgOutNmeaVtgUart1,
            NmeaSentence::Gll => ConfigKey::MsgOutNmeaGllUart1,
            NmeaSentence::Gst => ConfigKey::MsgOutNmeaGstUart1,
        }
    }
}

pub const DEFAULT_NMEA_SENTENCES: [NmeaSentence; 5] = [
    NmeaSentence::Gga,
    NmeaSentence::Gsa,
    NmeaSentence::Gsv,
    NmeaSentence::Rmc,
    NmeaSentence::Vtg,
];

/// A key record as compiled in: declared length, validity start, hex bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyRecordSource {
    pub length_bytes: usize,
    pub gps_week: u16,
    pub gps_tow: u32,
    pub key_hex: &'static str,
}

impl core::fmt::Debug for KeyRecordSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyRecordSource")
            .field("length_bytes", &self.length_bytes)
            .field("gps_week", &self.gps_week)
            .field("gps_tow", &self.gps_tow)
            .field("key_hex", &"<redacted>")
            .finish()
    }
}

impl KeyRecordSource {
    fn material(&self, slot: KeySlot) -> Result<KeyMaterial, KeyError> {
        KeyMaterial::from_hex(slot, self.length_bytes, self.gps_week, self.gps_tow, self.key_hex)
    }
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub correction_receiver: DeviceAddress,
    pub position_receiver: DeviceAddress,
    pub region: Region,
    pub inter_device_baud: u32,
    pub host_output_baud: u32,
    pub nmea_sentences: Vec<NmeaSentence>,
    pub current_key: KeyRecordSource,
    pub next_key: KeyRecordSource,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            correction_receiver: DeviceAddress::correction_receiver(),
            position_receiver: DeviceAddress::position_receiver(),
            region: Region::Us,
            inter_device_baud: INTER_DEVICE_BAUD,
            host_output_baud: HOST_OUTPUT_BAUD,
            nmea_sentences: DEFAULT_NMEA_SENTENCES.to_vec(),
            current_key: KeyRecordSource {
                length_bytes: KEY_LENGTH_BYTES,
                gps_week: CURRENT_KEY_WEEK,
                gps_tow: CURRENT_KEY_TOW,
                key_hex: CURRENT_KEY_HEX,
            },
            next_key: KeyRecordSource {
                length_bytes: KEY_LENGTH_BYTES,
                gps_week: NEXT_KEY_WEEK,
                gps_tow: NEXT_KEY_TOW,
                key_hex: NEXT_KEY_HEX,
            },
        }
    }
}

impl Deployment {
    pub fn for_region(region: Region) -> Self {
        Self {
            region,
            ..Self::default()
        }
    }

    /// Decode and validate the compiled-in key pair.
    pub fn key_store(&self) -> Result<KeyStore, KeyError> {
        KeyStore::new(
            self.current_key.material(KeySlot::Current)?,
            self.next_key.material(KeySlot::Next)?,
        )
    }

    /// Items for the correction receiver, in application order.
    pub fn correction_config_set(&self) -> ConfigSet {
        let items = [
            ConfigItem::new(ConfigKey::PmpCenterFrequency, self.region.center_frequency_hz()),
            ConfigItem::new(ConfigKey::PmpSearchWindow, PMP_SEARCH_WINDOW_HZ),
            ConfigItem::new(ConfigKey::PmpUseServiceId, PMP_USE_SERVICE_ID),
            ConfigItem::new(ConfigKey::PmpServiceId, PMP_SERVICE_ID),
            ConfigItem::new(ConfigKey::PmpDataRate, PMP_DATA_RATE_BPS),
            ConfigItem::new(ConfigKey::PmpUseDescrambler, PMP_USE_DESCRAMBLER),
            ConfigItem::new(ConfigKey::PmpDescramblerInit, PMP_DESCRAMBLER_INIT),
            ConfigItem::new(ConfigKey::PmpUsePrescrambling, PMP_USE_PRESCRAMBLING),
            ConfigItem::new(ConfigKey::PmpUniqueWord, PMP_UNIQUE_WORD),
            ConfigItem::new(ConfigKey::Uart2Baudrate, u64::from(self.inter_device_baud)),
            // Protocol before the message that rides on it
            ConfigItem::enable(ConfigKey::Uart2OutProtUbx),
            ConfigItem::enable(ConfigKey::MsgOutRxmPmpUart2),
        ];
        collect(&items)
    }

    /// Items for the position receiver, in application order.
    pub fn position_config_set(&self) -> ConfigSet {
        let mut items = vec![
            ConfigItem::new(ConfigKey::Uart2Baudrate, u64::from(self.inter_device_baud)),
            ConfigItem::enable(ConfigKey::Uart2InProtUbx),
            ConfigItem::enable(ConfigKey::Uart2InProtSpartn),
            ConfigItem::new(ConfigKey::NavHpgDgnssMode, DGNSS_MODE_RTK_FIXED),
            ConfigItem::new(ConfigKey::SpartnUseSource, SPARTN_SOURCE_LBAND),
            ConfigItem::new(ConfigKey::Uart1Baudrate, u64::from(self.host_output_baud)),
            ConfigItem::disable(ConfigKey::Uart1OutProtUbx),
            ConfigItem::enable(ConfigKey::Uart1OutProtNmea),
        ];
        items.extend(
            self.nmea_sentences
                .iter()
                .map(|sentence| ConfigItem::enable(sentence.output_key())),
        );
        items.push(ConfigItem::enable(ConfigKey::MsgOutRxmCorI2c));
        collect(&items)
    }
}

fn collect(items: &[ConfigItem]) -> ConfigSet {
    let mut set = ConfigSet::new();
    for item in items {
        if let Err(key) = push_item(&mut set, *item) {
            tracing::error!("configuration set full, dropping {}", key);
        }
    }
    set
}
