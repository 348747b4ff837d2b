//! Configuration key catalog and the items applied to each receiver.
//!
//! Every key carries the 32-bit identifier the receiver firmware uses for it.
//! Bits 28-30 of the identifier encode the storage size, so the width of an
//! item is always derived from its key.

use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const MAX_CONFIG_ITEMS: usize = 32;

pub type ConfigSet = Vec<ConfigItem, MAX_CONFIG_ITEMS>;

const SIZE_SHIFT: u32 = 28;
const SIZE_MASK: u32 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfigKey {
    // L-Band demodulator
    PmpCenterFrequency,
    PmpSearchWindow,
    PmpUseServiceId,
    PmpServiceId,
    PmpDataRate,
    PmpUseDescrambler,
    PmpDescramblerInit,
    PmpUsePrescrambling,
    PmpUniqueWord,

    // Serial ports
    Uart1Baudrate,
    Uart2Baudrate,
    Uart1OutProtUbx,
    Uart1OutProtNmea,
    Uart2OutProtUbx,
    Uart2InProtUbx,
    Uart2InProtSpartn,

    // Navigation
    NavHpgDgnssMode,
    SpartnUseSource,

    // Message output rates
    MsgOutRxmPmpUart2,
    MsgOutRxmCorI2c,
    MsgOutNmeaGgaUart1,
    MsgOutNmeaGsaUart1,
    MsgOutNmeaGsvUart1,
    MsgOutNmeaRmcUart1,
    MsgOutNmeaVtgUart1,
    MsgOutNmeaGllUart1,
    MsgOutNmeaGstUart1,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 27] = [
        ConfigKey::PmpCenterFrequency,
        ConfigKey::PmpSearchWindow,
        ConfigKey::PmpUseServiceId,
        ConfigKey::PmpServiceId,
        ConfigKey::PmpDataRate,
        ConfigKey::PmpUseDescrambler,
        ConfigKey::PmpDescramblerInit,
        ConfigKey::PmpUsePrescrambling,
        ConfigKey::PmpUniqueWord,
        ConfigKey::Uart1Baudrate,
        ConfigKey::Uart2Baudrate,
        ConfigKey::Uart1OutProtUbx,
        ConfigKey::Uart1OutProtNmea,
        ConfigKey::Uart2OutProtUbx,
        ConfigKey::Uart2InProtUbx,
        ConfigKey::Uart2InProtSpartn,
        ConfigKey::NavHpgDgnssMode,
        ConfigKey::SpartnUseSource,
        ConfigKey::MsgOutRxmPmpUart2,
        ConfigKey::MsgOutRxmCorI2c,
        ConfigKey::MsgOutNmeaGgaUart1,
        ConfigKey::MsgOutNmeaGsaUart1,
        ConfigKey::MsgOutNmeaGsvUart1,
        ConfigKey::MsgOutNmeaRmcUart1,
        ConfigKey::MsgOutNmeaVtgUart1,
        ConfigKey::MsgOutNmeaGllUart1,
        ConfigKey::MsgOutNmeaGstUart1,
    ];

    /// Firmware key identifier.
    pub fn id(self) -> u32 {
        match self {
            ConfigKey::PmpCenterFrequency => 0x40b1_0011,
            ConfigKey::PmpSearchWindow => 0x30b1_0012,
            ConfigKey::PmpDataRate => 0x30b1_0013,
            ConfigKey::PmpUseDescrambler => 0x10b1_0014,
            ConfigKey::PmpDescramblerInit => 0x30b1_0015,
            ConfigKey::PmpUseServiceId => 0x10b1_0016,
            ConfigKey::PmpServiceId => 0x30b1_0017,
            ConfigKey::PmpUsePrescrambling => 0x10b1_0019,
            ConfigKey::PmpUniqueWord => 0x50b1_001a,
            ConfigKey::Uart1Baudrate => 0x4052_0001,
            ConfigKey::Uart2Baudrate => 0x4053_0001,
            ConfigKey::Uart1OutProtUbx => 0x1074_0001,
            ConfigKey::Uart1OutProtNmea => 0x1074_0002,
            ConfigKey::Uart2OutProtUbx => 0x1076_0001,
            ConfigKey::Uart2InProtUbx => 0x1075_0001,
            ConfigKey::Uart2InProtSpartn => 0x1075_0005,
            ConfigKey::NavHpgDgnssMode => 0x2014_0011,
            ConfigKey::SpartnUseSource => 0x20a7_0001,
            ConfigKey::MsgOutRxmPmpUart2 => 0x2091_031f,
            ConfigKey::MsgOutRxmCorI2c => 0x2091_06b6,
            ConfigKey::MsgOutNmeaGgaUart1 => 0x2091_00bb,
            ConfigKey::MsgOutNmeaGsaUart1 => 0x2091_00c0,
            ConfigKey::MsgOutNmeaGsvUart1 => 0x2091_00c5,
            ConfigKey::MsgOutNmeaRmcUart1 => 0x2091_00ac,
            ConfigKey::MsgOutNmeaVtgUart1 => 0x2091_00b1,
            ConfigKey::MsgOutNmeaGllUart1 => 0x2091_00ca,
            ConfigKey::MsgOutNmeaGstUart1 => 0x2091_00d4,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.id() == id)
    }

    /// Storage width in bytes, decoded from the size field of the identifier.
    /// Single-bit keys occupy one byte on the wire.
    pub fn width(self) -> u8 {
        match (self.id() >> SIZE_SHIFT) & SIZE_MASK {
            1 | 2 => 1,
            3 => 2,
            4 => 4,
            5 => 8,
            _ => 0,
        }
    }

    /// Boolean keys take a one-byte value of 0 or 1.
    pub fn is_bit(self) -> bool {
        (self.id() >> SIZE_SHIFT) & SIZE_MASK == 1
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::PmpCenterFrequency => "CFG-PMP-CENTER_FREQUENCY",
            ConfigKey::PmpSearchWindow => "CFG-PMP-SEARCH_WINDOW",
            ConfigKey::PmpUseServiceId => "CFG-PMP-USE_SERVICE_ID",
            ConfigKey::PmpServiceId => "CFG-PMP-SERVICE_ID",
            ConfigKey::PmpDataRate => "CFG-PMP-DATA_RATE",
            ConfigKey::PmpUseDescrambler => "CFG-PMP-USE_DESCRAMBLER",
            ConfigKey::PmpDescramblerInit => "CFG-PMP-DESCRAMBLER_INIT",
            ConfigKey::PmpUsePrescrambling => "CFG-PMP-USE_PRESCRAMBLING",
            ConfigKey::PmpUniqueWord => "CFG-PMP-UNIQUE_WORD",
            ConfigKey::Uart1Baudrate => "CFG-UART1-BAUDRATE",
            ConfigKey::Uart2Baudrate => "CFG-UART2-BAUDRATE",
            ConfigKey::Uart1OutProtUbx => "CFG-UART1OUTPROT-UBX",
            ConfigKey::Uart1OutProtNmea => "CFG-UART1OUTPROT-NMEA",
            ConfigKey::Uart2OutProtUbx => "CFG-UART2OUTPROT-UBX",
            ConfigKey::Uart2InProtUbx => "CFG-UART2INPROT-UBX",
            ConfigKey::Uart2InProtSpartn => "CFG-UART2INPROT-SPARTN",
            ConfigKey::NavHpgDgnssMode => "CFG-NAVHPG-DGNSSMODE",
            ConfigKey::SpartnUseSource => "CFG-SPARTN-USE_SOURCE",
            ConfigKey::MsgOutRxmPmpUart2 => "CFG-MSGOUT-UBX_RXM_PMP_UART2",
            ConfigKey::MsgOutRxmCorI2c => "CFG-MSGOUT-UBX_RXM_COR_I2C",
            ConfigKey::MsgOutNmeaGgaUart1 => "CFG-MSGOUT-NMEA_ID_GGA_UART1",
            ConfigKey::MsgOutNmeaGsaUart1 => "CFG-MSGOUT-NMEA_ID_GSA_UART1",
            ConfigKey::MsgOutNmeaGsvUart1 => "CFG-MSGOUT-NMEA_ID_GSV_UART1",
            ConfigKey::MsgOutNmeaRmcUart1 => "CFG-MSGOUT-NMEA_ID_RMC_UART1",
            ConfigKey::MsgOutNmeaVtgUart1 => "CFG-MSGOUT-NMEA_ID_VTG_UART1",
            ConfigKey::MsgOutNmeaGllUart1 => "CFG-MSGOUT-NMEA_ID_GLL_UART1",
            ConfigKey::MsgOutNmeaGstUart1 => "CFG-MSGOUT-NMEA_ID_GST_UART1",
        }
    }

    /// Case-insensitive lookup by firmware name, with or without the `CFG-` prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_uppercase();
        Self::ALL.iter().copied().find(|key| {
            let full = key.name();
            full == wanted || full.strip_prefix("CFG-") == Some(wanted.as_str())
        })
    }
}

impl core::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// One (key, value, width) triple applied to a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub key: ConfigKey,
    pub value: u64,
    pub width: u8,
}

impl ConfigItem {
    pub fn new(key: ConfigKey, value: u64) -> Self {
        Self {
            key,
            value,
            width: key.width(),
        }
    }

    pub fn enable(key: ConfigKey) -> Self {
        Self::new(key, 1)
    }

    pub fn disable(key: ConfigKey) -> Self {
        Self::new(key, 0)
    }

    /// Width is one of 1, 2, 4 or 8 bytes, matches the key, and holds the value.
    /// Boolean keys only hold 0 or 1.
    pub fn is_well_formed(&self) -> bool {
        if !matches!(self.width, 1 | 2 | 4 | 8) || self.width != self.key.width() {
            return false;
        }
        if self.key.is_bit() {
            return self.value <= 1;
        }
        if self.width == 8 {
            return true;
        }
        self.value < (1u64 << (u32::from(self.width) * 8))
    }
}

/// Append an item, reporting the key that did not fit.
pub fn push_item(set: &mut ConfigSet, item: ConfigItem) -> Result<(), ConfigKey> {
    set.push(item).map_err(|rejected| rejected.key)
}
