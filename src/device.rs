use crate::config::ConfigItem;
use crate::keys::KeyMaterial;
use crate::protocol::{CorrectionStatus, DeviceReport, FixStatus, PmpStatus};
use crate::transport::BusTransport;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};

pub const CORRECTION_RECEIVER_ADDRESS: u8 = 0x43;
pub const POSITION_RECEIVER_ADDRESS: u8 = 0x42;

pub type IdentityString = ArrayString<32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRole {
    CorrectionReceiver,
    PositionReceiver,
}

impl core::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceRole::CorrectionReceiver => f.write_str("correction receiver"),
            DeviceRole::PositionReceiver => f.write_str("position receiver"),
        }
    }
}

/// 7-bit bus address plus the role of the device behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    bus_address: u8,
    role: DeviceRole,
}

impl DeviceAddress {
    pub const fn new(bus_address: u8, role: DeviceRole) -> Self {
        Self {
            bus_address: bus_address & 0x7f,
            role,
        }
    }

    pub const fn correction_receiver() -> Self {
        Self::new(CORRECTION_RECEIVER_ADDRESS, DeviceRole::CorrectionReceiver)
    }

    pub const fn position_receiver() -> Self {
        Self::new(POSITION_RECEIVER_ADDRESS, DeviceRole::PositionReceiver)
    }

    pub fn bus_address(&self) -> u8 {
        self.bus_address
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }
}

impl core::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} @ 0x{:02x}", self.role, self.bus_address)
    }
}

/// What the host knows about one receiver, kept current by `poll()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    #[serde(serialize_with = "serialize_identity")]
    pub identity: Option<IdentityString>,
    pub polls: u32,
    pub frames_drained: u32,
    pub soft_resets: u32,
    pub nacks: u32,
    pub last_fix: Option<FixStatus>,
    pub last_pmp: Option<PmpStatus>,
    pub last_correction: Option<CorrectionStatus>,
    pub keys_confirmed: bool,
}

fn serialize_identity<S: serde::Serializer>(
    identity: &Option<IdentityString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match identity {
        Some(id) => serializer.serialize_some(id.as_str()),
        None => serializer.serialize_none(),
    }
}

impl DeviceStatus {
    pub fn apply_report(&mut self, report: &DeviceReport) {
        match report {
            DeviceReport::Fix(fix) => self.last_fix = Some(*fix),
            DeviceReport::Pmp(pmp) => self.last_pmp = Some(*pmp),
            DeviceReport::Correction(correction) => self.last_correction = Some(*correction),
            DeviceReport::KeysConfirmed => self.keys_confirmed = true,
        }
    }

    /// Store an identity string, truncated on a character boundary to fit.
    pub fn set_identity(&mut self, model: &str, firmware: &str) {
        let mut identity = IdentityString::new();
        for c in model.chars().chain(core::iter::once(' ')).chain(firmware.chars()) {
            if identity.try_push(c).is_err() {
                break;
            }
        }
        self.identity = Some(identity);
    }
}

/// Host-side view of one receiver on the shared bus.
///
/// Operations never fail with an error: each reports acceptance as a boolean
/// and the caller aggregates. Every call takes the bus by exclusive borrow, so
/// a call into one handle completes before a call into the other begins.
pub trait DeviceHandle {
    fn address(&self) -> DeviceAddress;

    /// Probe the device and read its identity. Returns false on timeout.
    fn connect<B: BusTransport>(&mut self, bus: &mut B) -> bool;

    /// Apply one item. False on NACK, timeout or malformed width.
    fn set_config<B: BusTransport>(&mut self, bus: &mut B, item: &ConfigItem) -> bool;

    /// Drain one round of pending inbound frames into the device status.
    fn poll<B: BusTransport>(&mut self, bus: &mut B);

    /// Device-local reset that activates pending configuration.
    fn reset_soft<B: BusTransport>(&mut self, bus: &mut B);

    /// Persist configuration. `None` when the device has no non-volatile storage.
    fn save_config<B: BusTransport>(&mut self, bus: &mut B) -> Option<bool>;

    /// Install both keys; true only when the device accepted the pair.
    fn load_keys<B: BusTransport>(
        &mut self,
        bus: &mut B,
        current: &KeyMaterial,
        next: &KeyMaterial,
    ) -> bool;

    fn status(&self) -> &DeviceStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_seven_bit() {
        let address = DeviceAddress::new(0xc3, DeviceRole::CorrectionReceiver);
        assert_eq!(address.bus_address(), 0x43);
        assert_eq!(address.to_string(), "correction receiver @ 0x43");
    }

    #[test]
    fn test_identity_is_truncated() {
        let mut status = DeviceStatus::default();
        status.set_identity("NEO-D9S", "PMP 1.04 with a rather long build suffix");
        let identity = status.identity.unwrap();
        assert_eq!(identity.len(), 32);
        assert!(identity.starts_with("NEO-D9S PMP 1.04"));
    }
}
