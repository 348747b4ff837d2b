//! In-process bus with two simulated receivers.
//!
//! Lets the whole correction chain run without hardware. Each simulated
//! device answers the framed protocol, keeps its own configuration store and
//! emits the status reports a real receiver would, with scripted faults for
//! exercising the failure paths.

use crate::config::ConfigKey;
use crate::deployment::DGNSS_MODE_RTK_FIXED;
use crate::device::{DeviceAddress, DeviceRole};
use crate::keys::GpsTime;
use crate::protocol::{
    self, CarrierSolution, CorrectionStatus, DeviceReport, FixStatus, FixType, FrameBuffer, Inbound,
    NackReason, PmpStatus, Reply, Request, RequestFrame,
};
use crate::retry::Sleeper;
use crate::transport::{BusTransport, TransportError};
use heapless::spsc::Queue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

const OUTBOUND_QUEUE_DEPTH: usize = 16;
const DEFAULT_REPORT_INTERVAL: u32 = 4;
const MAX_BUS_LOG: usize = 4096;

// SPARTN message type carried over L-Band
const SPARTN_MSG_TYPE_OCB: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusOp {
    Probe,
    Write,
    Read,
}

/// One entry in the bus access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusAccess {
    pub address: u8,
    pub op: BusOp,
}

/// Scripted misbehaviour of one simulated device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceFaults {
    /// Probes that fail before the device starts answering.
    pub probe_failures: u32,
    /// Keys answered with a NACK.
    pub rejected_keys: Vec<ConfigKey>,
    pub reject_key_load: bool,
    pub persist_unsupported: bool,
    pub persist_fails: bool,
    /// Accept requests but never reply.
    pub silent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InstalledKeys {
    current_from: GpsTime,
    next_from: GpsTime,
}

pub struct SimulatedDevice {
    address: DeviceAddress,
    model: &'static str,
    firmware: &'static str,
    faults: DeviceFaults,
    probes: u32,
    ram: BTreeMap<ConfigKey, u64>,
    active: BTreeMap<ConfigKey, u64>,
    flash: BTreeMap<ConfigKey, u64>,
    resets: u32,
    keys: Option<InstalledKeys>,
    outbound: Queue<FrameBuffer, OUTBOUND_QUEUE_DEPTH>,
    idle_reads: u32,
    report_interval: u32,
}

impl core::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("address", &self.address)
            .field("model", &self.model)
            .field("faults", &self.faults)
            .field("probes", &self.probes)
            .field("resets", &self.resets)
            .field("keys", &self.keys)
            .field("pending_frames", &self.outbound.len())
            .finish()
    }
}

impl SimulatedDevice {
    pub fn new(address: DeviceAddress) -> Self {
        let (model, firmware) = match address.role() {
            DeviceRole::CorrectionReceiver => ("NEO-D9S", "PMP 1.04"),
            DeviceRole::PositionReceiver => ("ZED-F9P", "HPG 1.32"),
        };
        Self {
            address,
            model,
            firmware,
            faults: DeviceFaults::default(),
            probes: 0,
            ram: BTreeMap::new(),
            active: BTreeMap::new(),
            flash: BTreeMap::new(),
            resets: 0,
            keys: None,
            outbound: Queue::new(),
            idle_reads: 0,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn faults_mut(&mut self) -> &mut DeviceFaults {
        &mut self.faults
    }

    pub fn probes(&self) -> u32 {
        self.probes
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Value written for `key`, whether or not it is active yet.
    pub fn config_value(&self, key: ConfigKey) -> Option<u64> {
        self.ram.get(&key).copied()
    }

    pub fn active_value(&self, key: ConfigKey) -> Option<u64> {
        self.active.get(&key).copied()
    }

    pub fn persisted_value(&self, key: ConfigKey) -> Option<u64> {
        self.flash.get(&key).copied()
    }

    pub fn keys_installed(&self) -> Option<(GpsTime, GpsTime)> {
        self.keys.map(|k| (k.current_from, k.next_from))
    }

    pub fn set_report_interval(&mut self, reads: u32) {
        self.report_interval = reads.max(1);
    }

    /// Queue an unsolicited report, as if the firmware had produced it.
    pub fn inject_report(&mut self, report: DeviceReport) -> bool {
        self.enqueue(&Inbound::Report(report))
    }

    fn enqueue(&mut self, inbound: &Inbound) -> bool {
        match protocol::encode(inbound) {
            Ok(frame) => self.outbound.enqueue(frame).is_ok(),
            Err(_) => false,
        }
    }

    fn reply(&mut self, seq: u16, reply: Reply) {
        if self.faults.silent {
            return;
        }
        if !self.enqueue(&Inbound::Reply { seq, reply }) {
            debug!("{}: outbound queue full, reply lost", self.address);
        }
    }

    fn probe(&mut self) -> Result<(), TransportError> {
        self.probes += 1;
        if self.faults.probe_failures > 0 {
            self.faults.probe_failures -= 1;
            return Err(TransportError::Nack(self.address.bus_address()));
        }
        Ok(())
    }

    fn handle(&mut self, seq: u16, request: Request) {
        match request {
            Request::Identify => self.reply(seq, Reply::Identity {
                model: self.model.to_string(),
                firmware: self.firmware.to_string(),
            }),
            Request::SetConfig { key_id, value, width } => {
                let reply = match ConfigKey::from_id(key_id) {
                    Some(key) if key.width() != width => Reply::Nack {
                        reason: NackReason::Malformed,
                    },
                    Some(key) if self.faults.rejected_keys.contains(&key) => Reply::Nack {
                        reason: NackReason::Rejected,
                    },
                    Some(key) => {
                        self.ram.insert(key, value);
                        // Receivers apply RAM-layer writes at once, the demodulator waits for a reset
                        if !self.is_demodulator_key(key) {
                            self.active.insert(key, value);
                        }
                        Reply::Ack
                    }
                    None => Reply::Nack {
                        reason: NackReason::Unsupported,
                    },
                };
                self.reply(seq, reply);
            }
            Request::SoftReset => {
                self.resets += 1;
                self.active = self.ram.clone();
                self.reply(seq, Reply::Ack);
                if self.demodulator_tuned() {
                    self.inject_report(DeviceReport::Pmp(PmpStatus {
                        locked: true,
                        ebno_db: 9.5,
                    }));
                }
            }
            Request::SaveConfig => {
                let reply = if self.faults.persist_unsupported {
                    Reply::Nack {
                        reason: NackReason::Unsupported,
                    }
                } else if self.faults.persist_fails {
                    Reply::Nack {
                        reason: NackReason::Rejected,
                    }
                } else {
                    self.flash = self.ram.clone();
                    Reply::Ack
                };
                self.reply(seq, reply);
            }
            Request::LoadKeys { current, next } => {
                let current_from = GpsTime::new(current.week, current.tow);
                let next_from = GpsTime::new(next.week, next.tow);
                let usable = !self.faults.reject_key_load
                    && !current.key.is_empty()
                    && !next.key.is_empty()
                    && next_from > current_from;

                if usable {
                    self.keys = Some(InstalledKeys {
                        current_from,
                        next_from,
                    });
                    self.reply(seq, Reply::Ack);
                    self.inject_report(DeviceReport::KeysConfirmed);
                } else {
                    self.reply(seq, Reply::Nack {
                        reason: NackReason::Rejected,
                    });
                }
            }
        }
    }

    fn is_demodulator_key(&self, key: ConfigKey) -> bool {
        self.address.role() == DeviceRole::CorrectionReceiver && key.name().starts_with("CFG-PMP-")
    }

    fn demodulator_tuned(&self) -> bool {
        self.address.role() == DeviceRole::CorrectionReceiver
            && self.active.contains_key(&ConfigKey::PmpCenterFrequency)
    }

    fn corrections_flowing(&self) -> bool {
        self.keys.is_some()
            && self.active.get(&ConfigKey::Uart2InProtSpartn) == Some(&1)
            && self.active.get(&ConfigKey::SpartnUseSource).is_some()
    }

    /// Periodic output once the device is operating.
    fn periodic_report(&self) -> Option<DeviceReport> {
        match self.address.role() {
            DeviceRole::CorrectionReceiver if self.demodulator_tuned() => {
                Some(DeviceReport::Pmp(PmpStatus {
                    locked: true,
                    ebno_db: 9.5,
                }))
            }
            DeviceRole::CorrectionReceiver => None,
            DeviceRole::PositionReceiver => {
                let carrier = if self.corrections_flowing()
                    && self.active.get(&ConfigKey::NavHpgDgnssMode) == Some(&DGNSS_MODE_RTK_FIXED)
                {
                    CarrierSolution::Fixed
                } else {
                    CarrierSolution::None
                };
                if self.corrections_flowing() && self.idle_reads % (self.report_interval * 2) == 0 {
                    return Some(DeviceReport::Correction(CorrectionStatus {
                        msg_type: SPARTN_MSG_TYPE_OCB,
                        decrypted: true,
                        used: true,
                    }));
                }
                Some(DeviceReport::Fix(FixStatus {
                    fix_type: FixType::Fix3D,
                    carrier,
                    satellites: 18,
                }))
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> nb::Result<usize, TransportError> {
        if self.outbound.is_empty() {
            self.idle_reads = self.idle_reads.wrapping_add(1);
            if self.idle_reads % self.report_interval == 0 {
                if let Some(report) = self.periodic_report() {
                    self.inject_report(report);
                }
            }
        }

        let frame = self.outbound.dequeue().ok_or(nb::Error::WouldBlock)?;
        if frame.len() > buf.len() {
            return Err(nb::Error::Other(TransportError::Overflow {
                len: frame.len(),
                capacity: buf.len(),
            }));
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }
}

/// Shared bus carrying both simulated receivers.
#[derive(Debug)]
pub struct SimulatedBus {
    devices: Vec<SimulatedDevice>,
    log: Vec<BusAccess>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            log: Vec::new(),
        }
    }

    /// Bus with a correction and a position receiver at the default addresses.
    pub fn with_default_receivers() -> Self {
        let mut bus = Self::new();
        bus.attach(SimulatedDevice::new(DeviceAddress::correction_receiver()));
        bus.attach(SimulatedDevice::new(DeviceAddress::position_receiver()));
        bus
    }

    pub fn attach(&mut self, device: SimulatedDevice) {
        self.devices.retain(|d| d.address.bus_address() != device.address.bus_address());
        self.devices.push(device);
    }

    pub fn device(&self, address: u8) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.address.bus_address() == address)
    }

    pub fn device_mut(&mut self, address: u8) -> Option<&mut SimulatedDevice> {
        self.devices.iter_mut().find(|d| d.address.bus_address() == address)
    }

    pub fn role(&self, role: DeviceRole) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.address.role() == role)
    }

    pub fn role_mut(&mut self, role: DeviceRole) -> Option<&mut SimulatedDevice> {
        self.devices.iter_mut().find(|d| d.address.role() == role)
    }

    pub fn log(&self) -> &[BusAccess] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn record(&mut self, address: u8, op: BusOp) {
        if self.log.len() >= MAX_BUS_LOG {
            self.log.remove(0);
        }
        self.log.push(BusAccess { address, op });
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::with_default_receivers()
    }
}

impl BusTransport for SimulatedBus {
    fn probe(&mut self, address: u8) -> Result<(), TransportError> {
        self.record(address, BusOp::Probe);
        self.device_mut(address)
            .ok_or(TransportError::NoDevice(address))?
            .probe()
    }

    fn write(&mut self, address: u8, frame: &[u8]) -> Result<(), TransportError> {
        self.record(address, BusOp::Write);
        let device = self.device_mut(address).ok_or(TransportError::NoDevice(address))?;

        match protocol::decode::<RequestFrame>(frame) {
            Ok(RequestFrame { seq, request }) => {
                trace!("0x{:02x} <- #{} {:?}", address, seq, request);
                device.handle(seq, request);
            }
            // Nothing to echo, so nothing to answer
            Err(e) => debug!("0x{:02x}: dropping undecodable request: {}", address, e),
        }
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> nb::Result<usize, TransportError> {
        self.record(address, BusOp::Read);
        self.device_mut(address)
            .ok_or(nb::Error::Other(TransportError::NoDevice(address)))?
            .read(buf)
    }
}

/// Sleeper that only records the requested delays.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    sleeps: Vec<Duration>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> &[Duration] {
        &self.sleeps
    }

    pub fn total(&self) -> Duration {
        self.sleeps.iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
    }
}
