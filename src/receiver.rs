use crate::config::ConfigItem;
use crate::device::{DeviceAddress, DeviceHandle, DeviceStatus};
use crate::keys::KeyMaterial;
use crate::protocol::{self, Inbound, NackReason, Reply, Request, RequestFrame, MAX_FRAME_SIZE};
use crate::transport::{BusTransport, TransportError};
use tracing::{debug, warn};

pub const MAX_FRAMES_PER_POLL: usize = 8;
pub const DEFAULT_REPLY_TIMEOUT_READS: u32 = 16;

/// `DeviceHandle` speaking the framed request/reply protocol over a `BusTransport`.
#[derive(Debug)]
pub struct Receiver {
    address: DeviceAddress,
    status: DeviceStatus,
    reply_timeout_reads: u32,
    next_seq: u16,
    rx_buffer: [u8; MAX_FRAME_SIZE],
}

impl Receiver {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            status: DeviceStatus::default(),
            reply_timeout_reads: DEFAULT_REPLY_TIMEOUT_READS,
            next_seq: 0,
            rx_buffer: [0; MAX_FRAME_SIZE],
        }
    }

    /// Reads allowed per transaction before giving up. Every read that does
    /// not carry the matching reply counts, reports and stale replies included.
    pub fn with_reply_timeout(mut self, reads: u32) -> Self {
        self.reply_timeout_reads = reads.max(1);
        self
    }

    /// Read a single inbound frame, `None` when nothing is pending or the frame is unusable.
    fn read_inbound<B: BusTransport>(&mut self, bus: &mut B) -> nb::Result<Option<Inbound>, ()> {
        let addr = self.address.bus_address();
        match bus.read(addr, &mut self.rx_buffer) {
            Ok(len) if len > self.rx_buffer.len() => {
                let e = TransportError::Overflow {
                    len,
                    capacity: self.rx_buffer.len(),
                };
                warn!("{}: read failed: {}", self.address, e);
                Err(nb::Error::Other(()))
            }
            Ok(len) => {
                self.status.frames_drained = self.status.frames_drained.saturating_add(1);
                match protocol::decode::<Inbound>(&self.rx_buffer[..len]) {
                    Ok(inbound) => Ok(Some(inbound)),
                    Err(e) => {
                        warn!("{}: dropping undecodable frame: {}", self.address, e);
                        Ok(None)
                    }
                }
            }
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(e)) => {
                warn!("{}: read failed: {}", self.address, e);
                Err(nb::Error::Other(()))
            }
        }
    }

    /// Send a request and wait a bounded number of reads for its reply.
    /// Reports arriving in the meantime update the status; replies to
    /// earlier, timed-out requests are discarded.
    fn transact<B: BusTransport>(&mut self, bus: &mut B, request: &Request) -> Option<Reply> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let frame = match protocol::encode(&RequestFrame {
            seq,
            request: request.clone(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}: cannot encode request: {}", self.address, e);
                return None;
            }
        };

        if let Err(e) = bus.write(self.address.bus_address(), &frame) {
            warn!("{}: write failed: {}", self.address, e);
            return None;
        }

        for _ in 0..self.reply_timeout_reads {
            match self.read_inbound(bus) {
                Ok(Some(Inbound::Reply { seq: echoed, reply })) if echoed == seq => return Some(reply),
                Ok(Some(Inbound::Reply { seq: echoed, reply })) => {
                    debug!("{}: discarding stale reply #{} {:?} (waiting for #{})", self.address, echoed, reply, seq);
                }
                Ok(Some(Inbound::Report(report))) => self.status.apply_report(&report),
                Ok(None) | Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(())) => return None,
            }
        }

        warn!("{}: no reply to #{} after {} reads", self.address, seq, self.reply_timeout_reads);
        None
    }

    fn expect_ack<B: BusTransport>(&mut self, bus: &mut B, request: &Request) -> Option<bool> {
        match self.transact(bus, request) {
            Some(Reply::Ack) => Some(true),
            Some(Reply::Nack { reason: NackReason::Unsupported }) => {
                self.status.nacks = self.status.nacks.saturating_add(1);
                None
            }
            Some(Reply::Nack { reason }) => {
                self.status.nacks = self.status.nacks.saturating_add(1);
                debug!("{}: request NACKed ({:?})", self.address, reason);
                Some(false)
            }
            Some(other) => {
                warn!("{}: unexpected reply {:?}", self.address, other);
                Some(false)
            }
            None => Some(false),
        }
    }
}

impl DeviceHandle for Receiver {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn connect<B: BusTransport>(&mut self, bus: &mut B) -> bool {
        if let Err(e) = bus.probe(self.address.bus_address()) {
            debug!("{}: probe failed: {}", self.address, e);
            self.status.connected = false;
            return false;
        }

        match self.transact(bus, &Request::Identify) {
            Some(Reply::Identity { model, firmware }) => {
                self.status.set_identity(&model, &firmware);
                self.status.connected = true;
                true
            }
            _ => {
                self.status.connected = false;
                false
            }
        }
    }

    fn set_config<B: BusTransport>(&mut self, bus: &mut B, item: &ConfigItem) -> bool {
        if !item.is_well_formed() {
            warn!(
                "{}: {} has malformed width {} for value {}",
                self.address, item.key, item.width, item.value
            );
            return false;
        }
        self.expect_ack(bus, &Request::set_config(item)) == Some(true)
    }

    fn poll<B: BusTransport>(&mut self, bus: &mut B) {
        self.status.polls = self.status.polls.saturating_add(1);

        for _ in 0..MAX_FRAMES_PER_POLL {
            match self.read_inbound(bus) {
                Ok(Some(Inbound::Report(report))) => self.status.apply_report(&report),
                Ok(Some(Inbound::Reply { seq, reply })) => {
                    debug!("{}: discarding late reply #{} {:?}", self.address, seq, reply);
                }
                Ok(None) => {}
                Err(_) => break,
            }
        }
    }

    fn reset_soft<B: BusTransport>(&mut self, bus: &mut B) {
        if self.expect_ack(bus, &Request::SoftReset) == Some(true) {
            self.status.soft_resets = self.status.soft_resets.saturating_add(1);
        } else {
            warn!("{}: soft reset not acknowledged", self.address);
        }
    }

    fn save_config<B: BusTransport>(&mut self, bus: &mut B) -> Option<bool> {
        self.expect_ack(bus, &Request::SaveConfig)
    }

    fn load_keys<B: BusTransport>(
        &mut self,
        bus: &mut B,
        current: &KeyMaterial,
        next: &KeyMaterial,
    ) -> bool {
        self.expect_ack(bus, &Request::load_keys(current, next)) == Some(true)
    }

    fn status(&self) -> &DeviceStatus {
        &self.status
    }
}
