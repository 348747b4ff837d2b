use crate::config::ConfigItem;
use crate::keys::KeyMaterial;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const MAX_FRAME_SIZE: usize = 512;

pub type FrameBuffer = heapless::Vec<u8, MAX_FRAME_SIZE>;

// A key load request with two maximum-length keys must fit in one frame
static_assertions::const_assert!(MAX_FRAME_SIZE >= 2 * crate::keys::MAX_KEY_LENGTH_BYTES * 4 + 128);

/// Host to device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Identify,
    SetConfig { key_id: u32, value: u64, width: u8 },
    SoftReset,
    SaveConfig,
    LoadKeys { current: KeyRecord, next: KeyRecord },
}

impl Request {
    pub fn set_config(item: &ConfigItem) -> Self {
        Request::SetConfig {
            key_id: item.key.id(),
            value: item.value,
            width: item.width,
        }
    }

    pub fn load_keys(current: &KeyMaterial, next: &KeyMaterial) -> Self {
        Request::LoadKeys {
            current: KeyRecord::from(current),
            next: KeyRecord::from(next),
        }
    }
}

/// A request as written to the bus. The device echoes `seq` in its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u16,
    pub request: Request,
}

/// Key as carried on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyRecord {
    pub week: u16,
    pub tow: u32,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
}

impl From<&KeyMaterial> for KeyRecord {
    fn from(material: &KeyMaterial) -> Self {
        Self {
            week: material.gps_week(),
            tow: material.gps_tow(),
            key: material.key_bytes().to_vec(),
        }
    }
}

impl core::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("week", &self.week)
            .field("tow", &self.tow)
            .field("key_len", &self.key.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackReason {
    Rejected,
    Unsupported,
    Malformed,
}

/// Device to host, in answer to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Ack,
    Nack { reason: NackReason },
    Identity { model: String, firmware: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixType {
    NoFix,
    DeadReckoning,
    Fix2D,
    Fix3D,
    GnssDeadReckoning,
    TimeOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarrierSolution {
    None,
    Float,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixStatus {
    pub fix_type: FixType,
    pub carrier: CarrierSolution,
    pub satellites: u8,
}

/// L-Band demodulator state of the correction receiver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PmpStatus {
    pub locked: bool,
    pub ebno_db: f32,
}

/// Decode state of the last correction message seen by the position receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionStatus {
    pub msg_type: u16,
    pub decrypted: bool,
    pub used: bool,
}

/// Unsolicited device output drained by `poll()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceReport {
    Fix(FixStatus),
    Pmp(PmpStatus),
    Correction(CorrectionStatus),
    KeysConfirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inbound {
    Reply { seq: u16, reply: Reply },
    Report(DeviceReport),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidJson(String),
    #[error("message of {len} bytes exceeds frame size")]
    MessageTooLarge { len: usize },
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

pub fn encode<T: Serialize>(message: &T) -> Result<FrameBuffer, ProtocolError> {
    let bytes = serde_json::to_vec(message).map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
    FrameBuffer::from_slice(&bytes).map_err(|()| ProtocolError::MessageTooLarge { len: bytes.len() })
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge { len: frame.len() });
    }
    serde_json::from_slice(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}
