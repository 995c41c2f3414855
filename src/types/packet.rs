//! Flight computer datagrams

use crc::{CRC_16_MODBUS, Crc};
use std::sync::Arc;

use super::DeviceId;

/// Length of the fixed packet header preceding the payload.
pub const HEADER_LEN: usize = 16;

/// Offset of the device/system id byte.
pub const DEVICE_ID_OFFSET: usize = 4;

/// Offset of the telemetry type code byte.
pub const TYPE_CODE_OFFSET: usize = 5;

/// Sync word at the start of every flight computer packet.
pub const SYNC_WORD: [u8; 2] = [0x90, 0xEB];

const HEADER_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// One datagram as received from the socket.
///
/// The bytes are shared (`Arc`) and never mutated, so every processor in the
/// chain sees exactly what came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Arc<[u8]>,
}

impl Packet {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// Whole datagram, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the datagram is long enough to carry the full header.
    pub fn has_full_header(&self) -> bool {
        self.data.len() >= HEADER_LEN
    }

    /// Device/system id byte, if present.
    pub fn device_id(&self) -> Option<DeviceId> {
        self.data.get(DEVICE_ID_OFFSET).copied().map(DeviceId)
    }

    /// Telemetry type code byte, if present.
    pub fn type_code(&self) -> Option<u8> {
        self.data.get(TYPE_CODE_OFFSET).copied()
    }

    /// Bytes after the header; empty for short packets.
    pub fn payload(&self) -> &[u8] {
        self.data.get(HEADER_LEN..).unwrap_or(&[])
    }

    /// Whether the packet starts with the flight computer sync word.
    pub fn has_sync(&self) -> bool {
        self.data.starts_with(&SYNC_WORD)
    }

    /// Check the CRC-16/MODBUS stored little-endian at bytes 2..4.
    ///
    /// The CRC covers the whole packet with the CRC field itself zeroed.
    pub fn crc_valid(&self) -> bool {
        if self.data.len() < DEVICE_ID_OFFSET {
            return false;
        }
        let stored = u16::from_le_bytes([self.data[2], self.data[3]]);
        stored == header_crc(&self.data)
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Packet::new(data)
    }
}

impl From<&[u8]> for Packet {
    fn from(data: &[u8]) -> Self {
        Packet::new(data)
    }
}

/// CRC-16/MODBUS over `data` with bytes 2..4 treated as zero.
pub fn header_crc(data: &[u8]) -> u16 {
    let mut digest = HEADER_CRC.digest();
    digest.update(&data[..2.min(data.len())]);
    if data.len() > 2 {
        digest.update(&[0, 0][..(data.len() - 2).min(2)]);
    }
    if data.len() > 4 {
        digest.update(&data[4..]);
    }
    digest.finalize()
}

/// Build a packet with a valid header around `payload`.
///
/// Useful for feeding synthetic traffic into a hub.
pub fn build_packet(device_id: DeviceId, type_code: u8, payload: &[u8]) -> Packet {
    let mut data = vec![0u8; HEADER_LEN];
    data[..2].copy_from_slice(&SYNC_WORD);
    data[DEVICE_ID_OFFSET] = device_id.0;
    data[TYPE_CODE_OFFSET] = type_code;
    data[6..8].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    data.extend_from_slice(payload);
    let crc = header_crc(&data);
    data[2..4].copy_from_slice(&crc.to_le_bytes());
    Packet::new(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_are_read_at_fixed_offsets() {
        let packet = build_packet(DeviceId(0xC0), 0x07, &[1, 2, 3, 4]);
        assert_eq!(packet.len(), HEADER_LEN + 4);
        assert_eq!(packet.device_id(), Some(DeviceId(0xC0)));
        assert_eq!(packet.type_code(), Some(0x07));
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);
        assert!(packet.has_sync());
        assert!(packet.has_full_header());
    }

    #[test]
    fn short_packets_have_empty_payload() {
        let packet = Packet::from(vec![0x90, 0xEB, 0, 0, 0xD0]);
        assert!(!packet.has_full_header());
        assert_eq!(packet.device_id(), Some(DeviceId(0xD0)));
        assert_eq!(packet.type_code(), None);
        assert!(packet.payload().is_empty());

        let tiny = Packet::from(vec![0x90]);
        assert_eq!(tiny.device_id(), None);
        assert!(!tiny.crc_valid());
    }

    #[test]
    fn crc_detects_corruption() {
        let packet = build_packet(DeviceId::HOUSEKEEPING, 0x02, &[9; 32]);
        assert!(packet.crc_valid());

        let mut corrupted = packet.as_bytes().to_vec();
        corrupted[HEADER_LEN + 3] ^= 0x01;
        assert!(!Packet::from(corrupted).crc_valid());
    }

    #[test]
    fn crc_matches_reference_command_packet() {
        // Route-telemetry command as sent by the flight team: sync, crc, id, type.
        let command = [0x90, 0xEB, 0xE3, 0x56, 0xA0, 0xA1, 0x00, 0x04, 0xC0, 0xA8, 0x02, 0x01];
        assert!(Packet::from(&command[..]).crc_valid());
    }
}
