//! Core types shared by the relay and the frame extractor.
//!
//! - [`Packet`] is one datagram from the flight computer, shared immutably by
//!   every processor in a chain
//! - [`DeviceId`] and [`DeviceClass`] identify which instrument a packet or
//!   frame belongs to and how its serial line is configured
//! - [`Frame`] is one validated unit recovered from an instrument byte stream
//! - [`ExtractorStats`] holds the monotonic extraction counters
//!
//! ## Usage Example
//!
//! ```rust
//! use gse_relay::types::{build_packet, DeviceClass, DeviceId};
//!
//! let packet = build_packet(DeviceId(0xC2), 0x00, &[0xAC, 0x00, 0x01]);
//! let id = packet.device_id().unwrap();
//! assert_eq!(id.class(), DeviceClass::Imager);
//! assert_eq!(packet.payload(), &[0xAC, 0x00, 0x01]);
//! ```

mod device;
mod frame;
mod packet;

pub use device::{
    DeviceClass, DeviceId, IMAGER_BAUD, IMAGER_COUNT, SPECTROMETER_BAUD, SPECTROMETER_COUNT,
    SystemKind,
};
pub use frame::{ExtractorStats, Frame, FrameKind};
pub use packet::{
    DEVICE_ID_OFFSET, HEADER_LEN, Packet, SYNC_WORD, TYPE_CODE_OFFSET, build_packet, header_crc,
};
