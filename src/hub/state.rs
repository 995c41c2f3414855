//! Hub lifecycle state and session counters

use std::fmt;

use crate::{GseError, Result};

/// Lifecycle of a [`DatagramHub`](super::DatagramHub)
///
/// States only move forward, one step at a time:
/// `Idle -> Bound -> Active -> Draining -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HubState {
    /// Created, no socket yet.
    Idle,
    /// Socket bound, processors not set up.
    Bound,
    /// Processors set up, datagrams flowing.
    Active,
    /// Processors closing.
    Draining,
    /// Terminal.
    Closed,
}

impl HubState {
    pub fn as_str(self) -> &'static str {
        match self {
            HubState::Idle => "idle",
            HubState::Bound => "bound",
            HubState::Active => "active",
            HubState::Draining => "draining",
            HubState::Closed => "closed",
        }
    }

    /// The only state this one may move to.
    pub fn next(self) -> Option<HubState> {
        match self {
            HubState::Idle => Some(HubState::Bound),
            HubState::Bound => Some(HubState::Active),
            HubState::Active => Some(HubState::Draining),
            HubState::Draining => Some(HubState::Closed),
            HubState::Closed => None,
        }
    }

    /// Move to `to`, rejecting anything but the single next step.
    pub fn advance(&mut self, to: HubState) -> Result<()> {
        if self.next() != Some(to) {
            return Err(GseError::InvalidState { from: self.as_str(), to: to.as_str() });
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one hub session.
///
/// Sync and CRC problems are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Datagrams received.
    pub datagrams: u64,
    /// Bytes received, headers included.
    pub bytes: u64,
    /// Datagrams shorter than the 16-byte header.
    pub short_packets: u64,
    /// Full-header datagrams whose header CRC did not match.
    pub crc_failures: u64,
    /// Processor `receive` calls that returned an error.
    pub processor_errors: u64,
}
