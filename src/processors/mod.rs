//! Processor implementations
//!
//! | Processor | Routes | Sink |
//! |---|---|---|
//! | [`Forwarder`] | every datagram | the hub socket, to a fixed target |
//! | [`SerialRelay`] | one device | a real serial port |
//! | [`FileLogger`] | known instruments | one file per device |
//! | [`PseudoSerialLogger`] | known instruments | one pty pair per device |
//! | [`TelemetryTally`] | every datagram | in-memory counters |
//!
//! Writers hand payloads to a [`WriteLane`] so the hub never waits on I/O.

mod file_logger;
mod forwarder;
#[cfg(unix)]
mod pseudo_serial;
mod serial_relay;
mod tally;
mod write_lane;

pub use file_logger::{FileLogger, LogOutputs};
pub use forwarder::Forwarder;
#[cfg(unix)]
pub use pseudo_serial::PseudoSerialLogger;
pub use serial_relay::{SerialRelay, resolve_port};
pub use tally::{TallyEntry, TallyHandle, TelemetryTally};
pub use write_lane::{DEFAULT_DRAIN_TIMEOUT, LaneReport, RoutedWriter, Sink, WriteLane};
