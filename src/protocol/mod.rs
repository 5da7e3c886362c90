//! AIS-140 device protocol.
//!
//! This module defines what travels over the link: the records a tracking device
//! reports upstream and the short text commands a server writes back. It also holds
//! the [`AisClient`] that ties both directions to a [`Link`](crate::transport::Link),
//! and a minimal [`TrackingServer`] that speaks the other end.
//!
//! # Overview
//!
//! Upstream traffic is one ASCII record per send, `$,<TAG>,<fields>*`, optionally
//! followed by a checksum. The client waits for the peer to acknowledge every byte of
//! a record before reporting success, so a `true` from a send means the server's
//! TCP stack has the data, not merely that it left the local buffer.
//!
//! Downstream traffic has no framing at all. Commands are recovered by scanning the
//! byte stream for `SET`, `GET` or `CLR` followed by an uppercase key.
//!
//! # Key Components
//!
//! - [`AisClient`]: Device session. Connects, sends the four record kinds and delivers
//!   downlink commands to a callback.
//! - [`OutboundPacket`]: A borrowed record tagged with its kind, ready to encode.
//! - [`FrameCounter`]: Sequence numbers for location records.
//! - [`Command`] / [`InboundBuffer`]: Downlink command type and stream reassembly.
//! - [`TrackingServer`]: Listener that logs records and answers emergencies with a
//!   configured command list.
//!
//! # See Also
//!
//! - [`transport`](crate::transport): Socket ownership and the reconnect loop.
//! - [`checksum`](crate::checksum): XOR and CRC-32 checksums used by the records.
mod client;
pub mod command;
pub mod packet;
mod server;
mod thread;

pub use client::{ACK_POLL_INTERVAL, AisClient};
pub use command::{Command, CommandError, ConfigKey, InboundBuffer, Verb, extract_commands};
pub use packet::{
    AlertId, Emergency, FrameCounter, FrameNumber, Heartbeat, Hemisphere, LocationAlert, Login,
    OutboundPacket, PacketStatus, PacketType, Record,
};
pub use server::{
    DEFAULT_DOWNLINK_INTERVAL, DEFAULT_PORT, DEFAULT_WORKERS, ServerError, TrackingServer,
    parse_downlink,
};
pub use thread::PoolError;
