//! The messages passed between a handler's [`Device`](super::device::Device) and the engine.

use std::fmt;
use std::time::{Duration, SystemTime};

use crossbeam::channel::Sender;
use packet::Packet;

/// A mock device call made by the handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    RecvPacket { timeout: Option<Duration> },
    SendPacket { interface: String, packet: Packet },
    Shutdown,
}

impl Call {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::RecvPacket { .. } => CallKind::RecvPacket,
            Self::SendPacket { .. } => CallKind::SendPacket,
            Self::Shutdown => CallKind::Shutdown,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    RecvPacket,
    SendPacket,
    Shutdown,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RecvPacket => "recv_packet",
            Self::SendPacket => "send_packet",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// A packet delivered to the handler by `recv_packet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub timestamp: SystemTime,
    pub interface: String,
    pub packet: Packet,
}

/// The engine's reply to a [`Call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Response {
    Packet(ReceivedPacket),
    /// Nothing arrives. The device waits `after` before telling the handler.
    NoPackets { after: Duration },
    /// The call was accepted (a send or shutdown).
    Accepted,
    /// The handler must stop.
    Shutdown,
}

/// How the handler thread finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum HandlerExit {
    Returned,
    Crashed(String),
}

/// Sent from the handler thread to the engine.
pub(crate) enum Message {
    Call { call: Call, reply: Sender<Response> },
    Finished(HandlerExit),
}
