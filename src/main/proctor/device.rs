use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;
use packet::Packet;

use crate::proctor::call::{Call, Message, ReceivedPacket, Response};
use crate::scenario::Interface;

/// Why a device call did not return a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// `recv_packet` timed out.
    NoPackets,
    /// The harness wants the handler to stop.
    Shutdown,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPackets => write!(f, "no packets arrived before the timeout"),
            Self::Shutdown => write!(f, "the device was shut down"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// The mock network device handed to a handler. Every call blocks until the harness has checked
/// it against the scenario.
///
/// Once a run is over, every call returns [`DeviceError::Shutdown`] (or is ignored, for
/// [`Device::shutdown`]).
#[derive(Clone)]
pub struct Device {
    requests: Sender<Message>,
    interfaces: Arc<[Interface]>,
}

impl Device {
    pub(crate) fn new(requests: Sender<Message>, interfaces: Arc<[Interface]>) -> Self {
        Self {
            requests,
            interfaces,
        }
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface_by_name(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn interface_by_ipaddr(&self, addr: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.ipaddr == Some(addr))
    }

    /// Wait for a packet. `None` waits indefinitely.
    pub fn recv_packet(&self, timeout: Option<Duration>) -> Result<ReceivedPacket, DeviceError> {
        match self.call(Call::RecvPacket { timeout }) {
            Some(Response::Packet(packet)) => Ok(packet),
            Some(Response::NoPackets { after }) => {
                std::thread::sleep(after);
                Err(DeviceError::NoPackets)
            }
            _ => Err(DeviceError::Shutdown),
        }
    }

    /// Send `packet` out of the interface named `interface`.
    pub fn send_packet(&self, interface: impl AsRef<str>, packet: Packet) -> Result<(), DeviceError> {
        let call = Call::SendPacket {
            interface: interface.as_ref().to_string(),
            packet,
        };
        match self.call(call) {
            Some(Response::Accepted) => Ok(()),
            _ => Err(DeviceError::Shutdown),
        }
    }

    /// Tell the harness that the handler is stopping.
    pub fn shutdown(&self) {
        self.call(Call::Shutdown);
    }

    /// Returns `None` if the engine is no longer listening.
    fn call(&self, call: Call) -> Option<Response> {
        log::trace!("device call: {:?}", call.kind());
        let (reply, response) = crossbeam::channel::bounded(1);
        self.requests.send(Message::Call { call, reply }).ok()?;
        response.recv().ok()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("interfaces", &self.interfaces)
            .finish_non_exhaustive()
    }
}
