//! End-to-end runs of real handlers against scenarios.

mod back_reference;
mod lifecycle;

use std::net::Ipv4Addr;
use std::time::Duration;

use packet::{create_ip_arp_reply, create_ip_arp_request, EthAddr, Header, HeaderKind, Packet};

use crate::proctor::{Counts, Device, DeviceError, ExecutionResult, ReceivedPacket};
use crate::scenario::{InputEvent, Interface, OutputEvent, Scenario, TimeoutEvent};

pub fn mac(s: &str) -> EthAddr {
    s.parse().unwrap()
}

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

pub fn counts(result: &ExecutionResult) -> (usize, usize, usize) {
    let Counts {
        passed,
        failed,
        not_attempted,
    } = result.counts();
    (passed, failed, not_attempted)
}

pub const CLIENT_MAC: &str = "30:00:00:00:00:01";
pub const CLIENT_IP: &str = "10.10.12.34";

/// A router with four interfaces that gets one ARP request on router-eth3, must answer it, and
/// must answer it again when no further packets arrive.
pub fn arp_scenario(timeout: Duration) -> Scenario {
    let mut s = Scenario::new("ARP request");
    s.set_timeout(timeout);
    s.add_interface(
        Interface::new("router-eth0", mac("40:00:00:00:00:01"))
            .with_ipaddr(ip("192.168.1.1"), ip("255.255.255.0")),
    )
    .add_interface(
        Interface::new("router-eth1", mac("40:00:00:00:00:02"))
            .with_ipaddr(ip("10.0.1.1"), ip("255.255.0.0")),
    )
    .add_interface(
        Interface::new("router-eth2", mac("40:00:00:00:00:03"))
            .with_ipaddr(ip("172.16.42.1"), ip("255.255.255.252")),
    )
    .add_interface(
        Interface::new("router-eth3", mac("40:00:00:00:00:04"))
            .with_ipaddr(ip("10.10.0.1"), ip("255.255.0.0")),
    );

    let request = create_ip_arp_request(mac(CLIENT_MAC), ip(CLIENT_IP), ip("10.10.0.1"));
    let reply = create_ip_arp_reply(
        mac("40:00:00:00:00:04"),
        mac(CLIENT_MAC),
        ip("10.10.0.1"),
        ip(CLIENT_IP),
    );

    s.expect(InputEvent::new("router-eth3", request), "Incoming ARP request")
        .expect(
            OutputEvent::new("router-eth3", reply.clone()),
            "Outgoing ARP reply (1)",
        )
        .expect(
            TimeoutEvent::new(Duration::from_millis(50)),
            "Timeout on recv",
        )
        .expect(OutputEvent::new("router-eth3", reply), "Outgoing ARP reply (2)");
    s
}

/// The reply a router should send for an ARP request received on one of its interfaces.
pub fn arp_reply_for(device: &Device, received: &ReceivedPacket) -> anyhow::Result<Packet> {
    let Some(Header::Arp(request)) = received.packet.header(HeaderKind::Arp) else {
        anyhow::bail!("not an ARP packet: {}", received.packet);
    };
    let Some(intf) = device.interface_by_name(&received.interface) else {
        anyhow::bail!("no interface named {}", received.interface);
    };
    let Some(ipaddr) = intf.ipaddr else {
        anyhow::bail!("{} has no address", intf.name);
    };
    Ok(create_ip_arp_reply(
        intf.ethaddr,
        request.sender_hwaddr,
        ipaddr,
        request.sender_protoaddr,
    ))
}

/// A correct handler: answers every ARP request, and repeats the last answer whenever a receive
/// times out.
pub fn arp_responder(device: Device) -> anyhow::Result<()> {
    let mut last: Option<(String, Packet)> = None;
    loop {
        match device.recv_packet(Some(Duration::from_millis(100))) {
            Ok(received) => {
                let reply = arp_reply_for(&device, &received)?;
                device.send_packet(&received.interface, reply.clone())?;
                last = Some((received.interface, reply));
            }
            Err(DeviceError::NoPackets) => {
                if let Some((interface, reply)) = &last {
                    device.send_packet(interface, reply.clone())?;
                }
            }
            Err(DeviceError::Shutdown) => return Ok(()),
        }
    }
}

/// Plays the four ARP events in order, then returns.
pub fn arp_exact(device: &Device) -> anyhow::Result<()> {
    let received = device.recv_packet(None)?;
    let reply = arp_reply_for(device, &received)?;
    device.send_packet(&received.interface, reply.clone())?;
    match device.recv_packet(Some(Duration::from_millis(10))) {
        Err(DeviceError::NoPackets) => {}
        other => anyhow::bail!("expected a timeout, got {other:?}"),
    }
    device.send_packet(&received.interface, reply)?;
    Ok(())
}
