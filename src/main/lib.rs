//! A conformance harness for packet-processing code.
//!
//! A handler (for example a router or a small network stack) is given a mock [`Device`] and run
//! against a [`Scenario`]: an ordered list of packets it should receive and send. Every device call
//! is checked against the next expected event, each event has a deadline, and the run ends with a
//! report of which events passed.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use netproctor::proctor::{run_scenario, Device};
//! use netproctor::scenario::{InputEvent, Interface, OutputEvent, Scenario};
//! use packet::{create_ip_arp_reply, create_ip_arp_request, EthAddr};
//!
//! let mac = |s: &str| s.parse::<EthAddr>().unwrap();
//! let ip = |s: &str| s.parse().unwrap();
//!
//! let mut scenario = Scenario::new("ARP request").with_timeout(Duration::from_secs(1));
//! scenario.add_interface(
//!     Interface::new("eth0", mac("40:00:00:00:00:01")).with_ipaddr(ip("10.0.0.1"), ip("255.0.0.0")),
//! );
//! scenario
//!     .expect(
//!         InputEvent::new("eth0", create_ip_arp_request(mac("30:00:00:00:00:01"), ip("10.0.0.2"), ip("10.0.0.1"))),
//!         "Incoming ARP request",
//!     )
//!     .expect(
//!         OutputEvent::new(
//!             "eth0",
//!             create_ip_arp_reply(mac("40:00:00:00:00:01"), mac("30:00:00:00:00:01"), ip("10.0.0.1"), ip("10.0.0.2")),
//!         ),
//!         "Outgoing ARP reply",
//!     );
//!
//! let result = run_scenario(&mut scenario, |device: Device| {
//!     let received = device.recv_packet(None)?;
//!     // ... build and send the reply
//!     Ok(())
//! });
//! print!("{result}");
//! ```
//!
//! [`Device`]: proctor::Device
//! [`Scenario`]: scenario::Scenario

pub mod core;
pub mod proctor;
pub mod scenario;
pub mod utility;
