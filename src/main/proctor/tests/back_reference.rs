use std::time::Duration;

use packet::headers::{ip_protocol, Ipv4Header, NullHeader, UdpHeader};
use packet::{FieldValue, Header, Packet};
use rand::Rng;

use super::*;
use crate::proctor::{run_scenario, Verdict};
use crate::scenario::compare::MatchField;
use crate::scenario::event::{BackReference, EventKind, OutputRef};
use crate::scenario::{FailureKind, InterfaceKind};

const SERVER_PORT: u16 = 10000;

fn udp(src_port: u16, dst_port: u16, payload: &'static [u8]) -> Packet {
    Packet::new()
        + NullHeader::default()
        + Ipv4Header {
            src: ip("127.0.0.1"),
            dst: ip("127.0.0.1"),
            protocol: ip_protocol::UDP,
            ..Default::default()
        }
        + UdpHeader { src_port, dst_port }
        + Header::raw(payload)
}

fn port_reference() -> BackReference {
    BackReference::new(
        OutputRef::LastOn("lo0".to_string()),
        "udp.src_port".parse().unwrap(),
        "udp.dst_port".parse().unwrap(),
    )
}

/// An app sends a datagram from an ephemeral port and must get the server's answer on that port.
fn echo_scenario() -> Scenario {
    let mut s = Scenario::new("UDP echo");
    s.set_timeout(Duration::from_secs(2));
    s.add_interface(Interface::new("lo0", EthAddr::ZERO).with_kind(InterfaceKind::Loopback));
    s.expect(
        OutputEvent::new("lo0", udp(0, SERVER_PORT, b"Hello stack")).wildcard(MatchField::TpSrc),
        "App sends a datagram from an ephemeral port",
    )
    .expect(
        InputEvent::new("lo0", udp(SERVER_PORT, 0, b"Hello app")).copy_from(port_reference()),
        "Server replies to the ephemeral port",
    );
    s
}

fn dst_port(packet: &Packet) -> Option<u16> {
    match packet.field(&"udp.dst_port".parse().unwrap()) {
        Some(FieldValue::U16(port)) => Some(port),
        _ => None,
    }
}

/// Sends from `port`, then checks that the reply comes back to `port`.
fn echo_client(port: u16) -> impl FnOnce(Device) -> anyhow::Result<()> + Send + 'static {
    move |device| {
        device.send_packet("lo0", udp(port, SERVER_PORT, b"Hello stack"))?;
        let reply = device.recv_packet(None)?;
        anyhow::ensure!(
            dst_port(&reply.packet) == Some(port),
            "reply went to {:?} instead of {port}",
            dst_port(&reply.packet)
        );
        Ok(())
    }
}

#[test]
fn test_reply_to_ephemeral_port() {
    let port = rand::thread_rng().gen_range(49152..=65535);
    let mut scenario = echo_scenario();
    let result = run_scenario(&mut scenario, echo_client(port));

    assert_eq!(counts(&result), (2, 0, 0));
    assert_eq!(result.verdict(), Verdict::AllPassed);
    assert_eq!(scenario.observed_outputs().len(), 1);
}

#[test]
fn test_wildcarded_field_may_have_any_value() {
    let mut rng = rand::thread_rng();
    let mut scenario = echo_scenario();
    for port in [1, 65535].into_iter().chain((0..5).map(|_| rng.gen_range(1024..=65535))) {
        let result = run_scenario(&mut scenario, echo_client(port));
        assert_eq!(result.verdict(), Verdict::AllPassed, "port {port}");
    }
}

#[test]
fn test_resolution_leaves_scenario_unchanged() {
    let mut scenario = echo_scenario();

    for port in [40000, 50000] {
        let result = run_scenario(&mut scenario, echo_client(port));
        assert_eq!(result.verdict(), Verdict::AllPassed);

        let EventKind::Input(input) = &scenario.events()[1].kind else {
            panic!("second event should be an input");
        };
        assert_eq!(dst_port(&input.packet), Some(0));
        assert_eq!(
            dst_port(&input.resolve(scenario.observed_outputs()).unwrap()),
            Some(port)
        );
    }
}

#[test]
fn test_unresolved_reference() {
    let mut scenario = Scenario::new("reply before request");
    scenario.set_timeout(Duration::from_secs(2));
    scenario
        .add_interface(Interface::new("lo0", EthAddr::ZERO))
        .expect(
            InputEvent::new("lo0", udp(SERVER_PORT, 0, b"Hello app")).copy_from(port_reference()),
            "Server replies",
        )
        .expect(
            OutputEvent::new("lo0", udp(0, SERVER_PORT, b"Hello stack")),
            "App sends",
        );

    let result = run_scenario(&mut scenario, |device| {
        device.recv_packet(None)?;
        Ok(())
    });

    assert_eq!(counts(&result), (0, 1, 1));
    let failure = result.failures().next().unwrap();
    assert_eq!(failure.kind, FailureKind::UnresolvedReference);
    assert_eq!(
        failure.message,
        "nothing has been observed as the last output on lo0 yet"
    );
}

#[test]
fn test_partial_match_ignores_payload() {
    let mut scenario = Scenario::new("partial");
    scenario.set_timeout(Duration::from_secs(2));
    scenario.add_interface(Interface::new("lo0", EthAddr::ZERO)).expect(
        OutputEvent::new("lo0", udp(1234, SERVER_PORT, b"Hello stack")).partial(),
        "App sends anything to the server",
    );

    let result = run_scenario(&mut scenario, |device| {
        device.send_packet("lo0", udp(1234, SERVER_PORT, b"a different payload"))?;
        Ok(())
    });
    assert_eq!(result.verdict(), Verdict::AllPassed);

    let result = run_scenario(&mut scenario, |device| {
        device.send_packet("lo0", udp(1235, SERVER_PORT, b"Hello stack"))?;
        Ok(())
    });
    assert_eq!(
        result.failures().next().unwrap().message,
        "a partial match failed. tp_src is wrong (is 1235 but should be 1234)"
    );
}
