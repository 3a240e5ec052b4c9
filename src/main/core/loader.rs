//! Loading scenarios from YAML files.
//!
//! A scenario file looks like:
//!
//! ```yaml
//! name: ARP request
//! timeout: 2 s
//! interfaces:
//!   - { name: router-eth3, ethaddr: "40:00:00:00:00:04", ipaddr: 10.10.0.1, netmask: 255.255.0.0 }
//! events:
//!   - description: Incoming ARP request
//!     input:
//!       interface: router-eth3
//!       packet:
//!         - ethernet: { src: "30:00:00:00:00:01", dst: "ff:ff:ff:ff:ff:ff", ethertype: 0x0806 }
//!         - arp: { operation: 1, sender_hwaddr: "30:00:00:00:00:01", ... }
//!   - description: Timeout on recv
//!     timeout: 500 ms
//! ```
//!
//! Output events take `exact` (default true) and `wildcards`. Input events may copy fields from a
//! previously observed output with `copy_from_last_output`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use packet::{FieldPath, Packet};
use serde::Deserialize;

use crate::scenario::compare::Wildcard;
use crate::scenario::event::{BackReference, OutputRef};
use crate::scenario::{EventKind, InputEvent, Interface, OutputEvent, Scenario, TimeoutEvent};
use crate::utility::units::Time;

#[derive(Debug)]
pub enum LoadError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_yaml::Error),
    Invalid(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "could not read {path:?}: {source}"),
            Self::Parse(e) => write!(f, "could not parse scenario: {e}"),
            Self::Invalid(msg) => write!(f, "invalid scenario: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_yaml::Error> for LoadError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    name: String,
    #[serde(default)]
    timeout: Option<Time>,
    #[serde(default)]
    interfaces: Vec<Interface>,
    events: Vec<EventFile>,
}

// `deny_unknown_fields` can't be combined with `flatten`
#[derive(Debug, Deserialize)]
struct EventFile {
    description: String,
    #[serde(flatten)]
    kind: EventKindFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EventKindFile {
    Input(InputFile),
    Output(OutputFile),
    Timeout(Time),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputFile {
    interface: String,
    packet: Packet,
    #[serde(default)]
    copy_from_last_output: Vec<CopyFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CopyFile {
    /// Copy from the last output on this interface. Defaults to the input's interface.
    #[serde(default)]
    interface: Option<String>,
    /// Copy from the output of this event instead (1-based, like the report).
    #[serde(default)]
    event: Option<usize>,
    from: FieldPath,
    to: FieldPath,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputFile {
    interface: String,
    packet: Packet,
    #[serde(default = "default_exact")]
    exact: bool,
    #[serde(default)]
    wildcards: Vec<Wildcard>,
}

fn default_exact() -> bool {
    true
}

impl Scenario {
    /// Parse and validate a scenario from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadError> {
        let file: ScenarioFile = serde_yaml::from_str(yaml)?;
        build(file)
    }
}

/// Read, parse, and validate the scenario file at `path`.
pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario, LoadError> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let scenario = Scenario::from_yaml_str(&yaml)?;
    log::debug!(
        "Loaded scenario {:?} with {} events from {path:?}",
        scenario.name(),
        scenario.len()
    );
    Ok(scenario)
}

fn build(file: ScenarioFile) -> Result<Scenario, LoadError> {
    if file.events.is_empty() {
        return Err(LoadError::Invalid(format!(
            "scenario {:?} has no events",
            file.name
        )));
    }

    let mut scenario = Scenario::new(file.name);
    if let Some(timeout) = file.timeout {
        scenario.set_timeout(Duration::from(timeout));
    }
    for interface in file.interfaces {
        if scenario.interface(&interface.name).is_some() {
            return Err(LoadError::Invalid(format!(
                "interface {} is declared twice",
                interface.name
            )));
        }
        scenario.add_interface(interface);
    }

    for (index, event) in file.events.into_iter().enumerate() {
        let kind = match event.kind {
            EventKindFile::Input(input) => {
                let mut e = InputEvent::new(input.interface, input.packet);
                for copy in input.copy_from_last_output {
                    let source = match (copy.event, copy.interface) {
                        (Some(_), Some(_)) => {
                            return Err(LoadError::Invalid(format!(
                                "event {}: copy from either an event or an interface, not both",
                                index + 1
                            )))
                        }
                        (Some(0), None) => {
                            return Err(LoadError::Invalid(format!(
                                "event {}: events are numbered from 1",
                                index + 1
                            )))
                        }
                        (Some(n), None) => OutputRef::Event(n - 1),
                        (None, Some(interface)) => OutputRef::LastOn(interface),
                        (None, None) => OutputRef::LastOn(e.interface.clone()),
                    };
                    e = e.copy_from(BackReference::new(source, copy.from, copy.to));
                }
                EventKind::Input(e)
            }
            EventKindFile::Output(output) => {
                let mut e = OutputEvent::new(output.interface, output.packet);
                e.exact = output.exact;
                e.wildcards = output.wildcards;
                EventKind::Output(e)
            }
            EventKindFile::Timeout(time) => EventKind::Timeout(TimeoutEvent::new(time.into())),
        };
        scenario.expect(kind, event.description);
    }

    validate(&scenario)?;
    Ok(scenario)
}

/// Check that every event refers to declared interfaces and that every back-reference points at
/// an earlier output event.
pub fn validate(scenario: &Scenario) -> Result<(), LoadError> {
    let invalid = |index: usize, msg: String| LoadError::Invalid(format!("event {}: {msg}", index + 1));
    let is_output_on = |index: usize, interface: Option<&str>| match &scenario.events()[index].kind
    {
        EventKind::Output(o) => interface.map_or(true, |i| o.interface == i),
        _ => false,
    };

    for (index, event) in scenario.events().iter().enumerate() {
        if let Some(interface) = event.interface() {
            if scenario.interface(interface).is_none() {
                return Err(invalid(index, format!("unknown interface {interface}")));
            }
        }

        let EventKind::Input(input) = &event.kind else {
            continue;
        };
        for reference in &input.copy_from {
            match &reference.source {
                OutputRef::Event(source) => {
                    if *source >= index || !is_output_on(*source, None) {
                        return Err(invalid(
                            index,
                            format!("event {} is not an earlier output event", source + 1),
                        ));
                    }
                }
                OutputRef::LastOn(interface) => {
                    if !(0..index).any(|i| is_output_on(i, Some(interface.as_str()))) {
                        return Err(invalid(
                            index,
                            format!("there is no earlier output event on {interface}"),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use packet::HeaderKind;

    use super::*;
    use crate::scenario::compare::MatchField;

    const ECHO: &str = r#"
name: UDP echo
timeout: 250 ms
interfaces:
  - name: lo0
    ethaddr: "00:00:00:00:00:00"
    kind: loopback
events:
  - description: App sends a datagram
    output:
      interface: lo0
      wildcards: [tp_src]
      packet:
        - dlt_null: {}
        - ipv4: { src: 127.0.0.1, dst: 127.0.0.1, protocol: 17 }
        - udp: { src_port: 0, dst_port: 10000 }
        - raw: Hello stack
  - description: Nothing else arrives
    timeout: 10 ms
  - description: Server replies
    input:
      interface: lo0
      copy_from_last_output:
        - { from: udp.src_port, to: udp.dst_port }
      packet:
        - dlt_null: {}
        - ipv4: { src: 127.0.0.1, dst: 127.0.0.1, protocol: 17 }
        - udp: { src_port: 10000, dst_port: 0 }
        - raw: Hello app
"#;

    #[test]
    fn test_load_echo() {
        let scenario = Scenario::from_yaml_str(ECHO).unwrap();
        assert_eq!(scenario.name(), "UDP echo");
        assert_eq!(scenario.timeout(), Duration::from_millis(250));
        assert_eq!(scenario.len(), 3);
        assert_eq!(scenario.interfaces().len(), 1);

        let EventKind::Output(output) = &scenario.events()[0].kind else {
            panic!("expected an output event");
        };
        assert!(output.exact);
        assert_eq!(output.wildcards, vec![Wildcard::Match(MatchField::TpSrc)]);
        assert_eq!(output.packet.len(), 4);
        assert_eq!(output.packet[2].kind(), HeaderKind::Udp);

        let EventKind::Timeout(timeout) = &scenario.events()[1].kind else {
            panic!("expected a timeout event");
        };
        assert_eq!(timeout.duration, Duration::from_millis(10));

        let EventKind::Input(input) = &scenario.events()[2].kind else {
            panic!("expected an input event");
        };
        assert_eq!(
            input.copy_from,
            vec![BackReference::new(
                OutputRef::LastOn("lo0".to_string()),
                "udp.src_port".parse().unwrap(),
                "udp.dst_port".parse().unwrap(),
            )]
        );
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ECHO.as_bytes()).unwrap();
        let scenario = load_scenario(file.path()).unwrap();
        assert_eq!(scenario.len(), 3);

        let missing = load_scenario(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Scenario::from_yaml_str("name: [unclosed"),
            Err(LoadError::Parse(_))
        ));
        // unknown header field
        let yaml = ECHO.replace("dst_port: 10000", "dest_port: 10000");
        assert!(matches!(
            Scenario::from_yaml_str(&yaml),
            Err(LoadError::Parse(_))
        ));
        // unknown wildcard
        let yaml = ECHO.replace("[tp_src]", "[tp_source]");
        assert!(matches!(
            Scenario::from_yaml_str(&yaml),
            Err(LoadError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_scenarios() {
        let err = Scenario::from_yaml_str("name: empty\nevents: []\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid scenario: scenario \"empty\" has no events");

        let yaml = ECHO.replace("interface: lo0\n      wildcards", "interface: eth9\n      wildcards");
        let err = Scenario::from_yaml_str(&yaml).unwrap_err();
        assert_eq!(err.to_string(), "invalid scenario: event 1: unknown interface eth9");

        // the input refers to an output that comes after it
        let yaml = r#"
name: backwards
interfaces:
  - { name: lo0, ethaddr: "00:00:00:00:00:00" }
events:
  - description: reply
    input:
      interface: lo0
      copy_from_last_output:
        - { from: udp.src_port, to: udp.dst_port }
      packet: []
  - description: request
    output: { interface: lo0, packet: [] }
"#;
        let err = Scenario::from_yaml_str(yaml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid scenario: event 1: there is no earlier output event on lo0"
        );

        let yaml = yaml.replace("{ from: udp.src_port", "{ event: 2, from: udp.src_port");
        let err = Scenario::from_yaml_str(&yaml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid scenario: event 1: event 2 is not an earlier output event"
        );
    }
}
