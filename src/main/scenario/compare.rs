//! Packet comparison for output events.
//!
//! An exact comparison walks every field of every layer. A partial comparison only looks at the
//! flow match tuple (the [`MatchField`]s). In both modes, wildcarded fields are skipped.

use std::fmt;
use std::str::FromStr;

use packet::{FieldPath, FieldValue, HeaderKind, Packet};
use serde::de::{Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// One field of the flow match tuple.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MatchField {
    DlSrc,
    DlDst,
    DlType,
    NwSrc,
    NwDst,
    NwProto,
    NwTos,
    TpSrc,
    TpDst,
}

impl MatchField {
    pub const ALL: [MatchField; 9] = [
        Self::DlSrc,
        Self::DlDst,
        Self::DlType,
        Self::NwSrc,
        Self::NwDst,
        Self::NwProto,
        Self::NwTos,
        Self::TpSrc,
        Self::TpDst,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DlSrc => "dl_src",
            Self::DlDst => "dl_dst",
            Self::DlType => "dl_type",
            Self::NwSrc => "nw_src",
            Self::NwDst => "nw_dst",
            Self::NwProto => "nw_proto",
            Self::NwTos => "nw_tos",
            Self::TpSrc => "tp_src",
            Self::TpDst => "tp_dst",
        }
    }

    /// The header fields this alias stands for. The first one whose header is present in a packet
    /// is the one that gets compared.
    pub fn paths(&self) -> &'static [(HeaderKind, &'static str)] {
        match self {
            Self::DlSrc => &[(HeaderKind::Ethernet, "src")],
            Self::DlDst => &[(HeaderKind::Ethernet, "dst")],
            Self::DlType => &[(HeaderKind::Ethernet, "ethertype")],
            Self::NwSrc => &[(HeaderKind::Ipv4, "src"), (HeaderKind::Arp, "sender_protoaddr")],
            Self::NwDst => &[(HeaderKind::Ipv4, "dst"), (HeaderKind::Arp, "target_protoaddr")],
            Self::NwProto => &[(HeaderKind::Ipv4, "protocol"), (HeaderKind::Arp, "operation")],
            Self::NwTos => &[(HeaderKind::Ipv4, "tos")],
            Self::TpSrc => &[(HeaderKind::Udp, "src_port"), (HeaderKind::Icmp, "icmp_type")],
            Self::TpDst => &[(HeaderKind::Udp, "dst_port"), (HeaderKind::Icmp, "icmp_code")],
        }
    }

    /// The value of this match field in `packet`, or `None` if no header carries it.
    pub fn extract(&self, packet: &Packet) -> Option<FieldValue> {
        self.paths()
            .iter()
            .find_map(|(kind, field)| packet.header(*kind).and_then(|h| h.field(field)))
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatchField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown match field {s:?}"))
    }
}

/// A field excluded from comparison. Either a match tuple alias (`tp_src`) or a qualified header
/// field (`udp.src_port`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Wildcard {
    Match(MatchField),
    Field(FieldPath),
}

impl Wildcard {
    /// Whether this wildcard excludes the field `field` of header kind `kind`.
    pub fn covers(&self, kind: HeaderKind, field: &str) -> bool {
        match self {
            Self::Match(m) => m.paths().iter().any(|&(k, f)| k == kind && f == field),
            Self::Field(path) => path.kind == kind && path.field == field,
        }
    }

    /// Whether this wildcard excludes the match field `m`.
    pub fn covers_match(&self, m: MatchField) -> bool {
        match self {
            Self::Match(other) => *other == m,
            Self::Field(path) => m
                .paths()
                .iter()
                .any(|&(k, f)| k == path.kind && f == path.field),
        }
    }
}

impl From<MatchField> for Wildcard {
    fn from(m: MatchField) -> Self {
        Self::Match(m)
    }
}

impl From<FieldPath> for Wildcard {
    fn from(path: FieldPath) -> Self {
        Self::Field(path)
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(m) => write!(f, "{m}"),
            Self::Field(path) => write!(f, "{path}"),
        }
    }
}

impl FromStr for Wildcard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('.') {
            return FieldPath::from_str(s).map(Self::Field);
        }
        MatchField::from_str(s).map(Self::Match)
    }
}

impl Serialize for Wildcard {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct WildcardVisitor;

impl<'de> Visitor<'de> for WildcardVisitor {
    type Value = Wildcard;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a match field such as \"tp_src\" or a field path such as \"udp.src_port\"")
    }

    fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Self::Value, E> {
        Wildcard::from_str(s).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Wildcard {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(WildcardVisitor)
    }
}

/// The first difference found between an expected and an actual packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mismatch {
    HeaderCount {
        expected: usize,
        actual: usize,
    },
    HeaderKind {
        index: usize,
        expected: HeaderKind,
        actual: HeaderKind,
    },
    Field {
        kind: HeaderKind,
        field: &'static str,
        expected: FieldValue,
        actual: FieldValue,
    },
    MatchField {
        field: MatchField,
        expected: Option<FieldValue>,
        actual: Option<FieldValue>,
    },
}

fn display_or_missing(value: &Option<FieldValue>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "missing".to_string(),
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderCount { expected, actual } => write!(
                f,
                "an exact match failed. The packet has {actual} headers but should have {expected}"
            ),
            Self::HeaderKind {
                index,
                expected,
                actual,
            } => write!(
                f,
                "an exact match failed. Header {} is {actual} but should be {expected}",
                index + 1
            ),
            Self::Field {
                kind,
                field,
                expected,
                actual,
            } => write!(
                f,
                "an exact match failed. In the {kind} header, {field} is wrong (is {actual} but should be {expected})"
            ),
            Self::MatchField {
                field,
                expected,
                actual,
            } => write!(
                f,
                "a partial match failed. {field} is wrong (is {} but should be {})",
                display_or_missing(actual),
                display_or_missing(expected)
            ),
        }
    }
}

/// Compare `actual` against `expected`, returning the first difference.
pub fn compare(
    expected: &Packet,
    actual: &Packet,
    exact: bool,
    wildcards: &[Wildcard],
) -> Result<(), Mismatch> {
    if exact {
        compare_exact(expected, actual, wildcards)
    } else {
        compare_partial(expected, actual, wildcards)
    }
}

pub fn matches(expected: &Packet, actual: &Packet, exact: bool, wildcards: &[Wildcard]) -> bool {
    compare(expected, actual, exact, wildcards).is_ok()
}

fn compare_exact(expected: &Packet, actual: &Packet, wildcards: &[Wildcard]) -> Result<(), Mismatch> {
    for (index, (exp, act)) in expected.headers().iter().zip(actual.headers()).enumerate() {
        let kind = exp.kind();
        if act.kind() != kind {
            return Err(Mismatch::HeaderKind {
                index,
                expected: kind,
                actual: act.kind(),
            });
        }

        for &field in kind.field_names() {
            if wildcards.iter().any(|w| w.covers(kind, field)) {
                continue;
            }
            let (Some(e), Some(a)) = (exp.field(field), act.field(field)) else {
                continue;
            };
            if e != a {
                return Err(Mismatch::Field {
                    kind,
                    field,
                    expected: e,
                    actual: a,
                });
            }
        }
    }

    if expected.len() != actual.len() {
        return Err(Mismatch::HeaderCount {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    Ok(())
}

fn compare_partial(
    expected: &Packet,
    actual: &Packet,
    wildcards: &[Wildcard],
) -> Result<(), Mismatch> {
    for field in MatchField::ALL {
        if wildcards.iter().any(|w| w.covers_match(field)) {
            continue;
        }
        let e = field.extract(expected);
        let a = field.extract(actual);
        if e != a {
            return Err(Mismatch::MatchField {
                field,
                expected: e,
                actual: a,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use packet::headers::{ip_protocol, Ipv4Header, NullHeader, UdpHeader};
    use packet::{create_ip_arp_reply, Header};

    use super::*;

    fn udp(src_port: u16, dst_port: u16, payload: &'static [u8]) -> Packet {
        Packet::new()
            + NullHeader::default()
            + Ipv4Header {
                src: "127.0.0.1".parse().unwrap(),
                dst: "127.0.0.1".parse().unwrap(),
                protocol: ip_protocol::UDP,
                ttl: 32,
                ..Default::default()
            }
            + UdpHeader { src_port, dst_port }
            + Header::raw(payload)
    }

    #[test]
    fn test_exact_match() {
        let a = udp(1000, 10000, b"Hello stack");
        assert_eq!(compare(&a, &a.clone(), true, &[]), Ok(()));

        let b = udp(1001, 10000, b"Hello stack");
        let err = compare(&a, &b, true, &[]).unwrap_err();
        assert_eq!(
            err,
            Mismatch::Field {
                kind: HeaderKind::Udp,
                field: "src_port",
                expected: FieldValue::U16(1000),
                actual: FieldValue::U16(1001),
            }
        );
        assert_eq!(
            err.to_string(),
            "an exact match failed. In the udp header, src_port is wrong (is 1001 but should be 1000)"
        );
    }

    #[test]
    fn test_exact_layers() {
        let a = udp(1, 2, b"x");
        let mut fewer: Packet = a.headers()[..3].iter().cloned().collect();
        assert!(matches!(
            compare(&a, &fewer, true, &[]),
            Err(Mismatch::HeaderCount {
                expected: 4,
                actual: 3
            })
        ));

        fewer.push(UdpHeader::default());
        assert!(matches!(
            compare(&a, &fewer, true, &[]),
            Err(Mismatch::HeaderKind {
                index: 3,
                expected: HeaderKind::Raw,
                actual: HeaderKind::Udp,
            })
        ));
    }

    #[test]
    fn test_wildcards() {
        let a = udp(1000, 10000, b"Hello stack");
        let b = udp(4242, 10000, b"Hello stack");

        assert!(!matches(&a, &b, true, &[]));
        assert!(matches(&a, &b, true, &[Wildcard::Match(MatchField::TpSrc)]));
        assert!(matches(&a, &b, true, &["udp.src_port".parse().unwrap()]));
        assert!(!matches(&a, &b, true, &["udp.dst_port".parse().unwrap()]));
        assert!(!matches(&a, &b, false, &[]));
        assert!(matches(&a, &b, false, &["tp_src".parse().unwrap()]));
    }

    #[test]
    fn test_partial_ignores_other_fields() {
        let a = udp(1000, 10000, b"Hello stack");
        let b = udp(1000, 10000, b"Something else entirely");
        assert!(!matches(&a, &b, true, &[]));
        assert!(matches(&a, &b, false, &[]));

        let c = udp(1000, 10001, b"Hello stack");
        assert_eq!(
            compare(&a, &c, false, &[]).unwrap_err().to_string(),
            "a partial match failed. tp_dst is wrong (is 10001 but should be 10000)"
        );
    }

    #[test]
    fn test_partial_arp() {
        let mac = |s: &str| s.parse().unwrap();
        let a = create_ip_arp_reply(
            mac("40:00:00:00:00:03"),
            mac("30:00:00:00:00:01"),
            "10.0.1.1".parse().unwrap(),
            "10.0.1.2".parse().unwrap(),
        );
        let b = create_ip_arp_reply(
            mac("40:00:00:00:00:03"),
            mac("30:00:00:00:00:01"),
            "10.0.1.1".parse().unwrap(),
            "10.0.1.9".parse().unwrap(),
        );
        let err = compare(&a, &b, false, &[]).unwrap_err();
        assert!(matches!(
            err,
            Mismatch::MatchField {
                field: MatchField::NwDst,
                ..
            }
        ));
        assert!(matches(&a, &b, false, &[MatchField::NwDst.into()]));
    }

    #[test]
    fn test_wildcard_parse() {
        assert_eq!(
            "nw_tos".parse::<Wildcard>(),
            Ok(Wildcard::Match(MatchField::NwTos))
        );
        assert_eq!(
            "ipv4.ttl".parse::<Wildcard>(),
            Ok(Wildcard::Field(FieldPath::new(HeaderKind::Ipv4, "ttl").unwrap()))
        );
        assert!("bogus".parse::<Wildcard>().is_err());
        assert!("udp.bogus".parse::<Wildcard>().is_err());

        let w: Vec<Wildcard> = serde_yaml::from_str("[tp_src, udp.dst_port]").unwrap();
        assert_eq!(w.len(), 2);
    }
}
