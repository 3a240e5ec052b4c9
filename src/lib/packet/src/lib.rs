//! A small layered packet model. A [`Packet`] is an ordered stack of [`Header`]s, each of which
//! exposes its fields by name so that packets can be compared field by field, partially, or have
//! individual fields copied between them. Like the rest of the workspace this crate is sans-I/O:
//! there is no wire encoding here, only the structure and values of each layer.
//!
//! ```
//! use packet::{FieldPath, FieldValue, Packet};
//! use packet::headers::{ip_protocol, Ipv4Header, NullHeader, UdpHeader};
//!
//! let packet = Packet::new()
//!     + NullHeader::default()
//!     + Ipv4Header {
//!         src: "127.0.0.1".parse().unwrap(),
//!         dst: "127.0.0.1".parse().unwrap(),
//!         protocol: ip_protocol::UDP,
//!         ..Default::default()
//!     }
//!     + UdpHeader { src_port: 65535, dst_port: 10000 }
//!     + bytes::Bytes::from_static(b"Hello stack");
//!
//! let path: FieldPath = "udp.dst_port".parse().unwrap();
//! assert_eq!(packet.field(&path), Some(FieldValue::U16(10000)));
//! ```

#![forbid(unsafe_code)]

use std::fmt;
use std::net::Ipv4Addr;
use std::ops::{Add, Index};
use std::str::FromStr;

use bytes::Bytes;
use serde::de::{Deserializer, Visitor};
use serde::{Deserialize, Serialize};

mod addr;
pub mod headers;

pub use crate::addr::{EthAddr, EthAddrParseError};
pub use crate::headers::{Header, HeaderKind, IpFlags};

use crate::headers::{arp_operation, ethertype, ArpHeader, EthernetHeader};

static_assertions::assert_impl_all!(Packet: Send, Sync);

/// The value of a single header field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldValue {
    EthAddr(EthAddr),
    Ipv4(Ipv4Addr),
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(Bytes),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EthAddr(x) => write!(f, "{x}"),
            Self::Ipv4(x) => write!(f, "{x}"),
            Self::U8(x) => write!(f, "{x}"),
            Self::U16(x) => write!(f, "{x}"),
            Self::U32(x) => write!(f, "{x}"),
            Self::Bytes(x) => write!(f, "{x:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldError {
    UnknownField {
        kind: HeaderKind,
        field: String,
    },
    WrongType {
        kind: HeaderKind,
        field: String,
        value: FieldValue,
    },
    /// The packet has no header of the requested kind.
    MissingHeader(HeaderKind),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField { kind, field } => {
                write!(f, "the {kind} header has no field named {field:?}")
            }
            Self::WrongType { kind, field, value } => {
                write!(f, "{value} is not a valid value for {kind}.{field}")
            }
            Self::MissingHeader(kind) => write!(f, "the packet has no {kind} header"),
        }
    }
}

impl std::error::Error for FieldError {}

/// Names one field of the first header of a given kind, for example `udp.src_port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    pub kind: HeaderKind,
    pub field: String,
}

impl FieldPath {
    /// Returns an error if `kind` has no field named `field`.
    pub fn new(kind: HeaderKind, field: impl Into<String>) -> Result<Self, FieldError> {
        let field = field.into();
        if !kind.has_field(&field) {
            return Err(FieldError::UnknownField { kind, field });
        }
        Ok(Self { kind, field })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.field)
    }
}

impl FromStr for FieldPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, field)) = s.split_once('.') else {
            return Err(format!("expected a field path like \"udp.src_port\", got {s:?}"));
        };
        let kind = HeaderKind::from_str(kind)?;
        Self::new(kind, field).map_err(|e| e.to_string())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct FieldPathVisitor;

impl<'de> Visitor<'de> for FieldPathVisitor {
    type Value = FieldPath;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a field path such as \"udp.src_port\"")
    }

    fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Self::Value, E> {
        FieldPath::from_str(s).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(FieldPathVisitor)
    }
}

/// An ordered stack of headers, outermost first.
///
/// Cloning a packet is a deep copy: the clone can be modified without affecting the original.
/// Equality is structural over every field of every layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packet {
    headers: Vec<Header>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: impl Into<Header>) {
        self.headers.push(header.into());
    }

    pub fn with(mut self, header: impl Into<Header>) -> Self {
        self.push(header);
        self
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut [Header] {
        &mut self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// The index of the first header of the given kind.
    pub fn header_index(&self, kind: HeaderKind) -> Option<usize> {
        self.headers.iter().position(|h| h.kind() == kind)
    }

    pub fn header(&self, kind: HeaderKind) -> Option<&Header> {
        self.header_index(kind).map(|i| &self.headers[i])
    }

    pub fn header_mut(&mut self, kind: HeaderKind) -> Option<&mut Header> {
        self.header_index(kind).map(|i| &mut self.headers[i])
    }

    pub fn has_header(&self, kind: HeaderKind) -> bool {
        self.header_index(kind).is_some()
    }

    /// Read the field named by `path` from the first header of the path's kind.
    pub fn field(&self, path: &FieldPath) -> Option<FieldValue> {
        self.header(path.kind)?.field(&path.field)
    }

    /// Overwrite the field named by `path` in the first header of the path's kind.
    pub fn set_field(&mut self, path: &FieldPath, value: FieldValue) -> Result<(), FieldError> {
        self.header_mut(path.kind)
            .ok_or(FieldError::MissingHeader(path.kind))?
            .set_field(&path.field, value)
    }
}

impl Index<usize> for Packet {
    type Output = Header;

    fn index(&self, index: usize) -> &Self::Output {
        &self.headers[index]
    }
}

impl<H: Into<Header>> Add<H> for Packet {
    type Output = Packet;

    fn add(self, header: H) -> Self::Output {
        self.with(header)
    }
}

impl FromIterator<Header> for Packet {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.headers.is_empty() {
            return write!(f, "<empty packet>");
        }

        for (i, header) in self.headers.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{header}")?;
        }
        Ok(())
    }
}

/// Build a broadcast ARP request asking who has `target_ip`.
pub fn create_ip_arp_request(sender_hw: EthAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Packet {
    Packet::new()
        + EthernetHeader {
            src: sender_hw,
            dst: EthAddr::BROADCAST,
            ethertype: ethertype::ARP,
        }
        + ArpHeader {
            operation: arp_operation::REQUEST,
            sender_hwaddr: sender_hw,
            sender_protoaddr: sender_ip,
            target_hwaddr: EthAddr::BROADCAST,
            target_protoaddr: target_ip,
        }
}

/// Build an ARP reply from `sender` to `target`.
pub fn create_ip_arp_reply(
    sender_hw: EthAddr,
    target_hw: EthAddr,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Packet {
    Packet::new()
        + EthernetHeader {
            src: sender_hw,
            dst: target_hw,
            ethertype: ethertype::ARP,
        }
        + ArpHeader {
            operation: arp_operation::REPLY,
            sender_hwaddr: sender_hw,
            sender_protoaddr: sender_ip,
            target_hwaddr: target_hw,
            target_protoaddr: target_ip,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{ip_protocol, Ipv4Header, NullHeader, UdpHeader};

    fn udp_packet(src_port: u16, dst_port: u16) -> Packet {
        Packet::new()
            + NullHeader::default()
            + Ipv4Header {
                src: Ipv4Addr::LOCALHOST,
                dst: Ipv4Addr::LOCALHOST,
                protocol: ip_protocol::UDP,
                ..Default::default()
            }
            + UdpHeader { src_port, dst_port }
            + Bytes::from_static(b"Hello stack")
    }

    #[test]
    fn test_clone_is_deep() {
        let original = udp_packet(1, 2);
        let mut copy = original.clone();
        assert_eq!(original, copy);

        let path = FieldPath::from_str("udp.src_port").unwrap();
        copy.set_field(&path, FieldValue::U16(99)).unwrap();

        assert_ne!(original, copy);
        assert_eq!(original.field(&path), Some(FieldValue::U16(1)));
        assert_eq!(copy.field(&path), Some(FieldValue::U16(99)));
    }

    #[test]
    fn test_header_lookup() {
        let packet = udp_packet(1, 2);
        assert_eq!(packet.len(), 4);
        assert_eq!(packet.header_index(HeaderKind::Udp), Some(2));
        assert_eq!(packet[2].kind(), HeaderKind::Udp);
        assert!(!packet.has_header(HeaderKind::Arp));
        assert_eq!(
            packet.field(&FieldPath::from_str("arp.operation").unwrap()),
            None
        );
    }

    #[test]
    fn test_set_field_missing_header() {
        let mut packet = udp_packet(1, 2);
        let path = FieldPath::from_str("ethernet.src").unwrap();
        assert_eq!(
            packet.set_field(&path, FieldValue::EthAddr(EthAddr::ZERO)),
            Err(FieldError::MissingHeader(HeaderKind::Ethernet))
        );
    }

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::from_str("ipv4.ttl").unwrap();
        assert_eq!(path.kind, HeaderKind::Ipv4);
        assert_eq!(path.to_string(), "ipv4.ttl");

        assert!(FieldPath::from_str("ipv4").is_err());
        assert!(FieldPath::from_str("ipv4.src_port").is_err());
        assert!(FieldPath::from_str("tcp.src_port").is_err());
    }

    #[test]
    fn test_arp_helpers() {
        let hw: EthAddr = "30:00:00:00:00:01".parse().unwrap();
        let request = create_ip_arp_request(hw, "10.1.1.1".parse().unwrap(), "10.1.1.2".parse().unwrap());
        assert_eq!(
            request.field(&"ethernet.dst".parse().unwrap()),
            Some(FieldValue::EthAddr(EthAddr::BROADCAST))
        );
        assert_eq!(
            request.field(&"arp.operation".parse().unwrap()),
            Some(FieldValue::U16(arp_operation::REQUEST))
        );
    }

    #[test]
    fn test_deserialize_yaml() {
        let yaml = r#"
- dlt_null: {}
- ipv4: { src: 127.0.0.1, dst: 127.0.0.1, protocol: 17, flags: DONT_FRAGMENT }
- udp: { src_port: 65535, dst_port: 10000 }
- raw: Hello stack
"#;
        let packet: Packet = serde_yaml::from_str(yaml).unwrap();
        let mut expected = udp_packet(65535, 10000);
        expected
            .set_field(
                &"ipv4.flags".parse().unwrap(),
                FieldValue::U8(IpFlags::DONT_FRAGMENT.bits()),
            )
            .unwrap();
        assert_eq!(packet, expected);
    }
}
