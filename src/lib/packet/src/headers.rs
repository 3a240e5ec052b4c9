//! The individual header types that can be stacked into a [`Packet`](crate::Packet).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{EthAddr, FieldError, FieldValue};

/// Well-known ethertype values.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
}

/// Well-known IANA protocol numbers carried in the IPv4 header.
pub mod ip_protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// ARP operation codes.
pub mod arp_operation {
    pub const REQUEST: u16 = 1;
    pub const REPLY: u16 = 2;
}

/// The address family written into a null (loopback) link-layer header for IPv4.
pub const AF_INET: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderKind {
    Null,
    Ethernet,
    Arp,
    Ipv4,
    Icmp,
    Udp,
    Raw,
}

impl HeaderKind {
    pub const ALL: [HeaderKind; 7] = [
        Self::Null,
        Self::Ethernet,
        Self::Arp,
        Self::Ipv4,
        Self::Icmp,
        Self::Udp,
        Self::Raw,
    ];

    /// The names of all fields of this header kind, in the order they are compared.
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            Self::Null => &["af"],
            Self::Ethernet => &["src", "dst", "ethertype"],
            Self::Arp => &[
                "operation",
                "sender_hwaddr",
                "sender_protoaddr",
                "target_hwaddr",
                "target_protoaddr",
            ],
            Self::Ipv4 => &["src", "dst", "protocol", "ttl", "ipid", "tos", "flags"],
            Self::Icmp => &["icmp_type", "icmp_code", "identifier", "sequence"],
            Self::Udp => &["src_port", "dst_port"],
            Self::Raw => &["data"],
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_names().contains(&name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Ethernet => "ethernet",
            Self::Arp => "arp",
            Self::Ipv4 => "ipv4",
            Self::Icmp => "icmp",
            Self::Udp => "udp",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HeaderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| format!("unknown header kind {s:?}"))
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct IpFlags: u8 {
        const MORE_FRAGMENTS = 1 << 0;
        const DONT_FRAGMENT = 1 << 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NullHeader {
    pub af: u32,
}

impl Default for NullHeader {
    fn default() -> Self {
        Self { af: AF_INET }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EthernetHeader {
    pub src: EthAddr,
    pub dst: EthAddr,
    pub ethertype: u16,
}

impl Default for EthernetHeader {
    fn default() -> Self {
        Self {
            src: EthAddr::ZERO,
            dst: EthAddr::ZERO,
            ethertype: ethertype::IPV4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArpHeader {
    pub operation: u16,
    pub sender_hwaddr: EthAddr,
    pub sender_protoaddr: Ipv4Addr,
    pub target_hwaddr: EthAddr,
    pub target_protoaddr: Ipv4Addr,
}

impl Default for ArpHeader {
    fn default() -> Self {
        Self {
            operation: arp_operation::REQUEST,
            sender_hwaddr: EthAddr::ZERO,
            sender_protoaddr: Ipv4Addr::UNSPECIFIED,
            target_hwaddr: EthAddr::ZERO,
            target_protoaddr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub ipid: u16,
    pub tos: u8,
    pub flags: IpFlags,
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            protocol: ip_protocol::UDP,
            ttl: 64,
            ipid: 0,
            tos: 0,
            flags: IpFlags::empty(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub identifier: u16,
    pub sequence: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

/// One layer of a packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Header {
    #[serde(alias = "dlt_null")]
    Null(NullHeader),
    Ethernet(EthernetHeader),
    Arp(ArpHeader),
    Ipv4(Ipv4Header),
    Icmp(IcmpHeader),
    Udp(UdpHeader),
    #[serde(with = "raw_bytes")]
    Raw(Bytes),
}

/// Extract the inner value of a [`FieldValue`] variant, or return a `WrongType` error.
macro_rules! expect_value {
    ($value:expr, $variant:ident, $kind:expr, $field:expr) => {
        match $value {
            FieldValue::$variant(x) => x,
            other => {
                return Err(FieldError::WrongType {
                    kind: $kind,
                    field: $field.to_string(),
                    value: other,
                })
            }
        }
    };
}

impl Header {
    /// A raw payload layer.
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self::Raw(data.into())
    }

    pub fn kind(&self) -> HeaderKind {
        match self {
            Self::Null(_) => HeaderKind::Null,
            Self::Ethernet(_) => HeaderKind::Ethernet,
            Self::Arp(_) => HeaderKind::Arp,
            Self::Ipv4(_) => HeaderKind::Ipv4,
            Self::Icmp(_) => HeaderKind::Icmp,
            Self::Udp(_) => HeaderKind::Udp,
            Self::Raw(_) => HeaderKind::Raw,
        }
    }

    pub fn field_names(&self) -> &'static [&'static str] {
        self.kind().field_names()
    }

    /// Read a field by name. Returns `None` if this header has no such field.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let value = match (self, name) {
            (Self::Null(h), "af") => FieldValue::U32(h.af),

            (Self::Ethernet(h), "src") => FieldValue::EthAddr(h.src),
            (Self::Ethernet(h), "dst") => FieldValue::EthAddr(h.dst),
            (Self::Ethernet(h), "ethertype") => FieldValue::U16(h.ethertype),

            (Self::Arp(h), "operation") => FieldValue::U16(h.operation),
            (Self::Arp(h), "sender_hwaddr") => FieldValue::EthAddr(h.sender_hwaddr),
            (Self::Arp(h), "sender_protoaddr") => FieldValue::Ipv4(h.sender_protoaddr),
            (Self::Arp(h), "target_hwaddr") => FieldValue::EthAddr(h.target_hwaddr),
            (Self::Arp(h), "target_protoaddr") => FieldValue::Ipv4(h.target_protoaddr),

            (Self::Ipv4(h), "src") => FieldValue::Ipv4(h.src),
            (Self::Ipv4(h), "dst") => FieldValue::Ipv4(h.dst),
            (Self::Ipv4(h), "protocol") => FieldValue::U8(h.protocol),
            (Self::Ipv4(h), "ttl") => FieldValue::U8(h.ttl),
            (Self::Ipv4(h), "ipid") => FieldValue::U16(h.ipid),
            (Self::Ipv4(h), "tos") => FieldValue::U8(h.tos),
            (Self::Ipv4(h), "flags") => FieldValue::U8(h.flags.bits()),

            (Self::Icmp(h), "icmp_type") => FieldValue::U8(h.icmp_type),
            (Self::Icmp(h), "icmp_code") => FieldValue::U8(h.icmp_code),
            (Self::Icmp(h), "identifier") => FieldValue::U16(h.identifier),
            (Self::Icmp(h), "sequence") => FieldValue::U16(h.sequence),

            (Self::Udp(h), "src_port") => FieldValue::U16(h.src_port),
            (Self::Udp(h), "dst_port") => FieldValue::U16(h.dst_port),

            (Self::Raw(data), "data") => FieldValue::Bytes(data.clone()),

            _ => return None,
        };
        Some(value)
    }

    /// Overwrite a field by name. The value's type must match the field's type.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        let kind = self.kind();
        match (self, name) {
            (Self::Null(h), "af") => h.af = expect_value!(value, U32, kind, name),

            (Self::Ethernet(h), "src") => h.src = expect_value!(value, EthAddr, kind, name),
            (Self::Ethernet(h), "dst") => h.dst = expect_value!(value, EthAddr, kind, name),
            (Self::Ethernet(h), "ethertype") => {
                h.ethertype = expect_value!(value, U16, kind, name)
            }

            (Self::Arp(h), "operation") => h.operation = expect_value!(value, U16, kind, name),
            (Self::Arp(h), "sender_hwaddr") => {
                h.sender_hwaddr = expect_value!(value, EthAddr, kind, name)
            }
            (Self::Arp(h), "sender_protoaddr") => {
                h.sender_protoaddr = expect_value!(value, Ipv4, kind, name)
            }
            (Self::Arp(h), "target_hwaddr") => {
                h.target_hwaddr = expect_value!(value, EthAddr, kind, name)
            }
            (Self::Arp(h), "target_protoaddr") => {
                h.target_protoaddr = expect_value!(value, Ipv4, kind, name)
            }

            (Self::Ipv4(h), "src") => h.src = expect_value!(value, Ipv4, kind, name),
            (Self::Ipv4(h), "dst") => h.dst = expect_value!(value, Ipv4, kind, name),
            (Self::Ipv4(h), "protocol") => h.protocol = expect_value!(value, U8, kind, name),
            (Self::Ipv4(h), "ttl") => h.ttl = expect_value!(value, U8, kind, name),
            (Self::Ipv4(h), "ipid") => h.ipid = expect_value!(value, U16, kind, name),
            (Self::Ipv4(h), "tos") => h.tos = expect_value!(value, U8, kind, name),
            (Self::Ipv4(h), "flags") => {
                h.flags = IpFlags::from_bits_truncate(expect_value!(value, U8, kind, name))
            }

            (Self::Icmp(h), "icmp_type") => h.icmp_type = expect_value!(value, U8, kind, name),
            (Self::Icmp(h), "icmp_code") => h.icmp_code = expect_value!(value, U8, kind, name),
            (Self::Icmp(h), "identifier") => h.identifier = expect_value!(value, U16, kind, name),
            (Self::Icmp(h), "sequence") => h.sequence = expect_value!(value, U16, kind, name),

            (Self::Udp(h), "src_port") => h.src_port = expect_value!(value, U16, kind, name),
            (Self::Udp(h), "dst_port") => h.dst_port = expect_value!(value, U16, kind, name),

            (Self::Raw(data), "data") => *data = expect_value!(value, Bytes, kind, name),

            _ => {
                return Err(FieldError::UnknownField {
                    kind,
                    field: name.to_string(),
                })
            }
        }
        Ok(())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(h) => write!(f, "Null: {}", h.af),
            Self::Ethernet(h) => write!(
                f,
                "Ethernet {}->{} 0x{:04x}",
                h.src, h.dst, h.ethertype
            ),
            Self::Arp(h) => write!(
                f,
                "Arp {}:{} {}:{} op {}",
                h.sender_hwaddr, h.sender_protoaddr, h.target_hwaddr, h.target_protoaddr, h.operation
            ),
            Self::Ipv4(h) => write!(
                f,
                "IPv4 {}->{} proto {} ttl {}",
                h.src, h.dst, h.protocol, h.ttl
            ),
            Self::Icmp(h) => write!(
                f,
                "ICMP type {} code {} id {} seq {}",
                h.icmp_type, h.icmp_code, h.identifier, h.sequence
            ),
            Self::Udp(h) => write!(f, "UDP {}->{}", h.src_port, h.dst_port),
            Self::Raw(data) => write!(f, "RawPacketContents ({} bytes) {:?}", data.len(), data),
        }
    }
}

macro_rules! impl_into_header {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Header {
                fn from(h: $ty) -> Self {
                    Self::$variant(h)
                }
            }
        )*
    };
}

impl_into_header!(
    NullHeader => Null,
    EthernetHeader => Ethernet,
    ArpHeader => Arp,
    Ipv4Header => Ipv4,
    IcmpHeader => Icmp,
    UdpHeader => Udp,
    Bytes => Raw,
);

/// Raw payloads are written as strings in scenario files, or as a list of byte values.
mod raw_bytes {
    use std::fmt;

    use bytes::Bytes;
    use serde::de::{Deserializer, SeqAccess, Visitor};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(data) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(data),
        }
    }

    struct RawVisitor;

    impl<'de> Visitor<'de> for RawVisitor {
        type Value = Bytes;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a list of bytes")
        }

        fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Self::Value, E> {
            Ok(Bytes::copy_from_slice(s.as_bytes()))
        }

        fn visit_bytes<E: serde::de::Error>(self, b: &[u8]) -> Result<Self::Value, E> {
            Ok(Bytes::copy_from_slice(b))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut buf = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                buf.push(byte);
            }
            Ok(Bytes::from(buf))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        deserializer.deserialize_any(RawVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_readable() {
        let headers: Vec<Header> = vec![
            NullHeader::default().into(),
            EthernetHeader::default().into(),
            ArpHeader::default().into(),
            Ipv4Header::default().into(),
            IcmpHeader::default().into(),
            UdpHeader::default().into(),
            Header::raw(&b"abc"[..]),
        ];

        for header in &headers {
            for name in header.field_names() {
                assert!(header.field(name).is_some(), "{}.{name}", header.kind());
            }
            assert!(header.field("nope").is_none());
        }
    }

    #[test]
    fn test_set_field() {
        let mut header = Header::from(UdpHeader {
            src_port: 1,
            dst_port: 2,
        });

        header.set_field("dst_port", FieldValue::U16(80)).unwrap();
        assert_eq!(header.field("dst_port"), Some(FieldValue::U16(80)));

        assert!(matches!(
            header.set_field("dst_port", FieldValue::U8(80)),
            Err(FieldError::WrongType { .. })
        ));
        assert!(matches!(
            header.set_field("ttl", FieldValue::U8(1)),
            Err(FieldError::UnknownField { .. })
        ));
        // failed sets leave the header untouched
        assert_eq!(header.field("dst_port"), Some(FieldValue::U16(80)));
    }

    #[test]
    fn test_ip_flags_field() {
        let mut header = Header::from(Ipv4Header {
            flags: IpFlags::DONT_FRAGMENT,
            ..Default::default()
        });
        assert_eq!(
            header.field("flags"),
            Some(FieldValue::U8(IpFlags::DONT_FRAGMENT.bits()))
        );

        header.set_field("flags", FieldValue::U8(0)).unwrap();
        assert_eq!(header.field("flags"), Some(FieldValue::U8(0)));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("UDP".parse::<HeaderKind>().unwrap(), HeaderKind::Udp);
        assert!("tcp".parse::<HeaderKind>().is_err());
    }
}
