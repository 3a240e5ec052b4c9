use std::fmt;
use std::net::Ipv4Addr;

use packet::EthAddr;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    #[default]
    Ethernet,
    Loopback,
}

/// A network interface declared by a scenario and presented to the handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interface {
    pub name: String,
    pub ethaddr: EthAddr,
    #[serde(default)]
    pub ipaddr: Option<Ipv4Addr>,
    #[serde(default)]
    pub netmask: Option<Ipv4Addr>,
    #[serde(default)]
    pub kind: InterfaceKind,
}

impl Interface {
    pub fn new(name: impl Into<String>, ethaddr: EthAddr) -> Self {
        Self {
            name: name.into(),
            ethaddr,
            ipaddr: None,
            netmask: None,
            kind: InterfaceKind::Ethernet,
        }
    }

    pub fn with_ipaddr(mut self, ipaddr: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        self.ipaddr = Some(ipaddr);
        self.netmask = Some(netmask);
        self
    }

    pub fn with_kind(mut self, kind: InterfaceKind) -> Self {
        self.kind = kind;
        self
    }

    /// The network address of this interface, if it has an address and mask.
    pub fn network(&self) -> Option<Ipv4Addr> {
        let addr = u32::from(self.ipaddr?);
        let mask = u32::from(self.netmask?);
        Some(Ipv4Addr::from(addr & mask))
    }
}

impl AsRef<str> for Interface {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mac:{}", self.name, self.ethaddr)?;
        if let Some(ipaddr) = self.ipaddr {
            write!(f, " ip:{ipaddr}")?;
            if let Some(netmask) = self.netmask {
                write!(f, "/{}", u32::from(netmask).count_ones())?;
            }
        }
        if self.kind == InterfaceKind::Loopback {
            write!(f, " (loopback)")?;
        }
        Ok(())
    }
}
