use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

use crate::error::Errors;

/// A single address (`10.0.0.1`) or an address with a prefix length
/// (`10.0.0.5/24`, `2001:db8::/64`).
///
/// Host bits are preserved in the CIDR form, so an interface address and
/// the network it sits on are kept in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Ip {
    Host(IpAddr),
    Cidr(IpNet),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid IP address or CIDR: {0}")]
pub struct IpParseError(pub String);

impl Ip {
    pub fn addr(&self) -> IpAddr {
        match self {
            Ip::Host(addr) => *addr,
            Ip::Cidr(net) => net.addr(),
        }
    }

    pub fn prefix_len(&self) -> Option<u8> {
        match self {
            Ip::Host(_) => None,
            Ip::Cidr(net) => Some(net.prefix_len()),
        }
    }

    /// True when the value was written with a prefix length.
    pub fn is_cidr(&self) -> bool {
        matches!(self, Ip::Cidr(_))
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr().is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr().is_ipv6()
    }
}

impl FromStr for Ip {
    type Err = IpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.contains('/') {
            text.parse::<IpNet>()
                .map(Ip::Cidr)
                .map_err(|_| IpParseError(s.to_string()))
        } else {
            text.parse::<IpAddr>()
                .map(Ip::Host)
                .map_err(|_| IpParseError(s.to_string()))
        }
    }
}

impl TryFrom<String> for Ip {
    type Error = IpParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ip> for String {
    fn from(ip: Ip) -> Self {
        ip.to_string()
    }
}

impl From<IpAddr> for Ip {
    fn from(addr: IpAddr) -> Self {
        Ip::Host(addr)
    }
}

impl From<IpNet> for Ip {
    fn from(net: IpNet) -> Self {
        Ip::Cidr(net)
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ip::Host(addr) => write!(f, "{}", addr),
            Ip::Cidr(net) => write!(f, "{}", net),
        }
    }
}

/// Checks a list of addresses, rejecting duplicates and, unless
/// `allow_ranges` is set, anything written in CIDR form.
pub fn validate_ip_list(errs: &mut Errors, field: &str, list: &[Ip], allow_ranges: bool) {
    let mut seen = HashSet::new();
    for ip in list {
        if !allow_ranges && ip.is_cidr() {
            errs.push(format!("{}: {} must be a single address, not a range", field, ip));
        }
        if !seen.insert(ip) {
            errs.push(format!("{}: {} is listed more than once", field, ip));
        }
    }
}
