use serde::{Deserialize, Serialize};

use crate::error::{Errors, ValidationError};
use crate::ip::{Ip, validate_ip_list};
use crate::is_default;
use crate::route::{Route, RoutePolicy};

const DHCP_IDENTIFIERS: &[&str] = &["", "mac"];

/// DNS settings for an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Ip>,
}

impl NsInfo {
    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.addresses.is_empty()
    }
}

/// Layer 3 configuration applied to an interface once it is up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Network {
    #[serde(default, skip_serializing_if = "is_default")]
    pub dhcp4: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub dhcp6: bool,
    /// Empty for a generated client ID, `mac` to identify by hardware address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dhcp_identifier: String,
    #[serde(default, skip_serializing_if = "is_default")]
    pub accept_ra: bool,
    /// Static addresses in CIDR form. Added alongside any DHCP leases.
    #[serde(default)]
    pub addresses: Vec<Ip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway4: Option<Ip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway6: Option<Ip>,
    #[serde(default, skip_serializing_if = "NsInfo::is_empty")]
    pub nameservers: NsInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_policy: Vec<RoutePolicy>,
}

impl Network {
    pub fn dhcp() -> Self {
        Self {
            dhcp4: true,
            ..Default::default()
        }
    }

    pub fn static_addresses(addresses: Vec<Ip>) -> Self {
        Self {
            addresses,
            ..Default::default()
        }
    }

    fn uses_dhcp(&self) -> bool {
        self.dhcp4 || self.dhcp6
    }

    /// Whether there is anything to configure at all.
    pub fn configured(&self) -> bool {
        self.uses_dhcp() || !self.addresses.is_empty()
    }

    pub fn static_only(&self) -> bool {
        !self.uses_dhcp() && !self.addresses.is_empty()
    }

    pub fn dhcp_only(&self) -> bool {
        self.uses_dhcp() && self.addresses.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::new("network");

        validate_str_in(&mut errs, "dhcp-identifier", &self.dhcp_identifier, DHCP_IDENTIFIERS);
        validate_ip_list(&mut errs, "addresses", &self.addresses, true);

        if let Some(gw) = &self.gateway4 {
            if !gw.is_ipv4() || gw.is_cidr() {
                errs.push(format!("gateway4 {} is not a single IPv4 address", gw));
            }
        }
        if let Some(gw) = &self.gateway6 {
            if !gw.is_ipv6() || gw.is_cidr() {
                errs.push(format!("gateway6 {} is not a single IPv6 address", gw));
            }
        }

        validate_ip_list(&mut errs, "nameservers", &self.nameservers.addresses, false);

        for route in &self.routes {
            errs.merge(route.validate());
        }
        for policy in &self.routing_policy {
            errs.merge(policy.validate());
        }

        errs.into_result()
    }
}

fn validate_str_in(errs: &mut Errors, field: &str, value: &str, allowed: &[&str]) {
    if !allowed.contains(&value) {
        let choices: Vec<String> = allowed.iter().map(|a| format!("{:?}", a)).collect();
        errs.push(format!(
            "{}: '{}' is not one of {}",
            field,
            value,
            choices.join(", ")
        ));
    }
}

/// Convenience wrappers for interfaces that may carry no network at all.
pub fn configured(network: Option<&Network>) -> bool {
    network.is_some_and(Network::configured)
}

pub fn static_only(network: Option<&Network>) -> bool {
    network.is_some_and(Network::static_only)
}

pub fn dhcp_only(network: Option<&Network>) -> bool {
    network.is_some_and(Network::dhcp_only)
}
