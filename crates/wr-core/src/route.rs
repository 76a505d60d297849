use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Errors, ValidationError};
use crate::ip::Ip;
use crate::is_default;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    #[default]
    Unicast,
    Unreachable,
    Blackhole,
    Prohibit,
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteType::Unicast => "unicast",
            RouteType::Unreachable => "unreachable",
            RouteType::Blackhole => "blackhole",
            RouteType::Prohibit => "prohibit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteScope {
    #[default]
    Global,
    Link,
    Host,
}

/// A static route installed when the owning interface comes up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Ip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Ip>,
    /// Next hop. Always a single address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<Ip>,
    /// Skip the kernel's reachability check for `via`.
    #[serde(default, skip_serializing_if = "is_default")]
    pub on_link: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub metric: u32,
    #[serde(rename = "type", default, skip_serializing_if = "is_default")]
    pub kind: RouteType,
    #[serde(default, skip_serializing_if = "is_default")]
    pub scope: RouteScope,
    /// Routing table, when not the default one for the route type.
    #[serde(default, skip_serializing_if = "is_default")]
    pub table: u32,
}

impl Route {
    pub fn to(to: Ip) -> Self {
        Self {
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn via(mut self, via: Ip) -> Self {
        self.via = Some(via);
        self
    }

    pub fn with_kind(mut self, kind: RouteType) -> Self {
        self.kind = kind;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = match &self.to {
            Some(to) => Errors::new(format!("route to {}", to)),
            None => Errors::new("route"),
        };

        if let Some(via) = &self.via {
            if via.is_cidr() {
                errs.push(format!("via must be a single IP address, not {}", via));
            }
        }

        match self.kind {
            RouteType::Unicast => {
                if self.to.is_none() || self.via.is_none() {
                    errs.push("unicast routes require 'to' and 'via'");
                }
            }
            kind => {
                if self.to.is_none() {
                    errs.push(format!("{} routes require 'to'", kind));
                }
            }
        }

        errs.into_result()
    }
}

/// A policy routing rule: packets matching the selector use `table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoutePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Ip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Ip>,
    #[serde(default, skip_serializing_if = "is_default")]
    pub table: u32,
    /// Lower numbers are consulted first.
    #[serde(default, skip_serializing_if = "is_default")]
    pub priority: u32,
    #[serde(rename = "mark", default, skip_serializing_if = "is_default")]
    pub fw_mark: u32,
    #[serde(rename = "type-of-service", default, skip_serializing_if = "is_default")]
    pub tos: u8,
}

impl RoutePolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::new("routing-policy");
        if self.from.is_some() == self.to.is_some() {
            errs.push("a routing policy must match on exactly one of 'from' or 'to'");
        }
        errs.into_result()
    }
}
