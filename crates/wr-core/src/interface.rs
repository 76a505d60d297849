use macaddr::MacAddr6;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Errors, ValidationError};
use crate::is_default;
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
}

/// How an interface holds the sub interfaces it is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerMode {
    /// The sub interface belongs to this owner and nothing else (bond, bridge).
    Exclusive,
    /// Several owners of the same kind may stack on one sub interface (vlan).
    Shared,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Physical => "physical",
            InterfaceKind::Bond => "bond",
            InterfaceKind::Bridge => "bridge",
            InterfaceKind::Vlan => "vlan",
        }
    }

    /// `None` for kinds that never own sub interfaces.
    pub fn owner_mode(&self) -> Option<OwnerMode> {
        match self {
            InterfaceKind::Physical => None,
            InterfaceKind::Bond | InterfaceKind::Bridge => Some(OwnerMode::Exclusive),
            InterfaceKind::Vlan => Some(OwnerMode::Shared),
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the layout: an interface that must exist once the network
/// is up, plus the interfaces it is built on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Interface {
    #[serde(rename = "type")]
    pub kind: InterfaceKind,
    /// Identity in the input format. Only physical interfaces may share one.
    #[serde(default)]
    pub match_id: String,
    /// Final name of the interface, unique within a layout.
    #[serde(default)]
    pub name: String,
    #[serde(
        rename = "hwaddr",
        default,
        skip_serializing_if = "Option::is_none",
        with = "hwaddr"
    )]
    pub hw_addr: Option<MacAddr6>,
    /// Not required for the network to come up. Bubbles up to owners.
    #[serde(default, skip_serializing_if = "is_default")]
    pub optional: bool,
    /// Names of the interfaces this one is built on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
}

impl Interface {
    pub fn new(kind: InterfaceKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind,
            match_id: name.clone(),
            name,
            hw_addr: None,
            optional: false,
            interfaces: Vec::new(),
            parameters: BTreeMap::new(),
            network: None,
        }
    }

    pub fn physical(name: impl Into<String>, hw_addr: MacAddr6) -> Self {
        let mut iface = Self::new(InterfaceKind::Physical, name);
        iface.hw_addr = Some(hw_addr);
        iface
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Error scope for this interface: `type:match-id`.
    pub fn scope(&self) -> String {
        let id = if self.match_id.is_empty() {
            &self.name
        } else {
            &self.match_id
        };
        format!("{}:{}", self.kind, id)
    }

    pub fn bond_parameters(&self) -> Result<BondParameters, serde_json::Error> {
        self.parameters_as()
    }

    pub fn bridge_parameters(&self) -> Result<BridgeParameters, serde_json::Error> {
        self.parameters_as()
    }

    pub fn vlan_parameters(&self) -> Result<VlanParameters, serde_json::Error> {
        self.parameters_as()
    }

    fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let map = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(map))
    }

    /// Sorts and de-duplicates the sub interface list.
    pub(crate) fn normalize(&mut self) {
        self.interfaces.sort();
        self.interfaces.dedup();
    }

    /// Checks this interface's structure and records its claims on the
    /// interfaces it is built on. Expects `normalize` to have run.
    pub(crate) fn validate(
        &self,
        interfaces: &BTreeMap<String, Interface>,
        index: &mut OwnershipIndex,
    ) -> Result<(), ValidationError> {
        let mut errs = Errors::new(self.scope());

        if self.kind == InterfaceKind::Physical {
            if !self.interfaces.is_empty() {
                errs.push(format!(
                    "{} must not refer to sub interfaces {}",
                    self,
                    self.interfaces.join(", ")
                ));
            }
            if self.hw_addr.is_none() {
                errs.push(format!("{} must have a hardware address", self));
            }
            index.roots.push(self.name.clone());
            return errs.into_result();
        }

        if self.interfaces.is_empty() {
            index.roots.push(self.name.clone());
            return errs.into_result();
        }

        let Some(mode) = self.kind.owner_mode() else {
            unreachable!("{} cannot own sub interfaces", self);
        };

        for child_name in &self.interfaces {
            let Some(child) = interfaces.get(child_name) else {
                errs.push(format!("{} refers to undefined sub interface {}", self, child_name));
                continue;
            };
            if let Some(problem) = self.check_child(child) {
                errs.push(problem);
                continue;
            }
            match mode {
                OwnerMode::Exclusive => index.claim_exclusive(self, child, interfaces, &mut errs),
                OwnerMode::Shared => index.claim_shared(self, child, interfaces, &mut errs),
            }
        }

        errs.into_result()
    }

    fn check_child(&self, child: &Interface) -> Option<String> {
        match (self.kind, child.kind) {
            (InterfaceKind::Bond, kind) if kind != InterfaceKind::Physical => Some(format!(
                "{} refers to {}, which is not a physical interface",
                self, child
            )),
            (InterfaceKind::Bridge, InterfaceKind::Bridge)
            | (InterfaceKind::Vlan, InterfaceKind::Vlan) => {
                Some(format!("{} cannot be built on {}", self, child))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Ownership state rebuilt on every validation pass.
#[derive(Debug, Default)]
pub(crate) struct OwnershipIndex {
    pub child2parent: BTreeMap<String, Vec<String>>,
    pub roots: Vec<String>,
    /// Children claimed by an exclusive owner. They lose their own network.
    pub enslaved: BTreeSet<String>,
}

impl OwnershipIndex {
    fn claim_exclusive(
        &mut self,
        owner: &Interface,
        child: &Interface,
        interfaces: &BTreeMap<String, Interface>,
        errs: &mut Errors,
    ) {
        if let Some(owners) = self.child2parent.get(&child.name) {
            errs.push(format!(
                "{} is already owned by {}, it cannot be a member of {}",
                child,
                describe(owners, interfaces),
                owner
            ));
            return;
        }
        self.child2parent
            .insert(child.name.clone(), vec![owner.name.clone()]);
        self.enslaved.insert(child.name.clone());
    }

    // A detected conflict rejects the claim outright: the new owner is not
    // registered, so child2parent only ever holds compatible owners.
    fn claim_shared(
        &mut self,
        owner: &Interface,
        child: &Interface,
        interfaces: &BTreeMap<String, Interface>,
        errs: &mut Errors,
    ) {
        let Some(owners) = self.child2parent.get_mut(&child.name) else {
            self.child2parent
                .insert(child.name.clone(), vec![owner.name.clone()]);
            return;
        };

        let conflicting: Vec<String> = owners
            .iter()
            .filter(|name| {
                interfaces
                    .get(name.as_str())
                    .and_then(|other| other.kind.owner_mode())
                    != Some(OwnerMode::Shared)
            })
            .cloned()
            .collect();
        if !conflicting.is_empty() {
            errs.push(format!(
                "{} is already owned by {}, it cannot be a member of {}",
                child,
                describe(&conflicting, interfaces),
                owner
            ));
            return;
        }

        owners.push(owner.name.clone());
        owners.sort();
    }
}

fn describe(names: &[String], interfaces: &BTreeMap<String, Interface>) -> String {
    names
        .iter()
        .map(|name| match interfaces.get(name) {
            Some(iface) => iface.to_string(),
            None => name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bonding settings, read from `parameters`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BondParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lacp_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mii_monitor_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_links: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmit_hash_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BridgeParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_delay: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hello_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ageing_time: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VlanParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u16>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

mod hwaddr {
    use macaddr::MacAddr6;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<MacAddr6>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(mac) => s.collect_str(mac),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<MacAddr6>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => text.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
