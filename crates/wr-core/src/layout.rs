//! The layout: every interface a machine needs, and how they stack.
//!
//! Input readers populate [`Layout::interfaces`] and call
//! [`Layout::validate`], which rebuilds the derived `child2parent` index
//! and `roots` set. Output writers must only consume those after a
//! successful validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

use crate::error::{Errors, LayoutError, ValidationError};
use crate::interface::{Interface, InterfaceKind, OwnershipIndex};

/// On-disk representation of a layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    /// `.json` files are JSON, everything else is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Layout {
    /// Every interface of the layout, keyed by name. Sub interface
    /// references must resolve to keys of this map.
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
    /// Child name to the sorted names of the interfaces built on it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub child2parent: BTreeMap<String, Vec<String>>,
    /// Interfaces that depend on nothing else and come up first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<String>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface under its own name, returning any it replaced.
    pub fn insert(&mut self, iface: Interface) -> Option<Interface> {
        self.interfaces.insert(iface.name.clone(), iface)
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    /// Checks that the layout describes a sane network configuration and
    /// rebuilds `roots` and `child2parent`.
    ///
    /// Every problem found is reported, not just the first. Cycle detection
    /// only runs once the rest of the layout is clean.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        debug!(interfaces = self.interfaces.len(), "validating layout");
        let mut errs = Errors::new("layout");
        self.roots.clear();
        self.child2parent.clear();

        self.normalize(&mut errs);

        let mut index = OwnershipIndex::default();
        for iface in self.interfaces.values() {
            trace!(interface = %iface, "checking interface");
            errs.merge(iface.validate(&self.interfaces, &mut index));
        }

        for name in &index.enslaved {
            if let Some(child) = self.interfaces.get_mut(name) {
                if child.network.take().is_some() {
                    warn!(interface = %name, "discarding network config of enslaved interface");
                }
            }
        }
        self.child2parent = index.child2parent;
        self.roots = index.roots;
        self.roots.sort();

        for iface in self.interfaces.values() {
            if let Some(network) = &iface.network {
                let mut scope = Errors::new(iface.scope());
                scope.merge(network.validate());
                errs.merge(scope.into_result());
            }
        }

        if !errs.is_empty() {
            debug!(problems = errs.len(), "layout is malformed, skipping cycle detection");
            return errs.into_result();
        }

        self.check_cycles(&mut errs);
        debug!(
            roots = self.roots.len(),
            owned = self.child2parent.len(),
            problems = errs.len(),
            "layout validated"
        );
        errs.into_result()
    }

    fn normalize(&mut self, errs: &mut Errors) {
        for (key, iface) in self.interfaces.iter_mut() {
            if iface.name.is_empty() {
                iface.name = key.clone();
            } else if iface.name != *key {
                errs.push(format!("{} is stored under the name {}", iface, key));
            }
            iface.normalize();
        }

        let mut by_match_id: BTreeMap<&str, Vec<&Interface>> = BTreeMap::new();
        for iface in self.interfaces.values() {
            if !iface.match_id.is_empty() {
                by_match_id
                    .entry(iface.match_id.as_str())
                    .or_default()
                    .push(iface);
            }
        }
        for (id, group) in by_match_id {
            if group.len() > 1 && group.iter().any(|i| i.kind != InterfaceKind::Physical) {
                let names: Vec<String> = group.iter().map(|i| i.to_string()).collect();
                errs.push(format!(
                    "match-id {} is shared by {}, only physical interfaces may share one",
                    id,
                    names.join(", ")
                ));
            }
        }
    }

    fn check_cycles(&self, errs: &mut Errors) {
        let mut clean = HashSet::new();
        for name in self.interfaces.keys() {
            let mut working = Vec::new();
            walk_owners(&self.child2parent, name, &mut working, &mut clean, errs);
        }
    }

    /// Names of the interfaces built directly on `name`.
    pub fn owners(&self, name: &str) -> &[String] {
        self.child2parent
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Interfaces nothing else is built on, sorted.
    pub fn top_level(&self) -> Vec<String> {
        self.interfaces
            .keys()
            .filter(|name| !self.child2parent.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Order in which to create or bring up interfaces: each one after all
    /// the interfaces it is built on, ties broken by name.
    ///
    /// Only meaningful on a validated layout. Interfaces caught in a cycle
    /// are left out.
    pub fn activation_order(&self) -> Vec<String> {
        let mut pending: BTreeMap<&str, usize> =
            self.interfaces.keys().map(|name| (name.as_str(), 0)).collect();
        for owners in self.child2parent.values() {
            for owner in owners {
                if let Some(count) = pending.get_mut(owner.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for owner in self.owners(name) {
                if let Some(count) = pending.get_mut(owner.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(owner.as_str());
                    }
                }
            }
        }

        order
    }

    /// An interface is optional if it, or anything it is built on, is.
    pub fn is_effectively_optional(&self, name: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(iface) = self.interfaces.get(current) else {
                continue;
            };
            if iface.optional {
                return true;
            }
            stack.extend(iface.interfaces.iter().map(String::as_str));
        }
        false
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, LayoutError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn parse(text: &str, format: Format) -> Result<Self, LayoutError> {
        match format {
            Format::Yaml => Self::from_yaml(text),
            Format::Json => Self::from_json(text),
        }
    }

    pub fn from_reader<R: Read>(
        mut reader: R,
        format: Format,
        origin: &str,
    ) -> Result<Self, LayoutError> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|source| LayoutError::Read {
                path: origin.to_string(),
                source,
            })?;
        Self::parse(&text, format)
    }

    /// Reads a layout without validating it. `-` reads stdin.
    pub fn from_file(path: &Path) -> Result<Self, LayoutError> {
        let format = Format::from_path(path);
        if path == Path::new("-") {
            return Self::from_reader(io::stdin().lock(), format, "stdin");
        }
        let origin = path.display().to_string();
        let file = File::open(path).map_err(|source| LayoutError::Read {
            path: origin.clone(),
            source,
        })?;
        Self::from_reader(file, format, &origin)
    }

    /// Reads and validates a layout.
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let mut layout = Self::from_file(path)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn to_yaml(&self) -> Result<String, LayoutError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String, LayoutError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self, format: Format) -> Result<String, LayoutError> {
        match format {
            Format::Yaml => self.to_yaml(),
            Format::Json => self.to_json(),
        }
    }

    /// Writes the layout to `dest`. `-` writes stdout.
    pub fn write(&self, dest: &Path, format: Format) -> Result<(), LayoutError> {
        let text = self.render(format)?;
        let origin = dest.display().to_string();
        let result = if dest == Path::new("-") {
            io::stdout().lock().write_all(text.as_bytes())
        } else {
            std::fs::write(dest, text)
        };
        result.map_err(|source| LayoutError::Write {
            path: origin,
            source,
        })
    }
}

/// Walks from `node` towards its owners, reporting any owner chain that
/// comes back to a node already on the current path.
///
/// `clean` holds nodes whose every owner chain is known to terminate, so
/// shared substructure is only walked once per validation.
fn walk_owners<'a>(
    child2parent: &'a BTreeMap<String, Vec<String>>,
    node: &'a str,
    working: &mut Vec<&'a str>,
    clean: &mut HashSet<&'a str>,
    errs: &mut Errors,
) {
    if clean.contains(node) {
        return;
    }
    if let Some(pos) = working.iter().position(|n| *n == node) {
        let mut path = working[pos..].to_vec();
        path.push(node);
        errs.push(format!("{}: cycle detected: {}", node, path.join(" -> ")));
        return;
    }
    let Some(owners) = child2parent.get(node) else {
        clean.insert(node);
        return;
    };

    working.push(node);
    for owner in owners {
        walk_owners(child2parent, owner, working, clean, errs);
    }
    working.pop();
    clean.insert(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use macaddr::MacAddr6;
    use pretty_assertions::assert_eq;

    const HOST: &str = r#"
interfaces:
  eth0:
    type: physical
    match-id: eth0
    name: eth0
    hwaddr: '52:54:00:00:00:01'
    network:
      dhcp4: true
  eth1:
    type: physical
    match-id: eth1
    name: eth1
    hwaddr: '52:54:00:00:00:02'
  eth2:
    type: physical
    match-id: eth2
    name: eth2
    hwaddr: '52:54:00:00:00:03'
    optional: true
  bond0:
    type: bond
    match-id: bond0
    name: bond0
    interfaces: [eth1, eth0]
    parameters:
      mode: active-backup
  br0:
    type: bridge
    match-id: br0
    name: br0
    interfaces: [bond0]
    network:
      addresses: [192.168.10.2/24]
      gateway4: 192.168.10.1
  vlan10:
    type: vlan
    match-id: vlan10
    name: vlan10
    interfaces: [eth2]
    parameters:
      id: 10
    network:
      dhcp4: true
  vlan20:
    type: vlan
    match-id: vlan20
    name: vlan20
    interfaces: [eth2]
    parameters:
      id: 20
"#;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn mac(n: u8) -> MacAddr6 {
        MacAddr6::new(0x52, 0x54, 0x00, 0x00, 0x00, n)
    }

    fn host() -> Layout {
        Layout::from_yaml(HOST).unwrap()
    }

    fn bridge_vlan_loop() -> Layout {
        let mut layout = Layout::new();
        layout.insert(Interface::new(InterfaceKind::Bridge, "br0").with_children(["v0"]));
        layout.insert(Interface::new(InterfaceKind::Vlan, "v0").with_children(["br0"]));
        layout
    }

    #[test]
    fn host_layout_validates() {
        let mut layout = host();
        layout.validate().unwrap();

        assert_eq!(layout.roots, strings(&["eth0", "eth1", "eth2"]));
        assert_eq!(layout.owners("eth0"), strings(&["bond0"]).as_slice());
        assert_eq!(layout.owners("eth1"), strings(&["bond0"]).as_slice());
        assert_eq!(layout.owners("bond0"), strings(&["br0"]).as_slice());
        assert_eq!(layout.owners("eth2"), strings(&["vlan10", "vlan20"]).as_slice());
        assert!(layout.owners("br0").is_empty());
        assert_eq!(layout.top_level(), strings(&["br0", "vlan10", "vlan20"]));
    }

    #[test]
    fn enslaved_interfaces_lose_their_network() {
        let mut layout = host();
        assert!(layout.interfaces["eth0"].network.is_some());
        layout.validate().unwrap();

        assert!(layout.interfaces["eth0"].network.is_none());
        assert!(layout.interfaces["br0"].network.is_some());
        assert!(layout.interfaces["vlan10"].network.is_some());
    }

    #[test]
    fn children_are_sorted_in_place() {
        let mut layout = host();
        layout.validate().unwrap();
        assert_eq!(layout.interfaces["bond0"].interfaces, strings(&["eth0", "eth1"]));
    }

    #[test]
    fn validation_is_deterministic() {
        let mut layout = host();
        layout.validate().unwrap();
        let first = (layout.roots.clone(), layout.child2parent.clone());
        layout.validate().unwrap();
        assert_eq!((layout.roots.clone(), layout.child2parent.clone()), first);

        let mut broken = host();
        broken
            .interfaces
            .get_mut("br0")
            .unwrap()
            .interfaces
            .push("eth1".into());
        let a = broken.validate().unwrap_err().to_string();
        let b = broken.validate().unwrap_err().to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn stale_derived_state_is_discarded() {
        let mut layout = host();
        layout.roots = strings(&["bogus"]);
        layout.child2parent.insert("bogus".into(), strings(&["nothing"]));
        layout.validate().unwrap();
        assert!(!layout.roots.contains(&"bogus".to_string()));
        assert!(!layout.child2parent.contains_key("bogus"));
    }

    #[test]
    fn cycles_are_reported() {
        let mut layout = bridge_vlan_loop();
        let err = layout.validate().unwrap_err();
        assert_eq!(
            err.messages(),
            &["br0: cycle detected: br0 -> v0 -> br0".to_string()]
        );
        assert!(layout.roots.is_empty());
    }

    #[test]
    fn structural_errors_skip_cycle_detection() {
        let mut layout = bridge_vlan_loop();
        layout.insert(Interface::new(InterfaceKind::Bond, "bond0").with_children(["missing"]));
        let err = layout.validate().unwrap_err();
        assert!(err.mentions("bond:bond0 refers to undefined sub interface missing"));
        assert!(!err.mentions("cycle detected"));
    }

    #[test]
    fn vlan_diamond_is_acyclic() {
        let mut layout = Layout::new();
        layout.insert(Interface::physical("eth0", mac(1)));
        layout.insert(Interface::new(InterfaceKind::Vlan, "v2").with_children(["eth0"]));
        layout.insert(Interface::new(InterfaceKind::Vlan, "v1").with_children(["eth0"]));
        layout.validate().unwrap();

        assert_eq!(layout.roots, strings(&["eth0"]));
        assert_eq!(layout.owners("eth0"), strings(&["v1", "v2"]).as_slice());
        assert_eq!(layout.top_level(), strings(&["v1", "v2"]));
    }

    #[test]
    fn bridge_over_shared_vlans_is_acyclic() {
        let mut layout = Layout::new();
        layout.insert(Interface::physical("eth0", mac(1)));
        layout.insert(Interface::new(InterfaceKind::Vlan, "v1").with_children(["eth0"]));
        layout.insert(Interface::new(InterfaceKind::Vlan, "v2").with_children(["eth0"]));
        layout.insert(Interface::new(InterfaceKind::Bridge, "br1").with_children(["v1"]));
        layout.insert(Interface::new(InterfaceKind::Bridge, "br2").with_children(["v2"]));
        layout.validate().unwrap();

        assert_eq!(layout.top_level(), strings(&["br1", "br2"]));
        assert_eq!(
            layout.activation_order(),
            strings(&["eth0", "v1", "br1", "v2", "br2"])
        );
    }

    #[test]
    fn name_must_match_key() {
        let mut layout = Layout::new();
        layout
            .interfaces
            .insert("eth9".into(), Interface::physical("eth0", mac(1)));
        let err = layout.validate().unwrap_err();
        assert!(err.mentions("physical:eth0 is stored under the name eth9"));
    }

    #[test]
    fn missing_name_is_taken_from_key() {
        let mut layout = Layout::from_yaml(
            "interfaces:\n  eth0:\n    type: physical\n    hwaddr: '52:54:00:00:00:01'\n",
        )
        .unwrap();
        layout.validate().unwrap();
        assert_eq!(layout.interfaces["eth0"].name, "eth0");
        assert_eq!(layout.roots, strings(&["eth0"]));
    }

    #[test]
    fn only_physical_interfaces_share_a_match_id() {
        let mut layout = Layout::new();
        let mut a = Interface::physical("enp1s0", mac(1));
        a.match_id = "lan".into();
        let mut b = Interface::physical("enp2s0", mac(2));
        b.match_id = "lan".into();
        layout.insert(a);
        layout.insert(b);
        layout.validate().unwrap();

        let mut bridge = Interface::new(InterfaceKind::Bridge, "br-lan");
        bridge.match_id = "lan".into();
        layout.insert(bridge);
        let err = layout.validate().unwrap_err();
        assert!(err.mentions("match-id lan is shared by bridge:br-lan, physical:enp1s0, physical:enp2s0"));
    }

    #[test]
    fn network_errors_carry_the_interface_scope() {
        let mut layout = host();
        layout.interfaces.get_mut("vlan10").unwrap().network = Some(Network {
            gateway4: Some("2001:db8::1".parse().unwrap()),
            ..Network::dhcp()
        });
        let err = layout.validate().unwrap_err();
        assert_eq!(err.prefix, "layout");
        assert_eq!(
            err.messages(),
            &["vlan:vlan10: network: gateway4 2001:db8::1 is not a single IPv4 address".to_string()]
        );
    }

    #[test]
    fn discarded_networks_are_not_validated() {
        let mut layout = host();
        layout.interfaces.get_mut("eth1").unwrap().network = Some(Network {
            dhcp_identifier: "bogus".into(),
            ..Default::default()
        });
        layout.validate().unwrap();
        assert!(layout.interfaces["eth1"].network.is_none());
    }

    #[test]
    fn every_problem_is_reported_at_once() {
        let mut layout = Layout::new();
        let mut eth0 = Interface::physical("eth0", mac(1));
        eth0.hw_addr = None;
        layout.insert(eth0);
        layout.insert(Interface::physical("eth1", mac(2)));
        layout.insert(Interface::new(InterfaceKind::Bond, "bond0").with_children(["eth1", "nope"]));
        layout.insert(Interface::new(InterfaceKind::Bridge, "br0").with_children(["eth1"]));

        let err = layout.validate().unwrap_err();
        assert_eq!(
            err.messages(),
            &strings(&[
                "bond:bond0: bond:bond0 refers to undefined sub interface nope",
                "bridge:br0: physical:eth1 is already owned by bond:bond0, it cannot be a member of bridge:br0",
                "physical:eth0: physical:eth0 must have a hardware address",
            ])
        );
        assert_eq!(layout.owners("eth1"), strings(&["bond0"]).as_slice());
    }

    #[test]
    fn activation_order_follows_dependencies() {
        let mut layout = host();
        layout.validate().unwrap();
        assert_eq!(
            layout.activation_order(),
            strings(&["eth0", "eth1", "bond0", "br0", "eth2", "vlan10", "vlan20"])
        );
    }

    #[test]
    fn optional_bubbles_up() {
        let mut layout = host();
        layout.validate().unwrap();
        assert!(layout.is_effectively_optional("eth2"));
        assert!(layout.is_effectively_optional("vlan10"));
        assert!(!layout.is_effectively_optional("br0"));
        assert!(!layout.is_effectively_optional("unknown"));
    }

    #[test]
    fn validated_layout_round_trips() {
        let mut layout = host();
        layout.validate().unwrap();

        let yaml = layout.to_yaml().unwrap();
        assert!(yaml.contains("child2parent"));
        assert_eq!(Layout::from_yaml(&yaml).unwrap(), layout);

        let json = layout.to_json().unwrap();
        assert_eq!(Layout::from_json(&json).unwrap(), layout);
    }

    #[test]
    fn load_reads_and_validates_files() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("wr-core-{}-good.yaml", std::process::id()));
        let bad = dir.join(format!("wr-core-{}-bad.json", std::process::id()));

        host().write(&good, Format::Yaml).unwrap();
        let loaded = Layout::load(&good).unwrap();
        assert_eq!(loaded.roots, strings(&["eth0", "eth1", "eth2"]));

        bridge_vlan_loop().write(&bad, Format::Json).unwrap();
        assert!(Layout::from_file(&bad).is_ok());
        assert!(matches!(Layout::load(&bad), Err(LayoutError::Invalid(_))));

        std::fs::remove_file(&good).ok();
        std::fs::remove_file(&bad).ok();

        assert!(matches!(
            Layout::from_file(&dir.join("wr-core-does-not-exist.yaml")),
            Err(LayoutError::Read { .. })
        ));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_path(Path::new("host.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("host.yaml")), Format::Yaml);
        assert_eq!(Format::from_path(Path::new("-")), Format::Yaml);
    }
}
